// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Type-segmented object registry shared by every object kind of the stack.
//!
//! Each object type owns one [`Registry`], guarded by a single mutex. A lookup
//! returns an [`ObjectGuard`] that keeps the type lock until it is dropped, so
//! callers must not block while holding one.

use crate::error::TspError;
use log::debug;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

/// An opaque object handle, unique across all registries of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// The session context that created, and therefore owns, an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextHandle(pub u32);

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Issues handles from a monotonically increasing counter.
///
/// Handles are never reused, so a removed handle can never silently resolve to
/// a different object later.
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU32,
}

impl HandleAllocator {
    #[must_use]
    pub fn new(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first.max(1)),
        }
    }

    /// Takes the next free handle.
    ///
    /// # Errors
    ///
    /// Returns `TspError::OutOfMemory` once the 32-bit handle space is used up.
    pub fn allocate(&self) -> Result<Handle, TspError> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                if n == 0 {
                    None
                } else {
                    Some(n.wrapping_add(1))
                }
            })
            .map(Handle)
            .map_err(|_| TspError::OutOfMemory)
    }
}

#[derive(Debug)]
pub struct Entry<T> {
    pub handle: Handle,
    pub context: ContextHandle,
    pub payload: T,
}

#[derive(Debug)]
pub struct Registry<T> {
    name: &'static str,
    allocator: Arc<HandleAllocator>,
    entries: Mutex<Vec<Entry<T>>>,
}

/// Exclusive access to one registry entry.
///
/// Holds the lock of the whole registry for its lifetime.
pub struct ObjectGuard<'a, T> {
    entries: MutexGuard<'a, Vec<Entry<T>>>,
    index: usize,
}

impl<T> Deref for ObjectGuard<'_, T> {
    type Target = Entry<T>;

    fn deref(&self) -> &Entry<T> {
        &self.entries[self.index]
    }
}

impl<T> DerefMut for ObjectGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Entry<T> {
        &mut self.entries[self.index]
    }
}

impl<T> Registry<T> {
    #[must_use]
    pub fn new(name: &'static str, allocator: Arc<HandleAllocator>) -> Self {
        Self {
            name,
            allocator,
            entries: Mutex::new(Vec::new()),
        }
    }

    // Payload mutations complete before they become observable, so an entry
    // set left behind by a panicking thread is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `payload` under a freshly allocated handle.
    ///
    /// # Errors
    ///
    /// Returns `TspError::OutOfMemory` if no handle or entry slot is available.
    pub fn add(&self, context: ContextHandle, payload: T) -> Result<Handle, TspError> {
        let handle = self.allocator.allocate()?;
        let mut entries = self.lock();
        entries.try_reserve(1)?;
        entries.push(Entry {
            handle,
            context,
            payload,
        });
        debug!(target: "tspi::registry", "{}: add {handle} (context {context})", self.name);
        Ok(handle)
    }

    /// Resolves `handle` and locks the registry until the guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle` if no such object exists.
    pub fn get(&self, handle: Handle) -> Result<ObjectGuard<'_, T>, TspError> {
        let entries = self.lock();
        let index = entries
            .iter()
            .position(|entry| entry.handle == handle)
            .ok_or(TspError::InvalidHandle)?;
        Ok(ObjectGuard { entries, index })
    }

    #[must_use]
    pub fn is_member(&self, handle: Handle) -> bool {
        self.get(handle).is_ok()
    }

    /// Returns the context that owns `handle`.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle` if no such object exists.
    pub fn context_of(&self, handle: Handle) -> Result<ContextHandle, TspError> {
        Ok(self.get(handle)?.context)
    }

    /// Unlinks and frees the object behind `handle`.
    ///
    /// An object owned by another context is reported exactly like a missing
    /// one.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle` if the handle is unknown or owned by
    /// a different context.
    pub fn remove(&self, handle: Handle, context: ContextHandle) -> Result<(), TspError> {
        let mut entries = self.lock();
        let index = entries
            .iter()
            .position(|entry| entry.handle == handle && entry.context == context)
            .ok_or(TspError::InvalidHandle)?;
        entries.remove(index);
        debug!(target: "tspi::registry", "{}: remove {handle} (context {context})", self.name);
        Ok(())
    }

    /// Frees every object owned by `context` and returns how many there were.
    pub fn close_context(&self, context: ContextHandle) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| entry.context != context);
        let freed = before - entries.len();
        if freed > 0 {
            debug!(target: "tspi::registry", "{}: closed context {context}, freed {freed}", self.name);
        }
        freed
    }

    /// Lists the live handles owned by `context`, in creation order.
    #[must_use]
    pub fn handles(&self, context: ContextHandle) -> Vec<Handle> {
        self.lock()
            .iter()
            .filter(|entry| entry.context == context)
            .map(|entry| entry.handle)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
