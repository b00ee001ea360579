// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

//! Collaborators the object layer consumes from the owning session context.

use crate::{error::TspError, registry::ContextHandle};
use log::error;

/// Answers capability queries about the device behind a context.
pub trait PcrCapability {
    /// Returns the number of PCRs the device implements.
    ///
    /// # Errors
    ///
    /// Returns a `TspError` if the device cannot be queried.
    fn pcr_count(&self, context: ContextHandle) -> Result<u32, TspError>;
}

/// Hands out buffers that belong to a context, so the context can release
/// everything it returned to the application in one go.
pub trait ContextAllocator: Send + Sync + std::fmt::Debug {
    /// Allocates `len` zeroed bytes on behalf of `context`.
    ///
    /// # Errors
    ///
    /// Returns `TspError::OutOfMemory` if the allocation fails.
    fn alloc(&self, context: ContextHandle, len: usize) -> Result<Vec<u8>, TspError>;

    /// Allocates a copy of `bytes` on behalf of `context`.
    ///
    /// # Errors
    ///
    /// Returns `TspError::OutOfMemory` if the allocation fails.
    fn alloc_copy(&self, context: ContextHandle, bytes: &[u8]) -> Result<Vec<u8>, TspError> {
        let mut buf = self.alloc(context, bytes.len())?;
        buf.copy_from_slice(bytes);
        Ok(buf)
    }
}

/// Plain fallible heap allocation with no per-context bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl ContextAllocator for HeapAllocator {
    fn alloc(&self, _context: ContextHandle, len: usize) -> Result<Vec<u8>, TspError> {
        let mut buf = Vec::new();
        if let Err(e) = buf.try_reserve_exact(len) {
            error!(target: "tspi::context", "malloc of {len} bytes failed.");
            return Err(e.into());
        }
        buf.resize(len, 0);
        Ok(buf)
    }
}
