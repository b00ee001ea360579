// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

use rstest::rstest;
use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};
use tspi::{
    registry::{ContextHandle, Handle, HandleAllocator, Registry},
    TspError,
};

const CONTEXT: ContextHandle = ContextHandle(7);

fn registry(first: u32) -> Registry<Vec<u8>> {
    Registry::new("test", Arc::new(HandleAllocator::new(first)))
}

#[rstest]
#[case(1, 1)]
#[case(0, 1)]
#[case(0x4000_0000, 0x4000_0000)]
fn test_first_handle(#[case] first: u32, #[case] expected: u32) {
    let registry = registry(first);
    assert_eq!(registry.add(CONTEXT, Vec::new()).unwrap(), Handle(expected));
    assert_eq!(
        registry.add(CONTEXT, Vec::new()).unwrap(),
        Handle(expected + 1)
    );
}

#[test]
fn test_handle_space_exhaustion() {
    let allocator = HandleAllocator::new(u32::MAX - 1);
    assert_eq!(allocator.allocate().unwrap(), Handle(u32::MAX - 1));
    assert_eq!(allocator.allocate().unwrap(), Handle(u32::MAX));
    assert_eq!(allocator.allocate(), Err(TspError::OutOfMemory));
    assert_eq!(allocator.allocate(), Err(TspError::OutOfMemory));
}

#[test]
fn test_guard_gives_mutable_access() {
    let registry = registry(1);
    let handle = registry.add(CONTEXT, vec![1]).unwrap();
    {
        let mut entry = registry.get(handle).unwrap();
        assert_eq!(entry.handle, handle);
        assert_eq!(entry.context, CONTEXT);
        entry.payload.push(2);
    }
    assert_eq!(registry.get(handle).unwrap().payload, vec![1, 2]);
}

#[test]
fn test_remove_hides_foreign_objects() {
    let registry = registry(1);
    let handle = registry.add(CONTEXT, vec![9]).unwrap();
    assert_eq!(
        registry.remove(handle, ContextHandle(8)),
        Err(TspError::InvalidHandle)
    );
    assert_eq!(
        registry.remove(Handle(1000), CONTEXT),
        Err(TspError::InvalidHandle)
    );
    assert_eq!(registry.len(), 1);
    registry.remove(handle, CONTEXT).unwrap();
    assert!(registry.is_empty());
    assert_eq!(registry.context_of(handle), Err(TspError::InvalidHandle));
}

#[test]
fn test_close_context_keeps_other_contexts() {
    let registry = registry(1);
    let mine = registry.add(CONTEXT, Vec::new()).unwrap();
    let theirs = registry.add(ContextHandle(8), Vec::new()).unwrap();
    registry.add(CONTEXT, Vec::new()).unwrap();

    assert_eq!(registry.close_context(CONTEXT), 2);
    assert_eq!(registry.close_context(CONTEXT), 0);
    assert!(!registry.is_member(mine));
    assert_eq!(registry.handles(ContextHandle(8)), vec![theirs]);
}

#[test]
fn test_guard_serializes_the_type() {
    let registry = Arc::new(registry(1));
    let first = registry.add(CONTEXT, Vec::new()).unwrap();
    let second = registry.add(CONTEXT, Vec::new()).unwrap();

    let guard = registry.get(first).unwrap();
    let (tx, rx) = mpsc::channel();
    let worker = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            registry.get(second).unwrap().payload.push(1);
            tx.send(()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(guard);
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    worker.join().unwrap();
    assert_eq!(registry.get(second).unwrap().payload, vec![1]);
}

#[test]
fn test_poisoned_lock_is_recovered() {
    let registry = Arc::new(registry(1));
    let handle = registry.add(CONTEXT, vec![3]).unwrap();
    let worker = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            let _guard = registry.get(handle).unwrap();
            panic!("poison the registry");
        })
    };
    assert!(worker.join().is_err());
    assert_eq!(registry.get(handle).unwrap().payload, vec![3]);
}
