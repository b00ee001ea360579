// SPDX-License-Identifier: GPL-3-0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! In-memory stand-in for the device and session collaborators.

use crate::{
    blob::BlobWriter,
    context::{ContextAllocator, PcrCapability},
    error::TspError,
    pcr::{Sha1Digest, SHA1_DIGEST_LEN},
    registry::ContextHandle,
    tick::{TcsKeyHandle, TransportCommand, TransportSession, TPM_ORD_GET_TICKS, TPM_ORD_TICK_STAMP_BLOB},
};
use log::{debug, error};
use sha1::{Digest, Sha1};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

pub const PCR_COUNT: u32 = 24;

const TPM_TAG_CURRENT_TICKS: u16 = 0x0014;
const TICK_RATE: u16 = 1000;

#[derive(Debug, Default)]
struct MockMemory {
    outstanding: HashMap<ContextHandle, usize>,
    fail: bool,
}

#[derive(Debug)]
pub struct MockTpm {
    pcr_count: Option<u32>,
    keys: HashMap<u32, Sha1Digest>,
    ticks: u64,
    tick_nonce: Sha1Digest,
    transport_open: bool,
    executed: Vec<u32>,
    memory: Mutex<MockMemory>,
}

impl Default for MockTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTpm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pcr_count: Some(PCR_COUNT),
            keys: HashMap::new(),
            ticks: 0,
            tick_nonce: [0x5a; SHA1_DIGEST_LEN],
            transport_open: false,
            executed: Vec::new(),
            memory: Mutex::new(MockMemory::default()),
        }
    }

    /// Sets the PCR count reported to capability queries. `None` makes the
    /// query fail.
    #[must_use]
    pub fn with_pcr_count(mut self, pcr_count: Option<u32>) -> Self {
        self.pcr_count = pcr_count;
        self
    }

    /// Loads a key whose public key hashes to `pub_key_hash`.
    pub fn load_key(&mut self, key: TcsKeyHandle, pub_key_hash: Sha1Digest) {
        self.keys.insert(key.0, pub_key_hash);
    }

    #[must_use]
    pub fn transport_open(&self) -> bool {
        self.transport_open
    }

    /// Ordinals executed so far, oldest first.
    #[must_use]
    pub fn executed(&self) -> &[u32] {
        &self.executed
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, MockMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every following allocation fail while `fail` is set.
    pub fn set_alloc_failure(&self, fail: bool) {
        self.memory().fail = fail;
    }

    /// Bytes handed out to `context` and not yet released.
    #[must_use]
    pub fn outstanding(&self, context: ContextHandle) -> usize {
        self.memory().outstanding.get(&context).copied().unwrap_or(0)
    }

    /// Releases everything allocated for `context` and returns the byte count.
    pub fn release_context(&self, context: ContextHandle) -> usize {
        self.memory().outstanding.remove(&context).unwrap_or(0)
    }

    fn current_ticks(&self) -> Vec<u8> {
        let mut writer = BlobWriter::new();
        writer.write_u16(TPM_TAG_CURRENT_TICKS);
        writer.write_bytes(&self.ticks.to_be_bytes());
        writer.write_u16(TICK_RATE);
        writer.write_bytes(&self.tick_nonce);
        writer.into_vec()
    }
}

impl PcrCapability for MockTpm {
    fn pcr_count(&self, _context: ContextHandle) -> Result<u32, TspError> {
        self.pcr_count
            .ok_or_else(|| TspError::Transport("TPM_CAP_PROPERTY_PCR unavailable".to_string()))
    }
}

impl ContextAllocator for MockTpm {
    fn alloc(&self, context: ContextHandle, len: usize) -> Result<Vec<u8>, TspError> {
        let mut memory = self.memory();
        if memory.fail {
            error!("malloc of {len} bytes failed.");
            return Err(TspError::OutOfMemory);
        }
        *memory.outstanding.entry(context).or_default() += len;
        Ok(vec![0; len])
    }
}

impl TransportSession for MockTpm {
    fn init(&mut self) -> Result<(), TspError> {
        if !self.transport_open {
            debug!("establishing transport session");
            self.transport_open = true;
        }
        Ok(())
    }

    fn execute(&mut self, command: TransportCommand<'_>) -> Result<Vec<u8>, TspError> {
        if !self.transport_open {
            return Err(TspError::Transport("transport session not established".to_string()));
        }
        self.executed.push(command.ordinal);
        self.ticks += 1;

        let mut reply = BlobWriter::new();
        match command.ordinal {
            TPM_ORD_GET_TICKS => {
                let ticks = self.current_ticks();
                reply.write_u32(u32::try_from(ticks.len()).map_err(|_| TspError::OutOfMemory)?);
                reply.write_bytes(&ticks);
            }
            TPM_ORD_TICK_STAMP_BLOB => {
                let &[key] = command.handles else {
                    return Err(TspError::BadParameter("expected one key handle".to_string()));
                };
                let pub_key_hash = self.keys.get(&key).ok_or(TspError::InvalidHandle)?;
                if command.pub_key_hash != Some(pub_key_hash) {
                    return Err(TspError::Transport("public key hash mismatch".to_string()));
                }
                let auth = command
                    .auth
                    .ok_or_else(|| TspError::Transport("authorization missing".to_string()))?;
                auth.nonce_even.copy_from_slice(&Sha1::digest(auth.nonce_odd));

                let mut signed = Sha1::new();
                signed.update(command.params);
                signed.update(pub_key_hash);
                let signature = signed.finalize();
                let ticks = self.current_ticks();

                reply.write_u32(u32::try_from(signature.len()).map_err(|_| TspError::OutOfMemory)?);
                reply.write_bytes(&signature);
                reply.write_u32(u32::try_from(ticks.len()).map_err(|_| TspError::OutOfMemory)?);
                reply.write_bytes(&ticks);
            }
            ordinal => {
                return Err(TspError::Transport(format!("unsupported ordinal {ordinal:#x}")));
            }
        }
        Ok(reply.into_vec())
    }

    fn key_pub_hash(&self, key: TcsKeyHandle) -> Result<Sha1Digest, TspError> {
        self.keys.get(&key.0).copied().ok_or(TspError::InvalidHandle)
    }
}
