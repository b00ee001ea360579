// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

//! Tick counter commands executed inside a transport session.

use crate::{
    blob::{BlobReader, BlobWriter},
    error::TspError,
    pcr::{Sha1Digest, SHA1_DIGEST_LEN},
};
use log::debug;

pub const TPM_ORD_GET_TICKS: u32 = 0x0000_00f1;
pub const TPM_ORD_TICK_STAMP_BLOB: u32 = 0x0000_00f2;

/// A key handle as known to the core services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcsKeyHandle(pub u32);

/// An OIAP/OSAP authorization block, updated in place by the TPM reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpmAuth {
    pub handle: u32,
    pub nonce_even: Sha1Digest,
    pub nonce_odd: Sha1Digest,
    pub continue_session: bool,
    pub hmac: Sha1Digest,
}

/// One wrapped command for the transport session.
#[derive(Debug)]
pub struct TransportCommand<'a> {
    pub ordinal: u32,
    pub params: &'a [u8],
    pub pub_key_hash: Option<&'a Sha1Digest>,
    pub handles: &'a [u32],
    pub auth: Option<&'a mut TpmAuth>,
}

/// The transport session a context executes wrapped commands through.
pub trait TransportSession {
    /// Establishes the transport session if it is not running yet.
    ///
    /// # Errors
    ///
    /// Returns a `TspError` if the session cannot be established.
    fn init(&mut self) -> Result<(), TspError>;

    /// Executes a command and returns its decrypted output parameters.
    ///
    /// # Errors
    ///
    /// Returns a `TspError` if the TPM or the transport fails.
    fn execute(&mut self, command: TransportCommand<'_>) -> Result<Vec<u8>, TspError>;

    /// Returns the SHA-1 of the public key loaded under `key`.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle` if the key is unknown.
    fn key_pub_hash(&self, key: TcsKeyHandle) -> Result<Sha1Digest, TspError>;
}

/// Output of `TPM_TickStampBlob`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickStamp {
    pub signature: Vec<u8>,
    pub tick_count: Vec<u8>,
}

/// Reads the current tick count structure.
///
/// # Errors
///
/// Returns a `TspError` if the session fails or the reply is truncated.
pub fn read_current_ticks<S: TransportSession + ?Sized>(session: &mut S) -> Result<Vec<u8>, TspError> {
    session.init()?;
    debug!(target: "tspi::tick", "Executing in a transport session");

    let reply = session.execute(TransportCommand {
        ordinal: TPM_ORD_GET_TICKS,
        params: &[],
        pub_key_hash: None,
        handles: &[],
        auth: None,
    })?;

    let mut reader = BlobReader::new(&reply);
    Ok(reader.read_sized_u32()?.to_vec())
}

/// Signs `digest` together with the current tick count using `key`.
///
/// # Errors
///
/// Returns a `TspError` if the key is unknown, the session fails, or the
/// reply is truncated.
pub fn tick_stamp_blob<S: TransportSession + ?Sized>(
    session: &mut S,
    key: TcsKeyHandle,
    anti_replay: &Sha1Digest,
    digest: &Sha1Digest,
    auth: Option<&mut TpmAuth>,
) -> Result<TickStamp, TspError> {
    session.init()?;
    debug!(target: "tspi::tick", "Executing in a transport session");

    let mut params = BlobWriter::with_capacity(2 * SHA1_DIGEST_LEN)?;
    params.write_bytes(anti_replay);
    params.write_bytes(digest);

    let pub_key_hash = session.key_pub_hash(key)?;

    let reply = session.execute(TransportCommand {
        ordinal: TPM_ORD_TICK_STAMP_BLOB,
        params: params.as_slice(),
        pub_key_hash: Some(&pub_key_hash),
        handles: &[key.0],
        auth,
    })?;

    let mut reader = BlobReader::new(&reply);
    let signature = reader.read_sized_u32()?.to_vec();
    let tick_count = reader.read_sized_u32()?.to_vec();
    Ok(TickStamp {
        signature,
        tick_count,
    })
}
