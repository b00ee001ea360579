// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

//! Loading and unloading of big-endian TPM 1.2 blobs.

use crate::error::{BlobError, TspError};

/// Appends big-endian fields to a growable blob.
#[derive(Debug, Default)]
pub struct BlobWriter {
    buf: Vec<u8>,
}

impl BlobWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with room for `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns `TspError::OutOfMemory` if the buffer cannot be allocated.
    pub fn with_capacity(capacity: usize) -> Result<Self, TspError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)?;
        Ok(Self { buf })
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a `u16` size prefix followed by `bytes`.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::Overflow` if `bytes` is longer than `u16::MAX`.
    pub fn write_sized_u16(&mut self, bytes: &[u8]) -> Result<(), BlobError> {
        let len = u16::try_from(bytes.len()).map_err(|_| BlobError::Overflow(bytes.len()))?;
        self.write_u16(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Overwrites four bytes at `offset` with `value`.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::Underflow` if the slot lies past the written data.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<(), BlobError> {
        let available = self.buf.len();
        let slot = self
            .buf
            .get_mut(offset..offset + 4)
            .ok_or(BlobError::Underflow {
                needed: offset + 4,
                available,
            })?;
        slot.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Consumes big-endian fields from a borrowed blob.
#[derive(Debug)]
pub struct BlobReader<'a> {
    blob: &'a [u8],
    offset: usize,
}

impl<'a> BlobReader<'a> {
    #[must_use]
    pub fn new(blob: &'a [u8]) -> Self {
        Self { blob, offset: 0 }
    }

    /// Consumes the next `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::Underflow` if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BlobError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(BlobError::Underflow {
                needed: len,
                available: remaining,
            });
        }
        let bytes = &self.blob[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BlobError> {
        let bytes = self.read_bytes(N)?;
        bytes.try_into().map_err(|_| BlobError::Underflow {
            needed: N,
            available: bytes.len(),
        })
    }

    /// # Errors
    ///
    /// Returns `BlobError::Underflow` if fewer than two bytes remain.
    pub fn read_u16(&mut self) -> Result<u16, BlobError> {
        self.read_array().map(u16::from_be_bytes)
    }

    /// # Errors
    ///
    /// Returns `BlobError::Underflow` if fewer than four bytes remain.
    pub fn read_u32(&mut self) -> Result<u32, BlobError> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Consumes a `u32` length followed by that many bytes.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::Underflow` if the blob is shorter than announced.
    pub fn read_sized_u32(&mut self) -> Result<&'a [u8], BlobError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.blob.len() - self.offset
    }
}
