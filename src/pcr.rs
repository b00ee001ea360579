// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Abstractions and logic for handling Platform Configuration Registers (PCRs).
//!
//! A [`PcrComposite`] is a selection bitmap plus one SHA-1 value per covered PCR
//! index. Bit `i % 8` of byte `i / 8` selects PCR `i`.

use crate::{
    blob::{BlobReader, BlobWriter},
    error::{BlobError, TspError},
};
use log::error;
use sha1::{Digest, Sha1};

pub const SHA1_DIGEST_LEN: usize = 20;

/// Largest selection a `TPM_PCR_SELECTION` can carry in its `u16` size field.
pub const PCR_SELECT_MAX: usize = u16::MAX as usize;

pub type Sha1Digest = [u8; SHA1_DIGEST_LEN];

/// Number of selection bytes needed to cover `index`.
#[must_use]
pub fn bytes_to_hold(index: u32) -> usize {
    index as usize / 8 + 1
}

/// A `TPM_PCR_SELECTION` bitmap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcrSelection {
    select: Vec<u8>,
}

impl PcrSelection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps raw selection bytes.
    ///
    /// # Errors
    ///
    /// Returns `TspError::BadParameter` if the bitmap exceeds `PCR_SELECT_MAX`.
    pub fn from_bytes(select: Vec<u8>) -> Result<Self, TspError> {
        if select.len() > PCR_SELECT_MAX {
            return Err(TspError::BadParameter(format!(
                "invalid select size {} (> {PCR_SELECT_MAX})",
                select.len()
            )));
        }
        Ok(Self { select })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.select
    }

    /// Size of the bitmap in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.select.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.select.is_empty()
    }

    /// Number of PCR indices the bitmap can address.
    #[must_use]
    pub fn pcr_capacity(&self) -> usize {
        self.select.len() * 8
    }

    #[must_use]
    pub fn covers(&self, index: u32) -> bool {
        bytes_to_hold(index) <= self.select.len()
    }

    #[must_use]
    pub fn is_selected(&self, index: u32) -> bool {
        let index = index as usize;
        self.select
            .get(index / 8)
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }

    /// Selected PCR indices in wire order: byte 0 first, least significant bit
    /// first within each byte.
    pub fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.select
            .iter()
            .enumerate()
            .filter(|(_, &byte)| byte != 0)
            .flat_map(|(byte_idx, &byte)| {
                (0..8)
                    .filter(move |bit_idx| (byte >> bit_idx) & 1 == 1)
                    .map(move |bit_idx| byte_idx * 8 + bit_idx)
            })
    }

    #[must_use]
    pub fn selected_count(&self) -> usize {
        self.select.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    /// Loads the selection as `u16 sizeOfSelect || pcrSelect`.
    ///
    /// # Errors
    ///
    /// Returns `TspError::Blob` if the bitmap does not fit the size field.
    pub fn load(&self, writer: &mut BlobWriter) -> Result<(), TspError> {
        writer.write_sized_u16(&self.select)?;
        Ok(())
    }

    /// Unloads a `TPM_PCR_SELECTION`.
    ///
    /// # Errors
    ///
    /// Returns `TspError::Blob` if the blob is truncated.
    pub fn unload(reader: &mut BlobReader<'_>) -> Result<Self, TspError> {
        let size = reader.read_u16()? as usize;
        let select = reader.read_bytes(size)?.to_vec();
        Ok(Self { select })
    }

    fn set(&mut self, index: u32) {
        let index = index as usize;
        self.select[index / 8] |= 1 << (index % 8);
    }
}

/// The payload of a PCR object: the selection and the per-index values.
///
/// Both buffers grow together. Whenever the selection holds `n` bytes, the
/// value table holds at least `n * 8` digests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcrComposite {
    selection: PcrSelection,
    values: Vec<Sha1Digest>,
}

impl PcrComposite {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn selection(&self) -> &PcrSelection {
        &self.selection
    }

    #[must_use]
    pub fn values(&self) -> &[Sha1Digest] {
        &self.values
    }

    /// Grows the selection to at least `select_bytes` bytes and the value
    /// table to match. Never shrinks.
    ///
    /// Space for both buffers is reserved before either one changes, so a
    /// failed allocation leaves the object exactly as it was. `PCR_SELECT_MAX`
    /// bounds the value table to about 10 MiB, so that path cannot be reached
    /// from a test without a failing global allocator.
    ///
    /// # Errors
    ///
    /// Returns `TspError::OutOfMemory` if either buffer cannot grow, and
    /// `TspError::BadParameter` if `select_bytes` exceeds `PCR_SELECT_MAX`.
    pub fn ensure_capacity(&mut self, select_bytes: usize) -> Result<(), TspError> {
        let current = self.selection.select.len();
        if select_bytes <= current {
            return Ok(());
        }
        if select_bytes > PCR_SELECT_MAX {
            return Err(TspError::BadParameter(format!(
                "invalid select size {select_bytes} (> {PCR_SELECT_MAX})"
            )));
        }
        let slots = select_bytes * 8;
        if let Err(e) = self.selection.select.try_reserve_exact(select_bytes - current) {
            error!(target: "tspi::pcr", "malloc of {select_bytes} bytes failed.");
            return Err(e.into());
        }
        if let Err(e) = self
            .values
            .try_reserve_exact(slots.saturating_sub(self.values.len()))
        {
            error!(target: "tspi::pcr", "malloc of {} bytes failed.", slots * SHA1_DIGEST_LEN);
            return Err(e.into());
        }
        self.selection.select.resize(select_bytes, 0);
        if self.values.len() < slots {
            self.values.resize(slots, [0; SHA1_DIGEST_LEN]);
        }
        Ok(())
    }

    /// Marks `index` as selected without touching its value.
    ///
    /// # Errors
    ///
    /// Returns a growth error from [`Self::ensure_capacity`].
    pub fn select(&mut self, index: u32) -> Result<(), TspError> {
        self.ensure_capacity(bytes_to_hold(index))?;
        self.selection.set(index);
        Ok(())
    }

    /// Selects `index` and stores `value` in its slot.
    ///
    /// # Errors
    ///
    /// Returns `TspError::BadParameter` if `value` is not exactly one SHA-1
    /// digest long, or a growth error from [`Self::ensure_capacity`].
    pub fn set_value(&mut self, index: u32, value: &[u8]) -> Result<(), TspError> {
        let value: Sha1Digest = value.try_into().map_err(|_| {
            TspError::BadParameter(format!(
                "PCR value is {} bytes, expected {SHA1_DIGEST_LEN}",
                value.len()
            ))
        })?;
        self.ensure_capacity(bytes_to_hold(index))?;
        self.selection.set(index);
        self.values[index as usize] = value;
        Ok(())
    }

    /// Returns the stored value of `index`, selected or not.
    ///
    /// # Errors
    ///
    /// Returns `TspError::BadParameter` if the selection does not cover
    /// `index`.
    pub fn value(&self, index: u32) -> Result<&Sha1Digest, TspError> {
        if !self.selection.covers(index) {
            return Err(TspError::BadParameter(format!(
                "PCR {index} outside selection of {} bytes",
                self.selection.len()
            )));
        }
        self.values
            .get(index as usize)
            .ok_or_else(|| TspError::InternalError(format!("PCR {index} has no value slot")))
    }

    /// Computes the composite digest of the current state.
    ///
    /// # Errors
    ///
    /// See [`composite_digest`].
    pub fn digest(&self) -> Result<Sha1Digest, TspError> {
        composite_digest(&self.selection, &self.values)
    }
}

/// Builds the `TPM_PCR_COMPOSITE` blob of the selected values:
/// `u16 sizeOfSelect || pcrSelect || u32 valueSize || values`.
///
/// # Errors
///
/// Returns `TspError::InternalError` if nothing is selected, or a selected
/// index has no value.
pub fn composite_blob(selection: &PcrSelection, values: &[Sha1Digest]) -> Result<Vec<u8>, TspError> {
    if selection.is_empty() {
        return Err(TspError::InternalError("empty PCR selection".to_string()));
    }
    let mut writer =
        BlobWriter::with_capacity(2 + selection.len() + 4 + values.len() * SHA1_DIGEST_LEN)?;
    selection.load(&mut writer)?;
    let size_offset = writer.len();
    writer.write_u32(0);

    let mut count = 0;
    for index in selection.selected() {
        let value = values.get(index).ok_or_else(|| {
            TspError::InternalError(format!("PCR {index} selected without a value slot"))
        })?;
        writer.write_bytes(value);
        count += 1;
    }
    if count == 0 {
        return Err(TspError::InternalError("no PCRs selected".to_string()));
    }
    let value_size = count * SHA1_DIGEST_LEN;
    let value_size = u32::try_from(value_size).map_err(|_| BlobError::Overflow(value_size))?;
    writer.patch_u32(size_offset, value_size)?;
    Ok(writer.into_vec())
}

/// Computes the SHA-1 composite digest a TPM reconstructs for `selection`.
///
/// # Errors
///
/// See [`composite_blob`].
pub fn composite_digest(
    selection: &PcrSelection,
    values: &[Sha1Digest],
) -> Result<Sha1Digest, TspError> {
    let blob = composite_blob(selection, values)?;
    let mut digest = [0u8; SHA1_DIGEST_LEN];
    digest.copy_from_slice(&Sha1::digest(&blob));
    Ok(digest)
}

/// Unloads a `TPM_PCR_COMPOSITE` into its selection and concatenated values.
///
/// # Errors
///
/// Returns `TspError::Blob` if the blob is truncated and
/// `TspError::BadParameter` if `valueSize` disagrees with the selection.
pub fn unload_composite(reader: &mut BlobReader<'_>) -> Result<(PcrSelection, Vec<u8>), TspError> {
    let selection = PcrSelection::unload(reader)?;
    let values = reader.read_sized_u32()?;
    let expected = selection.selected_count() * SHA1_DIGEST_LEN;
    if values.len() != expected {
        return Err(TspError::BadParameter(format!(
            "composite carries {} value bytes, selection needs {expected}",
            values.len()
        )));
    }
    Ok((selection, values.to_vec()))
}
