// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! PCR composite objects addressed by handle.
//!
//! Every operation resolves its handle through the PCR registry and holds the
//! registry lock only for the in-memory work. Device queries happen before the
//! lock is taken.
//!
//! Multi-index updates are applied one index at a time and are not rolled back
//! when a later index fails.

use crate::{
    blob::BlobReader,
    config::Config,
    context::{ContextAllocator, PcrCapability},
    error::TspError,
    pcr::{bytes_to_hold, unload_composite, PcrComposite, PcrSelection, Sha1Digest, SHA1_DIGEST_LEN},
    registry::{ContextHandle, Handle, HandleAllocator, Registry},
};
use log::{debug, trace, warn};
use std::sync::Arc;

#[derive(Debug)]
pub struct PcrObjects {
    registry: Registry<PcrComposite>,
    allocator: Arc<dyn ContextAllocator>,
    trace_composite: bool,
}

impl PcrObjects {
    #[must_use]
    pub fn new(
        handles: Arc<HandleAllocator>,
        allocator: Arc<dyn ContextAllocator>,
        config: &Config,
    ) -> Self {
        Self {
            registry: Registry::new("pcrs", handles),
            allocator,
            trace_composite: config.trace_composite,
        }
    }

    /// Creates an empty PCR object owned by `context`.
    ///
    /// # Errors
    ///
    /// Returns `TspError::OutOfMemory` if the object cannot be registered.
    pub fn add(&self, context: ContextHandle) -> Result<Handle, TspError> {
        self.registry.add(context, PcrComposite::new())
    }

    /// Destroys the object if `context` owns it.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle` if the handle is unknown or owned by
    /// another context.
    pub fn remove(&self, handle: Handle, context: ContextHandle) -> Result<(), TspError> {
        self.registry.remove(handle, context)
    }

    /// Destroys every PCR object of `context`.
    pub fn close_context(&self, context: ContextHandle) -> usize {
        self.registry.close_context(context)
    }

    #[must_use]
    pub fn is_pcrs(&self, handle: Handle) -> bool {
        self.registry.is_member(handle)
    }

    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle` if the handle is unknown.
    pub fn context(&self, handle: Handle) -> Result<ContextHandle, TspError> {
        self.registry.context_of(handle)
    }

    #[must_use]
    pub fn handles(&self, context: ContextHandle) -> Vec<Handle> {
        self.registry.handles(context)
    }

    /// Returns a copy of the selection bitmap, empty if nothing was ever
    /// selected.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle` or `TspError::OutOfMemory`.
    pub fn selection(&self, handle: Handle) -> Result<Vec<u8>, TspError> {
        let obj = self.registry.get(handle)?;
        let select = obj.payload.selection().as_bytes();
        if select.is_empty() {
            return Ok(Vec::new());
        }
        self.allocator.alloc_copy(obj.context, select)
    }

    /// Selects `index` without assigning a value.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle`, or a growth error.
    pub fn select_index(&self, handle: Handle, index: u32) -> Result<(), TspError> {
        let mut obj = self.registry.get(handle)?;
        obj.payload.select(index)
    }

    /// Selects `index` and stores `value` as its digest.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle`, `TspError::BadParameter` for a
    /// value that is not one SHA-1 digest, or a growth error.
    pub fn set_value(&self, handle: Handle, index: u32, value: &[u8]) -> Result<(), TspError> {
        let mut obj = self.registry.get(handle)?;
        obj.payload.set_value(index, value)
    }

    /// Applies one value per selected bit of `selection`, in wire order.
    ///
    /// Stops at the first failure; indices applied before it stay applied.
    ///
    /// # Errors
    ///
    /// Returns `TspError::BadParameter` if `values` holds fewer digests than
    /// `selection` selects, or the first error of [`Self::set_value`].
    pub fn set_values(
        &self,
        handle: Handle,
        selection: &PcrSelection,
        values: &[u8],
    ) -> Result<(), TspError> {
        let mut chunks = values.chunks_exact(SHA1_DIGEST_LEN);
        for index in selection.selected() {
            let value = chunks.next().ok_or_else(|| {
                TspError::BadParameter(format!("no value for selected PCR {index}"))
            })?;
            let index = u32::try_from(index)
                .map_err(|_| TspError::BadParameter(format!("PCR index {index} overflow")))?;
            self.set_value(handle, index, value)?;
        }
        Ok(())
    }

    /// Applies a `TPM_PCR_COMPOSITE` blob as returned by the TPM.
    ///
    /// # Errors
    ///
    /// Returns `TspError::Blob` for a truncated blob, `TspError::BadParameter`
    /// if its value size disagrees with its selection, or the first error of
    /// [`Self::set_values`].
    pub fn set_values_from_blob(&self, handle: Handle, blob: &[u8]) -> Result<(), TspError> {
        let mut reader = BlobReader::new(blob);
        let (selection, values) = unload_composite(&mut reader)?;
        if reader.remaining() > 0 {
            warn!(target: "tspi::pcrs", "{handle}: {} trailing bytes after composite", reader.remaining());
        }
        self.set_values(handle, &selection, &values)
    }

    /// Returns a copy of the digest stored at `index`.
    ///
    /// The selection must cover `index`; whether its bit is set is not
    /// checked.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle`, `TspError::BadParameter` if `index`
    /// lies beyond the selection, or `TspError::OutOfMemory`.
    pub fn value(&self, handle: Handle, index: u32) -> Result<Vec<u8>, TspError> {
        let obj = self.registry.get(handle)?;
        let value = obj.payload.value(index)?;
        self.allocator.alloc_copy(obj.context, value)
    }

    /// Computes the composite digest after widening the selection to cover
    /// `pcr_count` PCRs.
    ///
    /// A selection already wider than the device is hashed as it is; the
    /// device rejects it if it disagrees.
    ///
    /// # Errors
    ///
    /// Returns `TspError::InvalidHandle`, a growth error, or
    /// `TspError::InternalError` if no PCR is selected.
    pub fn composite(&self, handle: Handle, pcr_count: u32) -> Result<Sha1Digest, TspError> {
        if pcr_count == 0 {
            return Err(TspError::InternalError("device reports no PCRs".to_string()));
        }
        let (digest, snapshot) = {
            let mut obj = self.registry.get(handle)?;
            obj.payload.ensure_capacity(bytes_to_hold(pcr_count - 1))?;
            let snapshot = self.trace_composite.then(|| obj.payload.clone());
            (obj.payload.digest(), snapshot)
        };
        if let Some(pcrs) = snapshot {
            trace_pcrs(handle, &pcrs);
        }
        let digest = digest?;
        debug!(target: "tspi::pcrs", "{handle}: composite {}", hex::encode(digest));
        Ok(digest)
    }

    /// Queries the owning context's device for its PCR count and computes the
    /// composite digest with [`Self::composite`].
    ///
    /// # Errors
    ///
    /// Returns `TspError::InternalError` if the PCR count cannot be obtained,
    /// otherwise as [`Self::composite`].
    pub fn device_composite(
        &self,
        handle: Handle,
        device: &dyn PcrCapability,
    ) -> Result<Sha1Digest, TspError> {
        let context = self.context(handle)?;
        let pcr_count = device.pcr_count(context).map_err(|e| {
            TspError::InternalError(format!("PCR count for context {context}: {e}"))
        })?;
        self.composite(handle, pcr_count)
    }
}

fn trace_pcrs(handle: Handle, pcrs: &PcrComposite) {
    let selection = pcrs.selection();
    for (index, value) in pcrs.values().iter().enumerate().take(selection.pcr_capacity()) {
        let Ok(pcr) = u32::try_from(index) else {
            break;
        };
        if selection.is_selected(pcr) {
            trace!(target: "tspi::pcrs", "{handle}: PCR{index}: Selected {}", hex::encode(value));
        } else {
            trace!(target: "tspi::pcrs", "{handle}: PCR{index}: Not Selected");
        }
    }
}
