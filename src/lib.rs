// SPDX-License-Identifier: GPL-3-0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

#![deny(clippy::all)]
#![deny(clippy::pedantic)]

pub mod blob;
pub mod config;
pub mod context;
pub mod error;
pub mod mocktpm;
pub mod pcr;
pub mod pcrs;
pub mod registry;
pub mod tick;

pub use crate::{
    config::Config,
    context::{ContextAllocator, HeapAllocator, PcrCapability},
    error::{BlobError, TspError},
    pcr::{PcrComposite, PcrSelection, Sha1Digest, SHA1_DIGEST_LEN},
    pcrs::PcrObjects,
    registry::{ContextHandle, Handle, HandleAllocator},
};

use log::debug;
use std::sync::Arc;

/// The service provider's object store.
///
/// One value is built per process and owns every object registry; the
/// registries share a single handle space.
#[derive(Debug)]
pub struct Tspi {
    config: Config,
    handles: Arc<HandleAllocator>,
    pub pcrs: PcrObjects,
}

impl Tspi {
    /// Builds a stack that hands out plain heap buffers.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_allocator(config, Arc::new(HeapAllocator))
    }

    /// Builds a stack whose returned buffers come from `allocator`.
    #[must_use]
    pub fn with_allocator(config: Config, allocator: Arc<dyn ContextAllocator>) -> Self {
        debug!(target: "tspi", "first handle {:#010x}", config.first_handle);
        let handles = Arc::new(HandleAllocator::new(config.first_handle));
        let pcrs = PcrObjects::new(handles.clone(), allocator, &config);
        Self {
            config,
            handles,
            pcrs,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn handles(&self) -> &Arc<HandleAllocator> {
        &self.handles
    }

    /// Frees every object `context` owns, across all object types.
    pub fn close_context(&self, context: ContextHandle) -> usize {
        self.pcrs.close_context(context)
    }
}
