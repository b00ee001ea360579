// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

use thiserror::Error;

/// Failures while loading or unloading TPM 1.2 wire blobs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob underflow: {needed} bytes needed, {available} available")]
    Underflow { needed: usize, available: usize },

    #[error("length {0} does not fit its wire field")]
    Overflow(usize),
}

/// Errors returned by every service provider operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TspError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid handle")]
    InvalidHandle,

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("blob: {0}")]
    Blob(#[from] BlobError),

    #[error("transport: {0}")]
    Transport(String),
}

impl From<std::collections::TryReserveError> for TspError {
    fn from(_: std::collections::TryReserveError) -> Self {
        TspError::OutOfMemory
    }
}
