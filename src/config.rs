// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

use crate::error::TspError;
use std::env;

pub const ENV_FIRST_HANDLE: &str = "TSPI_FIRST_HANDLE";
pub const ENV_TRACE_COMPOSITE: &str = "TSPI_TRACE_COMPOSITE";

/// Stack-wide settings fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// First value handed out by the handle allocator. Zero is never issued.
    pub first_handle: u32,
    /// Dumps every PCR slot at trace level before a composite is hashed.
    pub trace_composite: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            first_handle: 1,
            trace_composite: false,
        }
    }
}

impl Config {
    /// Builds the default configuration and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `TspError::BadParameter` if a variable is set but malformed.
    pub fn from_env() -> Result<Self, TspError> {
        let mut config = Self::default();
        if let Ok(value) = env::var(ENV_FIRST_HANDLE) {
            config.first_handle = parse_handle(&value)?;
        }
        if let Ok(value) = env::var(ENV_TRACE_COMPOSITE) {
            config.trace_composite = parse_flag(&value)?;
        }
        Ok(config)
    }
}

/// Parses a handle value (decimal or hex with "0x" prefix).
///
/// # Errors
///
/// Returns `TspError::BadParameter` if the string is not an integer or is zero.
pub fn parse_handle(s: &str) -> Result<u32, TspError> {
    let value = if let Some(hex_val) = s.strip_prefix("0x") {
        u32::from_str_radix(hex_val, 16)
    } else {
        s.parse::<u32>()
    }
    .map_err(|e| TspError::BadParameter(format!("{ENV_FIRST_HANDLE}: '{s}': {e}")))?;
    if value == 0 {
        return Err(TspError::BadParameter(format!(
            "{ENV_FIRST_HANDLE}: handle zero is reserved"
        )));
    }
    Ok(value)
}

fn parse_flag(s: &str) -> Result<bool, TspError> {
    match s {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        _ => Err(TspError::BadParameter(format!(
            "{ENV_TRACE_COMPOSITE}: '{s}'"
        ))),
    }
}
