// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

use tspi::Sha1Digest;

/// SHA-1 of "abc".
pub const D0: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";
/// SHA-1 of the empty string.
pub const D3: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
/// SHA-1 of "abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq".
pub const D9: &str = "84983e441c3bd26ebaae4aa1f95129e5e54670f1";

pub fn digest(s: &str) -> Sha1Digest {
    <[u8; 20]>::try_from(hex::decode(s).unwrap()).unwrap()
}
