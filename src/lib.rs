// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Compressed-domain stitching of H.265 tiles.
//!
//! Tiles of a video are encoded as independent streams. This crate merges
//! them into a single tiled H.265 stream by rewriting parameter sets and slice
//! segment headers only, without decoding any picture.
//!
//! The [`stitcher::Stitcher`] is the entry point. The parsers and editors it
//! is built on live in [`codec::h265`], and the bit-level tools in
//! [`bitstream_utils`] and [`utils`].

pub mod bitstream_utils;
pub mod codec;
pub mod stitcher;
pub mod utils;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}
