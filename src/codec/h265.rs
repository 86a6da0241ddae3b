// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.265 syntax needed to restitch tiles in the compressed domain.
//!
//! Parameter sets and slice segment headers are only parsed up to the syntax
//! elements the stitcher rewrites. Everything after them is carried over
//! bit-exact.

pub mod headers;
pub mod nalu;
pub mod pps;
pub mod ptl;
pub mod sei;
pub mod slice;
pub mod sps;
#[cfg(test)]
pub(crate) mod synthesizer;
pub mod vps;
