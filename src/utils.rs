// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Byte- and bit-level helpers shared by the codec parsers and the stitcher.

pub mod bit_buffer;
pub mod emulation;
pub mod nalu;
