// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Emulation prevention: the `0x03` escape bytes that keep a NAL payload from
//! containing a start code, and the start code marker itself.

use std::io::Write;

/// The 3-byte start code emitted in front of every NAL unit.
pub const NAL_MARKER: [u8; 3] = [0x00, 0x00, 0x01];

const EMULATION_PREVENTION_BYTE: u8 = 0x03;

/// Length of the run of zero bytes most recently written.
#[derive(Default)]
struct ZeroRun(usize);

impl ZeroRun {
    /// Accounts for `byte`. Returns whether an escape byte must precede it.
    fn next(&mut self, byte: u8) -> bool {
        let escape = self.0 >= 2 && byte <= EMULATION_PREVENTION_BYTE;
        if escape {
            self.0 = 0;
        }
        self.0 = if byte == 0 { self.0 + 1 } else { 0 };
        escape
    }
}

/// Wrapper over [`std::io::Write`] inserting emulation prevention bytes.
pub struct EmulationPrevention<W: Write> {
    out: W,
    zeros: ZeroRun,
}

impl<W: Write> EmulationPrevention<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: writer,
            zeros: ZeroRun::default(),
        }
    }

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        if self.zeros.next(byte) {
            self.out.write_all(&[EMULATION_PREVENTION_BYTE])?;
        }

        self.out.write_all(&[byte])
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Write for EmulationPrevention<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for byte in buf {
            self.write_byte(*byte)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

/// Strips emulation prevention bytes from `data`.
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;

    for byte in data {
        if zeros >= 2 && *byte == EMULATION_PREVENTION_BYTE {
            // We need another two zero bytes before another escape can happen.
            zeros = 0;
            continue;
        }

        out.push(*byte);
        zeros = if *byte == 0 { zeros + 1 } else { 0 };
    }

    out
}

/// Escapes the concatenation of `parts` and prefixes it with the start code
/// marker.
///
/// A unit ending in a zero byte (cabac_zero_words) gets a final `0x03`, so
/// the zero is not taken for the start of the next start code, 7.4.2.
pub fn add_emulation_prevention_and_marker(parts: &[&[u8]]) -> Vec<u8> {
    let len: usize = parts.iter().map(|part| part.len()).sum();
    let mut out = Vec::with_capacity(NAL_MARKER.len() + len + len / 64 + 1);
    out.extend_from_slice(&NAL_MARKER);

    let mut zeros = ZeroRun::default();
    for &byte in parts.iter().flat_map(|part| part.iter()) {
        if zeros.next(byte) {
            out.push(EMULATION_PREVENTION_BYTE);
        }
        out.push(byte);
    }

    if len > 0 && out.last() == Some(&0x00) {
        out.push(EMULATION_PREVENTION_BYTE);
    }

    out
}
