// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-level reading primitives shared by every header grammar.
//!
//! A [`BitCursor`] walks a de-escaped NAL unit one syntax element at a time and
//! records what it saw in a [`FieldTable`]: either the decoded value of a
//! syntax element, or the bit offset at which some element starts. Header
//! objects later use those offsets to splice new bits into their
//! [`crate::utils::bit_buffer::BitBuffer`].

use std::fmt;

use bitvec::prelude::BitSlice;
use bitvec::prelude::BitVec;
use bitvec::prelude::Msb0;
use thiserror::Error;

/// Bits of a de-escaped NAL unit, most significant bit of each byte first.
pub type Bits = BitSlice<u8, Msb0>;

/// Owned version of [`Bits`].
pub type BitBuf = BitVec<u8, Msb0>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitstreamError {
    #[error("ran out of bits at offset {0}")]
    OutOfBits(usize),
    #[error("exp-golomb code at offset {0} does not fit in 32 bits")]
    GolombOverflow(usize),
    #[error("expected bit {expected} at offset {offset}")]
    UnexpectedBit { offset: usize, expected: bool },
    #[error("field {0} was not recorded")]
    MissingField(&'static str),
    #[error("field {0} was recorded twice")]
    DuplicateField(&'static str),
    #[error("value {value} does not fit in {width} bits")]
    ValueTooWide { value: u64, width: usize },
    #[error("offset {0} is not byte aligned")]
    Unaligned(usize),
}

pub type BitstreamResult<T> = std::result::Result<T, BitstreamError>;

/// A syntax element or position a grammar records while parsing.
///
/// Every header grammar has its own closed set of keys, so a grammar can only
/// record and look up the names it defines.
pub trait FieldKey: Copy + PartialEq + fmt::Debug {
    /// Human-readable name, as it appears in the syntax tables.
    fn name(self) -> &'static str;
}

/// The values and offsets recorded while parsing one NAL unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldTable<K> {
    entries: Vec<(K, u64)>,
}

impl<K: FieldKey> Default for FieldTable<K> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
        }
    }
}

impl<K: FieldKey> FieldTable<K> {
    /// Records `value` under `key`. Keys are unique per parse.
    pub fn insert(&mut self, key: K, value: u64) -> BitstreamResult<()> {
        if self.contains(key) {
            return Err(BitstreamError::DuplicateField(key.name()));
        }

        self.entries.push((key, value));
        Ok(())
    }

    /// Records a derived value after a mutation, replacing any previous one.
    pub fn update(&mut self, key: K, value: u64) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: K) -> BitstreamResult<u64> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .ok_or(BitstreamError::MissingField(key.name()))
    }

    /// Looks up a recorded bit offset.
    pub fn offset(&self, key: K) -> BitstreamResult<usize> {
        self.get(key).map(|v| v as usize)
    }

    /// Looks up a recorded one-bit flag.
    pub fn flag(&self, key: K) -> BitstreamResult<bool> {
        self.get(key).map(|v| v != 0)
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A forward-only reader over a bit buffer that records a [`FieldTable`] as it
/// consumes a known syntax grammar.
pub struct BitCursor<'a, K> {
    bits: &'a Bits,
    position: usize,
    fields: FieldTable<K>,
}

impl<'a, K: FieldKey> BitCursor<'a, K> {
    /// Creates a cursor over `bits`, starting at bit `start`.
    pub fn new(bits: &'a Bits, start: usize) -> Self {
        Self {
            bits,
            position: start,
            fields: Default::default(),
        }
    }

    /// Current bit offset.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn num_bits_left(&self) -> usize {
        self.bits.len().saturating_sub(self.position)
    }

    pub fn fields(&self) -> &FieldTable<K> {
        &self.fields
    }

    /// Releases the borrow on the buffer, keeping what was recorded.
    pub fn into_fields(self) -> FieldTable<K> {
        self.fields
    }

    /// Value of a field collected earlier in this parse.
    pub fn value(&self, key: K) -> BitstreamResult<u64> {
        self.fields.get(key)
    }

    pub fn read_bit(&mut self) -> BitstreamResult<bool> {
        let bit = self
            .bits
            .get(self.position)
            .map(|bit| *bit)
            .ok_or(BitstreamError::OutOfBits(self.position))?;
        self.position += 1;
        Ok(bit)
    }

    /// Reads up to 64 bits as an unsigned big-endian integer.
    pub fn read_bits(&mut self, num_bits: usize) -> BitstreamResult<u64> {
        if num_bits > 64 {
            return Err(BitstreamError::ValueTooWide {
                value: 0,
                width: num_bits,
            });
        }

        let end = self.position + num_bits;
        let slice = self
            .bits
            .get(self.position..end)
            .ok_or(BitstreamError::OutOfBits(self.bits.len()))?;
        self.position = end;

        Ok(bits_to_u64(slice))
    }

    /// Decodes one unsigned Exp-Golomb value.
    pub fn read_golomb(&mut self) -> BitstreamResult<u32> {
        decode_golomb(self)
    }

    pub fn skip_bits(&mut self, num_bits: usize) -> BitstreamResult<()> {
        let end = self.position + num_bits;
        if end > self.bits.len() {
            return Err(BitstreamError::OutOfBits(self.bits.len()));
        }

        self.position = end;
        Ok(())
    }

    /// Skips `num_bits` only when `present` is set.
    pub fn skip_bits_if(&mut self, num_bits: usize, present: bool) -> BitstreamResult<()> {
        if present {
            self.skip_bits(num_bits)?;
        }
        Ok(())
    }

    /// Consumes one bit that the grammar requires to equal `expected`.
    pub fn expect_bit(&mut self, expected: bool) -> BitstreamResult<()> {
        let offset = self.position;
        if self.read_bit()? != expected {
            return Err(BitstreamError::UnexpectedBit { offset, expected });
        }
        Ok(())
    }

    pub fn skip_golomb(&mut self) -> BitstreamResult<()> {
        self.read_golomb().map(|_| ())
    }

    pub fn skip_golombs(&mut self, count: usize) -> BitstreamResult<()> {
        for _ in 0..count {
            self.skip_golomb()?;
        }
        Ok(())
    }

    /// Skips `count` Exp-Golomb values when the previously collected `flag` is
    /// set.
    pub fn skip_golombs_if(&mut self, flag: K, count: usize) -> BitstreamResult<()> {
        if self.fields.flag(flag)? {
            self.skip_golombs(count)?;
        }
        Ok(())
    }

    /// Reads `width` bits and records them under `key`.
    pub fn collect_value(&mut self, key: K, width: usize) -> BitstreamResult<u64> {
        let value = self.read_bits(width)?;
        self.fields.insert(key, value)?;
        Ok(value)
    }

    pub fn collect_flag(&mut self, key: K) -> BitstreamResult<bool> {
        self.collect_value(key, 1).map(|v| v != 0)
    }

    pub fn collect_golomb(&mut self, key: K) -> BitstreamResult<u32> {
        let value = self.read_golomb()?;
        self.fields.insert(key, u64::from(value))?;
        Ok(value)
    }

    /// Records the current bit offset under `key` without consuming anything.
    pub fn mark_position(&mut self, key: K) -> BitstreamResult<()> {
        self.fields.insert(key, self.position as u64)
    }

    /// Advances to the next byte boundary. When `fill` is given, the skipped
    /// bits must all equal it.
    pub fn byte_align(&mut self, fill: Option<bool>) -> BitstreamResult<()> {
        while self.position % 8 != 0 {
            match fill {
                Some(expected) => self.expect_bit(expected)?,
                None => self.skip_bits(1)?,
            }
        }
        Ok(())
    }

    /// Skips the entry point block of a slice segment header:
    /// `num_entry_point_offsets` and, when non-zero, `offset_len_minus1`
    /// followed by the offsets themselves.
    pub fn skip_entry_point_offsets(&mut self, present: bool) -> BitstreamResult<()> {
        if !present {
            return Ok(());
        }

        let num_entry_point_offsets = self.read_golomb()? as usize;
        if num_entry_point_offsets > 0 {
            let offset_len = self.read_golomb()? as usize + 1;
            self.skip_bits(num_entry_point_offsets * offset_len)?;
        }

        Ok(())
    }
}

/// Folds a run of bits into an unsigned integer, first bit most significant.
pub(crate) fn bits_to_u64(bits: &Bits) -> u64 {
    bits.iter()
        .by_vals()
        .fold(0u64, |acc, bit| (acc << 1) | u64::from(bit))
}

/// Appends the unsigned Exp-Golomb code of `value` to `out`: as many zero bits
/// as `value + 1` has bits after its leading one, then `value + 1` itself.
pub fn encode_golomb_into(out: &mut BitBuf, value: u32) {
    let value = u64::from(value) + 1;
    let bits = 64 - value.leading_zeros() as usize;

    for _ in 0..bits - 1 {
        out.push(false);
    }
    for bit in (0..bits).rev() {
        out.push((value >> bit) & 1 == 1);
    }
}

/// Encodes `values` in order as concatenated Exp-Golomb codes.
pub fn encode_golombs(values: &[u32]) -> BitBuf {
    let mut out = BitBuf::new();
    for value in values {
        encode_golomb_into(&mut out, *value);
    }
    out
}

/// Number of bits the Exp-Golomb code of `value` occupies.
pub fn golomb_len(value: u32) -> usize {
    let value = u64::from(value) + 1;
    2 * (64 - value.leading_zeros() as usize) - 1
}

/// Decodes one unsigned Exp-Golomb value, advancing `cursor` exactly past the
/// bits consumed.
pub fn decode_golomb<K: FieldKey>(cursor: &mut BitCursor<K>) -> BitstreamResult<u32> {
    let start = cursor.position();
    let mut num_zeros = 0;

    while !cursor.read_bit()? {
        num_zeros += 1;
        if num_zeros > 31 {
            return Err(BitstreamError::GolombOverflow(start));
        }
    }

    let suffix = cursor.read_bits(num_zeros)?;
    let value = ((1u64 << num_zeros) - 1) + suffix;

    u32::try_from(value).map_err(|_| BitstreamError::GolombOverflow(start))
}
