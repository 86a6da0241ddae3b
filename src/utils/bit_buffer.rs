// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A growable, editable run of bits used to rewrite header syntax in place.

use crate::bitstream_utils::bits_to_u64;
use crate::bitstream_utils::encode_golomb_into;
use crate::bitstream_utils::BitBuf;
use crate::bitstream_utils::Bits;
use crate::bitstream_utils::BitstreamError;
use crate::bitstream_utils::BitstreamResult;

/// Mutable bit storage owned by exactly one header or slice segment.
///
/// None of the editing operations know about the [`crate::bitstream_utils::FieldTable`]
/// the owner recorded while parsing: offsets that lie after an edit point
/// must be recomputed by the owner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitBuffer {
    bits: BitBuf,
}

impl BitBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            bits: BitBuf::from_slice(data),
        }
    }

    pub fn from_bits(bits: &Bits) -> Self {
        Self {
            bits: bits.to_bitvec(),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bits.len() % 8 == 0
    }

    pub fn as_bits(&self) -> &Bits {
        &self.bits
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).map(|bit| *bit)
    }

    pub fn set(&mut self, index: usize, value: bool) -> BitstreamResult<()> {
        if index >= self.bits.len() {
            return Err(BitstreamError::OutOfBits(index));
        }

        self.bits.set(index, value);
        Ok(())
    }

    pub fn push(&mut self, value: bool) {
        self.bits.push(value);
    }

    /// Appends `value` as a `width`-bit big-endian field.
    pub fn push_bits(&mut self, value: u64, width: usize) -> BitstreamResult<()> {
        let field = field_bits(value, width)?;
        self.bits.extend_from_bitslice(&field);
        Ok(())
    }

    /// Appends the Exp-Golomb code of `value`.
    pub fn push_golomb(&mut self, value: u32) {
        encode_golomb_into(&mut self.bits, value);
    }

    pub fn extend_from_bits(&mut self, bits: &Bits) {
        self.bits.extend_from_bitslice(bits);
    }

    /// Reads `width` bits starting at `start` as an unsigned integer.
    pub fn read_bits(&self, start: usize, width: usize) -> BitstreamResult<u64> {
        if width > 64 {
            return Err(BitstreamError::ValueTooWide { value: 0, width });
        }

        self.bits
            .get(start..start + width)
            .map(bits_to_u64)
            .ok_or(BitstreamError::OutOfBits(self.bits.len()))
    }

    /// Overwrites `width` bits starting at `start` with `value`, without
    /// changing the length.
    pub fn set_bits(&mut self, start: usize, value: u64, width: usize) -> BitstreamResult<()> {
        let field = field_bits(value, width)?;
        let len = self.bits.len();
        let target = self
            .bits
            .get_mut(start..start + width)
            .ok_or(BitstreamError::OutOfBits(len))?;
        target.copy_from_bitslice(&field);
        Ok(())
    }

    /// Inserts `value` as a `width`-bit field at bit `at`, shifting everything
    /// after it.
    pub fn insert(&mut self, at: usize, value: u64, width: usize) -> BitstreamResult<()> {
        let field = field_bits(value, width)?;
        self.insert_bits(at, &field)
    }

    pub fn insert_bits(&mut self, at: usize, bits: &Bits) -> BitstreamResult<()> {
        self.replace(at, at, bits)
    }

    /// Removes the bits in `[start, end)` and splices `new_bits` in their
    /// place.
    pub fn replace(&mut self, start: usize, end: usize, new_bits: &Bits) -> BitstreamResult<()> {
        if start > end || end > self.bits.len() {
            return Err(BitstreamError::OutOfBits(end));
        }

        let tail = self.bits.split_off(end);
        self.bits.truncate(start);
        self.bits.extend_from_bitslice(new_bits);
        self.bits.extend_from_bitslice(&tail);

        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.bits.truncate(len);
    }

    /// Restores byte alignment after an edit: drops the trailing run of `pad`
    /// bits left over from the previous alignment, then appends `pad` bits up
    /// to the next byte boundary.
    ///
    /// For RBSP data ending in a stop bit this re-derives the trailing bits
    /// for the new length.
    pub fn byte_align(&mut self, pad: bool) {
        while self.bits.last().map(|bit| *bit) == Some(pad) {
            self.bits.pop();
        }

        while !self.is_byte_aligned() {
            self.bits.push(pad);
        }
    }

    /// Appends zero bits up to the next byte boundary, never removing any.
    pub fn byte_align_without_removal(&mut self) {
        while !self.is_byte_aligned() {
            self.bits.push(false);
        }
    }

    pub fn get_byte(&self, index: usize) -> BitstreamResult<u8> {
        self.read_bits(index * 8, 8).map(|b| b as u8)
    }

    pub fn set_byte(&mut self, index: usize, value: u8) -> BitstreamResult<()> {
        self.set_bits(index * 8, u64::from(value), 8)
    }

    /// Returns the buffer as bytes. The last byte is zero-padded if the
    /// buffer is not aligned.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits
            .chunks(8)
            .map(|chunk| (bits_to_u64(chunk) << (8 - chunk.len())) as u8)
            .collect()
    }
}

fn field_bits(value: u64, width: usize) -> BitstreamResult<BitBuf> {
    if width > 64 || (width < 64 && value >> width != 0) {
        return Err(BitstreamError::ValueTooWide { value, width });
    }

    Ok((0..width).rev().map(|bit| (value >> bit) & 1 == 1).collect())
}

#[cfg(test)]
mod tests {
    use bitvec::prelude::*;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn bytes_round_trip() {
        let buffer = BitBuffer::from_bytes(&[0xde, 0xad, 0x01]);
        assert_eq!(buffer.len(), 24);
        assert_eq!(buffer.get_byte(1).unwrap(), 0xad);
        assert_eq!(buffer.to_bytes(), vec![0xde, 0xad, 0x01]);
        assert_eq!(buffer.get_byte(3), Err(BitstreamError::OutOfBits(24)));
    }

    #[test]
    fn insert_shifts_tail() {
        let mut buffer = BitBuffer::from_bytes(&[0b1111_0000]);
        buffer.insert(4, 0b101, 3).unwrap();
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.read_bits(0, 11).unwrap(), 0b1111_101_0000);

        assert_eq!(
            buffer.insert(0, 4, 2),
            Err(BitstreamError::ValueTooWide { value: 4, width: 2 })
        );
    }

    #[test]
    fn replace_range() {
        let mut buffer = BitBuffer::from_bytes(&[0b1100_0011]);
        buffer.replace(2, 6, bits![u8, Msb0; 1]).unwrap();
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.read_bits(0, 5).unwrap(), 0b11111);

        assert!(buffer.replace(4, 9, BitBuffer::new().as_bits()).is_err());
    }

    #[test]
    fn set_and_get_bytes() {
        let mut buffer = BitBuffer::from_bytes(&[0, 0, 0]);
        buffer.set_byte(1, 120).unwrap();
        assert_eq!(buffer.to_bytes(), vec![0, 120, 0]);
        buffer.set_bits(4, 0b11, 2).unwrap();
        assert_eq!(buffer.get_byte(0).unwrap(), 0b0000_1100);
        assert_eq!(buffer.set_byte(3, 1), Err(BitstreamError::OutOfBits(24)));
        assert_eq!(
            buffer.set_bits(20, 0b101, 5),
            Err(BitstreamError::OutOfBits(24))
        );
        assert_eq!(buffer.to_bytes(), vec![0b0000_1100, 120, 0]);
    }

    #[test]
    fn byte_align_restores_trailing_bits() {
        // Stop bit followed by 3 zeros, then one bit inserted before it.
        let mut buffer = BitBuffer::from_bytes(&[0b1011_1000]);
        buffer.insert(1, 1, 1).unwrap();
        buffer.byte_align(false);
        assert_eq!(buffer.to_bytes(), vec![0b1101_1100]);

        // Pushing the stop bit into a new byte.
        let mut buffer = BitBuffer::from_bytes(&[0b1010_1011]);
        buffer.insert(0, 0, 1).unwrap();
        buffer.byte_align(false);
        assert_eq!(buffer.to_bytes(), vec![0b0101_0101, 0b1000_0000]);
    }

    #[test]
    fn byte_align_without_removal_only_appends() {
        let mut buffer = BitBuffer::new();
        buffer.push_bits(0b1000, 4).unwrap();
        buffer.byte_align_without_removal();
        assert_eq!(buffer.to_bytes(), vec![0b1000_0000]);
        buffer.byte_align_without_removal();
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn push_golomb_appends_code() {
        let mut buffer = BitBuffer::new();
        buffer.push(true);
        buffer.push_golomb(3);
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.read_bits(0, 6).unwrap(), 0b1_00100);
    }

    proptest! {
        #[test]
        fn insert_preserves_surrounding_bits(
            bytes in proptest::collection::vec(any::<u8>(), 0..16),
            at_seed in any::<usize>(),
            value in any::<u32>(),
            width in 1usize..=32,
        ) {
            let before = BitBuffer::from_bytes(&bytes);
            let at = at_seed % (before.len() + 1);
            let value = u64::from(value) & ((1u64 << width) - 1);

            let mut after = before.clone();
            after.insert(at, value, width).unwrap();

            prop_assert_eq!(after.len(), before.len() + width);
            prop_assert_eq!(&after.as_bits()[..at], &before.as_bits()[..at]);
            prop_assert_eq!(after.read_bits(at, width).unwrap(), value);
            prop_assert_eq!(&after.as_bits()[at + width..], &before.as_bits()[at..]);
        }

        #[test]
        fn replace_preserves_surrounding_bits(
            bytes in proptest::collection::vec(any::<u8>(), 1..16),
            start_seed in any::<usize>(),
            len_seed in any::<usize>(),
            new_bytes in proptest::collection::vec(any::<u8>(), 0..4),
        ) {
            let before = BitBuffer::from_bytes(&bytes);
            let start = start_seed % before.len();
            let end = start + len_seed % (before.len() - start + 1);
            let new_bits = BitBuffer::from_bytes(&new_bytes);

            let mut after = before.clone();
            after.replace(start, end, new_bits.as_bits()).unwrap();

            prop_assert_eq!(after.len(), before.len() - (end - start) + new_bits.len());
            prop_assert_eq!(&after.as_bits()[..start], &before.as_bits()[..start]);
            prop_assert_eq!(&after.as_bits()[start..start + new_bits.len()], new_bits.as_bits());
            prop_assert_eq!(&after.as_bits()[start + new_bits.len()..], &before.as_bits()[end..]);
        }

        #[test]
        fn byte_align_is_idempotent(
            bytes in proptest::collection::vec(any::<u8>(), 0..16),
            extra in 0usize..8,
            pad in any::<bool>(),
        ) {
            let mut buffer = BitBuffer::from_bytes(&bytes);
            for i in 0..extra {
                buffer.push(i % 2 == 0);
            }

            buffer.byte_align(pad);
            let once = buffer.clone();
            buffer.byte_align(pad);

            prop_assert!(once.is_byte_aligned());
            prop_assert_eq!(buffer, once);
        }
    }
}
