// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! profile_tier_level( ), 7.3.3.

use enumn::N;

use crate::bitstream_utils::BitCursor;
use crate::bitstream_utils::BitstreamResult;
use crate::bitstream_utils::FieldKey;

/// general_profile_space through general_inbld_flag/reserved bit.
const PROFILE_BITS: usize = 88;
const LEVEL_BITS: usize = 8;
/// sub_layer_profile_present_flag and sub_layer_level_present_flag are
/// always padded to 8 entries when there are sub-layers.
const MAX_SUB_LAYERS: usize = 8;

/// H265 levels as defined by table A.8.
/// general_level_idc and sub_layer_level_idc[ OpTid ] shall be set equal to a
/// value of 30 times the level number specified in Table A.8
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    #[default]
    L1 = 30,
    L2 = 60,
    L2_1 = 63,
    L3 = 90,
    L3_1 = 93,
    L4 = 120,
    L4_1 = 123,
    L5 = 150,
    L5_1 = 153,
    L5_2 = 156,
    L6 = 180,
    L6_1 = 183,
    L6_2 = 186,
}

impl Level {
    /// The general_level_idc value.
    pub fn idc(self) -> u8 {
        self as u8
    }
}

/// Skips a profile_tier_level( 1, max_sub_layers_minus1 ) structure, marking
/// the bit offset of general_level_idc under `level_key`.
pub(crate) fn skip_profile_tier_level<K: FieldKey>(
    cursor: &mut BitCursor<K>,
    max_sub_layers_minus1: usize,
    level_key: K,
) -> BitstreamResult<()> {
    cursor.skip_bits(PROFILE_BITS)?;
    cursor.mark_position(level_key)?;
    cursor.skip_bits(LEVEL_BITS)?;

    let mut present = Vec::with_capacity(max_sub_layers_minus1);
    for _ in 0..max_sub_layers_minus1 {
        let profile_present = cursor.read_bit()?;
        let level_present = cursor.read_bit()?;
        present.push((profile_present, level_present));
    }

    if max_sub_layers_minus1 > 0 {
        // reserved_zero_2bits
        cursor.skip_bits(2 * (MAX_SUB_LAYERS - max_sub_layers_minus1))?;
    }

    for (profile_present, level_present) in present {
        cursor.skip_bits_if(PROFILE_BITS, profile_present)?;
        cursor.skip_bits_if(LEVEL_BITS, level_present)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bitvec::prelude::*;

    use super::*;
    use crate::bitstream_utils::BitBuf;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct LevelIdc;

    impl FieldKey for LevelIdc {
        fn name(self) -> &'static str {
            "general_level_idc"
        }
    }

    #[test]
    fn level_values() {
        assert_eq!(Level::L4.idc(), 120);
        assert_eq!(Level::n(93u8), Some(Level::L3_1));
        assert_eq!(Level::n(121u8), None);
        assert_eq!(Level::default(), Level::L1);
    }

    #[test]
    fn no_sub_layers() {
        let bits = bitvec![u8, Msb0; 0; 96];
        let mut cursor = BitCursor::new(&bits, 0);
        skip_profile_tier_level(&mut cursor, 0, LevelIdc).unwrap();

        assert_eq!(cursor.position(), 96);
        assert_eq!(cursor.fields().offset(LevelIdc).unwrap(), 88);
    }

    #[test]
    fn sub_layers_with_profile_and_level() {
        // Two sub-layers: the first carries both a profile and a level, the
        // second only a level.
        let mut bits = BitBuf::repeat(false, 96);
        bits.extend_from_bitslice(bits![u8, Msb0; 1, 1, 0, 1]);
        bits.extend_from_bitslice(&BitBuf::repeat(false, 12));
        bits.extend_from_bitslice(&BitBuf::repeat(false, 88 + 8 + 8));
        bits.push(true);

        let mut cursor = BitCursor::new(&bits, 0);
        skip_profile_tier_level(&mut cursor, 2, LevelIdc).unwrap();
        assert_eq!(cursor.num_bits_left(), 1);
    }

    #[test]
    fn truncated() {
        let bits = bitvec![u8, Msb0; 0; 90];
        let mut cursor = BitCursor::new(&bits, 0);
        assert!(skip_profile_tier_level(&mut cursor, 0, LevelIdc).is_err());
    }
}
