// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The active parameter sets SEI message, D.2.4.
//!
//! Sent ahead of a stitched stream whose PPS id changed, so decoders that keep
//! parameter sets across streams activate the new ones.

use crate::codec::h265::nalu::escape_unit;
use crate::codec::h265::nalu::NaluHeader;
use crate::codec::h265::nalu::NaluType;
use crate::utils::bit_buffer::BitBuffer;

const ACTIVE_PARAMETER_SETS: u64 = 129;
/// Size of the payload below, in bytes.
const PAYLOAD_SIZE: u64 = 2;

/// Builds the prefix SEI NALU, start code included.
pub fn active_parameter_sets_sei() -> anyhow::Result<Vec<u8>> {
    let mut bits = BitBuffer::new();
    NaluHeader::new(NaluType::PrefixSeiNut, 0, 1).write(&mut bits)?;

    bits.push_bits(ACTIVE_PARAMETER_SETS, 8)?;
    bits.push_bits(PAYLOAD_SIZE, 8)?;

    // active_video_parameter_set_id
    bits.push_bits(0, 4)?;
    // self_contained_cvs_flag, no_parameter_set_update_flag
    bits.push_bits(0, 2)?;
    // num_sps_ids_minus1
    bits.push_golomb(0);
    // active_seq_parameter_set_id[ 0 ]
    bits.push_golomb(0);
    // layer_sps_idx
    bits.push_golomb(0);

    // payload byte_alignment( ), then rbsp_trailing_bits( )
    bits.push(true);
    bits.byte_align_without_removal();
    bits.push(true);
    bits.byte_align_without_removal();

    Ok(escape_unit(&bits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h265::nalu::Nalu;

    #[test]
    fn sei_bytes() {
        let sei = active_parameter_sets_sei().unwrap();
        assert_eq!(
            sei,
            vec![0x00, 0x00, 0x01, 0x4e, 0x01, 0x81, 0x02, 0x03, 0xc0, 0x80]
        );

        let nalu = Nalu::load(&sei[3..], None).unwrap();
        assert_eq!(nalu.header().type_(), NaluType::PrefixSeiNut);
        assert_eq!(nalu.header().temporal_id_plus1(), 1);
    }
}
