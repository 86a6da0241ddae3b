// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Video parameter set, 7.3.2.1.

use anyhow::Context;

use crate::bitstream_utils::BitCursor;
use crate::bitstream_utils::BitstreamError;
use crate::bitstream_utils::FieldKey;
use crate::bitstream_utils::FieldTable;
use crate::codec::h265::nalu::escape_unit;
use crate::codec::h265::nalu::NaluHeader;
use crate::codec::h265::ptl::skip_profile_tier_level;
use crate::codec::h265::ptl::Level;
use crate::utils::bit_buffer::BitBuffer;
use crate::utils::emulation::remove_emulation_prevention;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VpsField {
    MaxSubLayersMinus1,
    GeneralLevelIdcOffset,
}

impl FieldKey for VpsField {
    fn name(self) -> &'static str {
        match self {
            VpsField::MaxSubLayersMinus1 => "vps_max_sub_layers_minus1",
            VpsField::GeneralLevelIdcOffset => "general_level_idc_offset",
        }
    }
}

/// A H.265 Video Parameter Set, parsed up to its profile_tier_level( ).
#[derive(Clone, Debug)]
pub struct Vps {
    header: NaluHeader,
    bits: BitBuffer,
    fields: FieldTable<VpsField>,
}

impl Vps {
    pub fn parse(header: NaluHeader, data: &[u8]) -> anyhow::Result<Self> {
        let bits = BitBuffer::from_bytes(&remove_emulation_prevention(data));
        let fields = Self::parse_fields(&bits).context("while parsing VPS")?;

        Ok(Self {
            header,
            bits,
            fields,
        })
    }

    fn parse_fields(bits: &BitBuffer) -> anyhow::Result<FieldTable<VpsField>> {
        let mut c = BitCursor::new(bits.as_bits(), NaluHeader::LEN * 8);

        // vps_video_parameter_set_id, vps_base_layer_internal_flag,
        // vps_base_layer_available_flag, vps_max_layers_minus1
        c.skip_bits(4 + 1 + 1 + 6)?;
        let max_sub_layers_minus1 = c.collect_value(VpsField::MaxSubLayersMinus1, 3)?;
        // vps_temporal_id_nesting_flag, vps_reserved_0xffff_16bits
        c.skip_bits(1 + 16)?;
        skip_profile_tier_level(
            &mut c,
            max_sub_layers_minus1 as usize,
            VpsField::GeneralLevelIdcOffset,
        )?;

        Ok(c.into_fields())
    }

    pub fn header(&self) -> &NaluHeader {
        &self.header
    }

    pub fn max_sub_layers_minus1(&self) -> u8 {
        self.fields.get(VpsField::MaxSubLayersMinus1).unwrap_or(0) as u8
    }

    pub fn general_level_idc(&self) -> anyhow::Result<u8> {
        let offset = self.fields.offset(VpsField::GeneralLevelIdcOffset)?;
        Ok(self.bits.read_bits(offset, 8)? as u8)
    }

    /// Overwrites general_level_idc. The field is byte aligned and
    /// fixed-width, so nothing moves.
    pub fn set_general_level_indicator(&mut self, level: Level) -> anyhow::Result<()> {
        let offset = self.fields.offset(VpsField::GeneralLevelIdcOffset)?;
        if offset % 8 != 0 {
            return Err(BitstreamError::Unaligned(offset).into());
        }

        self.bits.set_byte(offset / 8, level.idc())?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        escape_unit(&self.bits)
    }
}
