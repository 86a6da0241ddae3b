// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Picture parameter set, 7.3.2.3.

use anyhow::anyhow;
use anyhow::Context;

use crate::bitstream_utils::encode_golombs;
use crate::bitstream_utils::golomb_len;
use crate::bitstream_utils::BitCursor;
use crate::bitstream_utils::FieldKey;
use crate::bitstream_utils::FieldTable;
use crate::codec::h265::nalu::escape_unit;
use crate::codec::h265::nalu::NaluHeader;
use crate::codec::h265::sps::skip_scaling_list_data;
use crate::stitcher::context::TileLayout;
use crate::stitcher::context::MAX_PPS_ID;
use crate::utils::bit_buffer::BitBuffer;
use crate::utils::emulation::remove_emulation_prevention;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PpsField {
    PpsIdOffset,
    PpsId,
    DependentSliceSegmentsEnabledFlag,
    OutputFlagPresentOffset,
    OutputFlagPresentFlag,
    NumExtraSliceHeaderBits,
    CabacInitPresentFlag,
    CuQpDeltaEnabledFlag,
    TilesEnabledOffset,
    TilesEnabledFlag,
    EntropyCodingSyncEnabledFlag,
    TileDimensionsOffset,
}

impl FieldKey for PpsField {
    fn name(self) -> &'static str {
        match self {
            PpsField::PpsIdOffset => "pps_id_offset",
            PpsField::PpsId => "pps_pic_parameter_set_id",
            PpsField::DependentSliceSegmentsEnabledFlag => "dependent_slice_segments_enabled_flag",
            PpsField::OutputFlagPresentOffset => "output_flag_present_offset",
            PpsField::OutputFlagPresentFlag => "output_flag_present_flag",
            PpsField::NumExtraSliceHeaderBits => "num_extra_slice_header_bits",
            PpsField::CabacInitPresentFlag => "cabac_init_present_flag",
            PpsField::CuQpDeltaEnabledFlag => "cu_qp_delta_enabled_flag",
            PpsField::TilesEnabledOffset => "tiles_enabled_flag_offset",
            PpsField::TilesEnabledFlag => "tiles_enabled_flag",
            PpsField::EntropyCodingSyncEnabledFlag => "entropy_coding_sync_enabled_flag",
            PpsField::TileDimensionsOffset => "tile_dimensions_offset",
        }
    }
}

/// The PPS syntax elements that shape a slice segment header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PpsFlags {
    pub dependent_slice_segments_enabled: bool,
    pub output_flag_present: bool,
    pub num_extra_slice_header_bits: u8,
    pub cabac_init_present: bool,
    /// tiles_enabled_flag || entropy_coding_sync_enabled_flag
    pub entry_point_offsets_present: bool,
}

/// A H.265 Picture Parameter Set, parsed up to the slice segment header
/// extension flag.
#[derive(Clone, Debug)]
pub struct Pps {
    header: NaluHeader,
    bits: BitBuffer,
    fields: FieldTable<PpsField>,
    /// The flags as they were in the tile stream. Slices from that stream
    /// were encoded against these, whatever the rewritten PPS says.
    source: PpsFlags,
}

impl Pps {
    pub fn parse(header: NaluHeader, data: &[u8]) -> anyhow::Result<Self> {
        let bits = BitBuffer::from_bytes(&remove_emulation_prevention(data));
        let fields = Self::parse_fields(&bits).context("while parsing PPS")?;
        let source = Self::flags_from(&fields)?;

        Ok(Self {
            header,
            bits,
            fields,
            source,
        })
    }

    fn parse_fields(bits: &BitBuffer) -> anyhow::Result<FieldTable<PpsField>> {
        let mut c = BitCursor::new(bits.as_bits(), NaluHeader::LEN * 8);

        c.mark_position(PpsField::PpsIdOffset)?;
        c.collect_golomb(PpsField::PpsId)?;
        // pps_seq_parameter_set_id
        c.skip_golomb()?;
        c.collect_flag(PpsField::DependentSliceSegmentsEnabledFlag)?;
        c.mark_position(PpsField::OutputFlagPresentOffset)?;
        c.collect_flag(PpsField::OutputFlagPresentFlag)?;
        c.collect_value(PpsField::NumExtraSliceHeaderBits, 3)?;
        // sign_data_hiding_enabled_flag
        c.skip_bits(1)?;
        c.collect_flag(PpsField::CabacInitPresentFlag)?;

        // num_ref_idx_l0_default_active_minus1,
        // num_ref_idx_l1_default_active_minus1, init_qp_minus26
        c.skip_golombs(3)?;
        // constrained_intra_pred_flag, transform_skip_enabled_flag
        c.skip_bits(2)?;
        c.collect_flag(PpsField::CuQpDeltaEnabledFlag)?;
        // diff_cu_qp_delta_depth
        c.skip_golombs_if(PpsField::CuQpDeltaEnabledFlag, 1)?;
        // pps_cb_qp_offset, pps_cr_qp_offset
        c.skip_golombs(2)?;
        if c.read_bit()? {
            return Err(anyhow!("slice chroma QP offsets are not supported"));
        }
        // weighted_pred_flag, weighted_bipred_flag
        if c.read_bits(2)? != 0 {
            return Err(anyhow!("weighted prediction is not supported"));
        }
        // transquant_bypass_enabled_flag
        c.skip_bits(1)?;

        c.mark_position(PpsField::TilesEnabledOffset)?;
        let tiles_enabled = c.collect_flag(PpsField::TilesEnabledFlag)?;
        c.collect_flag(PpsField::EntropyCodingSyncEnabledFlag)?;
        c.mark_position(PpsField::TileDimensionsOffset)?;

        if tiles_enabled {
            let cols_minus1 = c.read_golomb()?;
            let rows_minus1 = c.read_golomb()?;
            // uniform_spacing_flag
            if !c.read_bit()? {
                // column_width_minus1, row_height_minus1
                c.skip_golombs(cols_minus1 as usize)?;
                c.skip_golombs(rows_minus1 as usize)?;
            }
            // loop_filter_across_tiles_enabled_flag
            c.skip_bits(1)?;
        }

        // Slice segments always carry
        // slice_loop_filter_across_slices_enabled_flag.
        if !c.read_bit()? {
            return Err(anyhow!("loop filter across slices must be enabled"));
        }
        if c.read_bit()? {
            return Err(anyhow!("deblocking filter control is not supported"));
        }
        // pps_scaling_list_data_present_flag
        if c.read_bit()? {
            skip_scaling_list_data(&mut c)?;
        }
        if c.read_bit()? {
            return Err(anyhow!("reference list modification is not supported"));
        }
        // log2_parallel_merge_level_minus2
        c.skip_golomb()?;
        if c.read_bit()? {
            return Err(anyhow!("slice segment header extensions are not supported"));
        }

        Ok(c.into_fields())
    }

    fn flags_from(fields: &FieldTable<PpsField>) -> anyhow::Result<PpsFlags> {
        Ok(PpsFlags {
            dependent_slice_segments_enabled: fields
                .flag(PpsField::DependentSliceSegmentsEnabledFlag)?,
            output_flag_present: fields.flag(PpsField::OutputFlagPresentFlag)?,
            num_extra_slice_header_bits: fields.get(PpsField::NumExtraSliceHeaderBits)? as u8,
            cabac_init_present: fields.flag(PpsField::CabacInitPresentFlag)?,
            entry_point_offsets_present: fields.flag(PpsField::TilesEnabledFlag)?
                || fields.flag(PpsField::EntropyCodingSyncEnabledFlag)?,
        })
    }

    fn reparse(&mut self) -> anyhow::Result<()> {
        self.fields = Self::parse_fields(&self.bits).context("while re-parsing rewritten PPS")?;
        Ok(())
    }

    pub fn header(&self) -> &NaluHeader {
        &self.header
    }

    /// The flags slices of the original tile stream were encoded against.
    pub fn source_flags(&self) -> PpsFlags {
        self.source
    }

    pub fn pps_id(&self) -> u32 {
        self.fields.get(PpsField::PpsId).unwrap_or(0) as u32
    }

    fn flag(&self, key: PpsField) -> bool {
        self.fields.flag(key).unwrap_or(false)
    }

    pub fn tiles_enabled(&self) -> bool {
        self.flag(PpsField::TilesEnabledFlag)
    }

    pub fn has_entry_point_offsets(&self) -> bool {
        self.tiles_enabled() || self.flag(PpsField::EntropyCodingSyncEnabledFlag)
    }

    pub fn cabac_init_present(&self) -> bool {
        self.flag(PpsField::CabacInitPresentFlag)
    }

    pub fn output_flag_present(&self) -> bool {
        self.flag(PpsField::OutputFlagPresentFlag)
    }

    /// Encodes the tile syntax that follows entropy_coding_sync_enabled_flag.
    fn tile_syntax(layout: &TileLayout, loop_filter_across_tiles: bool) -> BitBuffer {
        let mut values = vec![layout.cols() - 1, layout.rows() - 1];
        let mut block = BitBuffer::from_bits(&encode_golombs(&values));
        block.push(layout.is_uniform());

        if !layout.is_uniform() {
            // The last column and row are implied.
            values.clear();
            values.extend(
                layout.col_widths()[..layout.cols() as usize - 1]
                    .iter()
                    .map(|width| width - 1),
            );
            values.extend(
                layout.row_heights()[..layout.rows() as usize - 1]
                    .iter()
                    .map(|height| height - 1),
            );
            block.extend_from_bits(&encode_golombs(&values));
        }

        block.push(loop_filter_across_tiles);
        block
    }

    /// Enables tiles and inserts the tile grid of `layout`.
    ///
    /// Tiles may only be enabled once. Repeating the call with the same
    /// layout is a no-op; any other layout is an error.
    pub fn set_tile_dimensions(
        &mut self,
        layout: &TileLayout,
        loop_filter_across_tiles: bool,
    ) -> anyhow::Result<()> {
        if layout.tile_count() < 2 {
            return Err(anyhow!("a tiled PPS needs more than one tile"));
        }

        let block = Self::tile_syntax(layout, loop_filter_across_tiles);
        let at = self.fields.offset(PpsField::TileDimensionsOffset)?;

        if self.tiles_enabled() {
            let existing = self.bits.as_bits().get(at..at + block.len());
            if existing == Some(block.as_bits()) {
                return Ok(());
            }
            return Err(anyhow!("tiles are already enabled with a different grid"));
        }

        let flag = self.fields.offset(PpsField::TilesEnabledOffset)?;
        self.bits.set(flag, true)?;
        self.bits.insert_bits(at, block.as_bits())?;
        self.bits.byte_align(false);
        self.reparse()
    }

    /// Replaces pps_pic_parameter_set_id.
    pub fn set_pps_id(&mut self, pps_id: u32) -> anyhow::Result<()> {
        if pps_id >= MAX_PPS_ID {
            return Err(anyhow!("pps id {} out of range", pps_id));
        }

        let current = self.pps_id();
        if current == pps_id {
            return Ok(());
        }

        let start = self.fields.offset(PpsField::PpsIdOffset)?;
        self.bits
            .replace(start, start + golomb_len(current), &encode_golombs(&[pps_id]))?;
        self.bits.byte_align(false);
        self.reparse()
    }

    /// Sets output_flag_present_flag so slices carry a pic_output_flag.
    /// Returns whether the flag was previously clear.
    pub fn enable_output_flag_present(&mut self) -> anyhow::Result<bool> {
        if self.output_flag_present() {
            return Ok(false);
        }

        let offset = self.fields.offset(PpsField::OutputFlagPresentOffset)?;
        self.bits.set(offset, true)?;
        self.reparse()?;
        Ok(true)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        escape_unit(&self.bits)
    }
}
