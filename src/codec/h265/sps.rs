// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sequence parameter set, 7.3.2.2.
//!
//! Only the syntax elements up to sps_temporal_mvp_enabled_flag are parsed:
//! they are all the stitcher needs to rewrite the picture geometry, to size
//! slice segment addresses and to check the slice segments follow the tile
//! encoder's grammar.

use anyhow::anyhow;
use anyhow::Context;

use crate::bitstream_utils::encode_golombs;
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
use crate::Resolution;

/// CtbLog2SizeY may not exceed 6, i.e. 64x64 coding tree blocks.
const MAX_CTB_LOG2: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpsField {
    MaxSubLayersMinus1,
    GeneralLevelIdcOffset,
    ChromaFormatIdc,
    DimensionsOffset,
    PicWidthInLumaSamples,
    PicHeightInLumaSamples,
    ConformanceWindowFlagOffset,
    ConformanceWindowFlag,
    ConfWinLeftOffset,
    ConfWinRightOffset,
    ConfWinTopOffset,
    ConfWinBottomOffset,
    AfterConformanceWindowOffset,
    Log2MaxPicOrderCntLsbMinus4,
    SubLayerOrderingInfoPresentFlag,
    Log2MinLumaCodingBlockSizeMinus3,
    Log2DiffMaxMinLumaCodingBlockSize,
}

impl FieldKey for SpsField {
    fn name(self) -> &'static str {
        match self {
            SpsField::MaxSubLayersMinus1 => "sps_max_sub_layers_minus1",
            SpsField::GeneralLevelIdcOffset => "general_level_idc_offset",
            SpsField::ChromaFormatIdc => "chroma_format_idc",
            SpsField::DimensionsOffset => "dimensions_offset",
            SpsField::PicWidthInLumaSamples => "pic_width_in_luma_samples",
            SpsField::PicHeightInLumaSamples => "pic_height_in_luma_samples",
            SpsField::ConformanceWindowFlagOffset => "conformance_window_flag_offset",
            SpsField::ConformanceWindowFlag => "conformance_window_flag",
            SpsField::ConfWinLeftOffset => "conf_win_left_offset",
            SpsField::ConfWinRightOffset => "conf_win_right_offset",
            SpsField::ConfWinTopOffset => "conf_win_top_offset",
            SpsField::ConfWinBottomOffset => "conf_win_bottom_offset",
            SpsField::AfterConformanceWindowOffset => "after_conformance_window_offset",
            SpsField::Log2MaxPicOrderCntLsbMinus4 => "log2_max_pic_order_cnt_lsb_minus4",
            SpsField::SubLayerOrderingInfoPresentFlag => "sps_sub_layer_ordering_info_present_flag",
            SpsField::Log2MinLumaCodingBlockSizeMinus3 => "log2_min_luma_coding_block_size_minus3",
            SpsField::Log2DiffMaxMinLumaCodingBlockSize => {
                "log2_diff_max_min_luma_coding_block_size"
            }
        }
    }
}

/// The picture partitioned into coding tree units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CtuGrid {
    /// CtbLog2SizeY
    pub ctb_log2: u32,
    /// PicWidthInCtbsY
    pub width: u32,
    /// PicHeightInCtbsY
    pub height: u32,
}

impl CtuGrid {
    pub fn new(resolution: Resolution, ctb_log2: u32) -> anyhow::Result<Self> {
        if ctb_log2 > MAX_CTB_LOG2 {
            return Err(anyhow!("unsupported coding tree block size 2^{}", ctb_log2));
        }

        let ctb_size = 1u32 << ctb_log2;
        Ok(Self {
            ctb_log2,
            width: resolution.width.div_ceil(ctb_size),
            height: resolution.height.div_ceil(ctb_size),
        })
    }

    /// PicSizeInCtbsY
    pub fn size(&self) -> u32 {
        self.width.saturating_mul(self.height)
    }

    /// Width of slice_segment_address: Ceil( Log2( PicSizeInCtbsY ) ).
    pub fn address_bits(&self) -> usize {
        match self.size() {
            0 | 1 => 0,
            size => (u32::BITS - (size - 1).leading_zeros()) as usize,
        }
    }
}

/// Skips scaling_list_data( ), 7.3.4.
pub(crate) fn skip_scaling_list_data<K: FieldKey>(c: &mut BitCursor<K>) -> anyhow::Result<()> {
    for size_id in 0..4usize {
        let step = if size_id == 3 { 3 } else { 1 };
        for _ in (0..6).step_by(step) {
            // scaling_list_pred_mode_flag
            if !c.read_bit()? {
                // scaling_list_pred_matrix_id_delta
                c.skip_golomb()?;
                continue;
            }

            let coef_num = 64.min(1usize << (4 + (size_id << 1)));
            // scaling_list_dc_coef_minus8
            c.skip_golombs(usize::from(size_id > 1))?;
            // scaling_list_delta_coef
            c.skip_golombs(coef_num)?;
        }
    }

    Ok(())
}

/// A H.265 Sequence Parameter Set.
#[derive(Clone, Debug)]
pub struct Sps {
    header: NaluHeader,
    bits: BitBuffer,
    fields: FieldTable<SpsField>,
    grid: CtuGrid,
}

impl Sps {
    pub fn parse(header: NaluHeader, data: &[u8]) -> anyhow::Result<Self> {
        let bits = BitBuffer::from_bytes(&remove_emulation_prevention(data));
        let (fields, grid) = Self::parse_fields(&bits).context("while parsing SPS")?;

        Ok(Self {
            header,
            bits,
            fields,
            grid,
        })
    }

    fn parse_fields(bits: &BitBuffer) -> anyhow::Result<(FieldTable<SpsField>, CtuGrid)> {
        let mut c = BitCursor::new(bits.as_bits(), NaluHeader::LEN * 8);

        // sps_video_parameter_set_id
        c.skip_bits(4)?;
        let max_sub_layers_minus1 = c.collect_value(SpsField::MaxSubLayersMinus1, 3)?;
        // sps_temporal_id_nesting_flag
        c.skip_bits(1)?;
        skip_profile_tier_level(
            &mut c,
            max_sub_layers_minus1 as usize,
            SpsField::GeneralLevelIdcOffset,
        )?;

        // sps_seq_parameter_set_id
        c.skip_golomb()?;
        let chroma_format_idc = c.collect_golomb(SpsField::ChromaFormatIdc)?;
        // separate_colour_plane_flag. Slice segments always carry
        // slice_sao_chroma_flag and never colour_plane_id.
        if chroma_format_idc == 0 || (chroma_format_idc == 3 && c.read_bit()?) {
            return Err(anyhow!("pictures without chroma planes are not supported"));
        }

        c.mark_position(SpsField::DimensionsOffset)?;
        let width = c.collect_golomb(SpsField::PicWidthInLumaSamples)?;
        let height = c.collect_golomb(SpsField::PicHeightInLumaSamples)?;

        c.mark_position(SpsField::ConformanceWindowFlagOffset)?;
        if c.collect_flag(SpsField::ConformanceWindowFlag)? {
            c.collect_golomb(SpsField::ConfWinLeftOffset)?;
            c.collect_golomb(SpsField::ConfWinRightOffset)?;
            c.collect_golomb(SpsField::ConfWinTopOffset)?;
            c.collect_golomb(SpsField::ConfWinBottomOffset)?;
        }
        c.mark_position(SpsField::AfterConformanceWindowOffset)?;

        // bit_depth_luma_minus8, bit_depth_chroma_minus8
        c.skip_golombs(2)?;
        c.collect_golomb(SpsField::Log2MaxPicOrderCntLsbMinus4)?;

        // sps_max_dec_pic_buffering_minus1, sps_max_num_reorder_pics and
        // sps_max_latency_increase_plus1, for every sub-layer or only the
        // highest one.
        let ordering_entries = if c.collect_flag(SpsField::SubLayerOrderingInfoPresentFlag)? {
            max_sub_layers_minus1 as usize + 1
        } else {
            1
        };
        c.skip_golombs(3 * ordering_entries)?;

        let min_cb_log2_minus3 = c.collect_golomb(SpsField::Log2MinLumaCodingBlockSizeMinus3)?;
        let diff_max_min = c.collect_golomb(SpsField::Log2DiffMaxMinLumaCodingBlockSize)?;

        let ctb_log2 = min_cb_log2_minus3
            .checked_add(3)
            .and_then(|min_cb_log2| min_cb_log2.checked_add(diff_max_min))
            .ok_or(anyhow!("coding block size overflows"))?;
        let grid = CtuGrid::new(Resolution { width, height }, ctb_log2)?;

        // log2_min_luma_transform_block_size_minus2,
        // log2_diff_max_min_luma_transform_block_size,
        // max_transform_hierarchy_depth_inter and _intra
        c.skip_golombs(4)?;
        // scaling_list_enabled_flag, then sps_scaling_list_data_present_flag
        if c.read_bit()? && c.read_bit()? {
            skip_scaling_list_data(&mut c)?;
        }
        // amp_enabled_flag
        c.skip_bits(1)?;
        // Slice segments always carry slice_sao_luma_flag and
        // slice_sao_chroma_flag.
        if !c.read_bit()? {
            return Err(anyhow!("SPS without sample adaptive offset"));
        }
        // pcm_enabled_flag
        if c.read_bit()? {
            // pcm_sample_bit_depth_luma_minus1 and _chroma_minus1,
            // log2_min_pcm_luma_coding_block_size_minus3,
            // log2_diff_max_min_pcm_luma_coding_block_size,
            // pcm_loop_filter_disabled_flag
            c.skip_bits(8)?;
            c.skip_golombs(2)?;
            c.skip_bits(1)?;
        }

        // Slice segments select the RPS without coding an index.
        let num_short_term_ref_pic_sets = c.read_golomb()?;
        if num_short_term_ref_pic_sets != 1 {
            return Err(anyhow!(
                "{} short-term RPS in the SPS, expected 1",
                num_short_term_ref_pic_sets
            ));
        }
        // st_ref_pic_set( 0 ) cannot be predicted.
        let num_negative_pics = c.read_golomb()?;
        let num_positive_pics = c.read_golomb()?;
        for _ in 0..u64::from(num_negative_pics) + u64::from(num_positive_pics) {
            // delta_poc_sX_minus1, used_by_curr_pic_sX_flag
            c.skip_golomb()?;
            c.skip_bits(1)?;
        }

        if c.read_bit()? {
            return Err(anyhow!("long-term reference pictures are not supported"));
        }
        if c.read_bit()? {
            return Err(anyhow!("temporal motion vector prediction is not supported"));
        }

        Ok((c.into_fields(), grid))
    }

    /// Re-reads the fields after an edit moved them.
    fn reparse(&mut self) -> anyhow::Result<()> {
        let (fields, grid) =
            Self::parse_fields(&self.bits).context("while re-parsing rewritten SPS")?;
        self.fields = fields;
        self.grid = grid;
        Ok(())
    }

    pub fn header(&self) -> &NaluHeader {
        &self.header
    }

    fn value(&self, key: SpsField) -> u32 {
        // Every key read through here is recorded unconditionally by the
        // grammar.
        self.fields.get(key).unwrap_or(0) as u32
    }

    /// Coded picture size in luma samples.
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.value(SpsField::PicWidthInLumaSamples),
            height: self.value(SpsField::PicHeightInLumaSamples),
        }
    }

    pub fn chroma_format_idc(&self) -> u32 {
        self.value(SpsField::ChromaFormatIdc)
    }

    pub fn grid(&self) -> &CtuGrid {
        &self.grid
    }

    /// Width in bits of slice_segment_address.
    pub fn address_length_bits(&self) -> usize {
        self.grid.address_bits()
    }

    /// Width in bits of slice_pic_order_cnt_lsb.
    pub fn max_pic_order_bits(&self) -> usize {
        self.value(SpsField::Log2MaxPicOrderCntLsbMinus4) as usize + 4
    }

    /// The conformance window offsets (left, right, top, bottom), if any.
    pub fn conformance_window(&self) -> Option<[u32; 4]> {
        if !self.fields.flag(SpsField::ConformanceWindowFlag).ok()? {
            return None;
        }

        Some([
            self.value(SpsField::ConfWinLeftOffset),
            self.value(SpsField::ConfWinRightOffset),
            self.value(SpsField::ConfWinTopOffset),
            self.value(SpsField::ConfWinBottomOffset),
        ])
    }

    pub fn general_level_idc(&self) -> anyhow::Result<u8> {
        let offset = self.fields.offset(SpsField::GeneralLevelIdcOffset)?;
        Ok(self.bits.read_bits(offset, 8)? as u8)
    }

    pub fn set_general_level_indicator(&mut self, level: Level) -> anyhow::Result<()> {
        let offset = self.fields.offset(SpsField::GeneralLevelIdcOffset)?;
        if offset % 8 != 0 {
            return Err(BitstreamError::Unaligned(offset).into());
        }

        self.bits.set_byte(offset / 8, level.idc())?;
        Ok(())
    }

    /// Crops the `coded` picture down to `display`, centered horizontally and
    /// vertically. Does nothing when both are the same.
    pub fn set_conformance_window(
        &mut self,
        display: Resolution,
        coded: Resolution,
    ) -> anyhow::Result<()> {
        if display == coded {
            return Ok(());
        }

        if display.width > coded.width || display.height > coded.height {
            return Err(anyhow!(
                "display size {:?} exceeds coded size {:?}",
                display,
                coded
            ));
        }

        let window = encode_golombs(&[
            0,
            (coded.width - display.width) / 2,
            0,
            (coded.height - display.height) / 2,
        ]);

        let flag_offset = self.fields.offset(SpsField::ConformanceWindowFlagOffset)?;
        let start = flag_offset + 1;
        if self.fields.flag(SpsField::ConformanceWindowFlag)? {
            let end = self.fields.offset(SpsField::AfterConformanceWindowOffset)?;
            self.bits.replace(start, end, &window)?;
        } else {
            self.bits.set(flag_offset, true)?;
            self.bits.insert_bits(start, &window)?;
        }

        self.bits.byte_align(false);
        self.reparse()
    }

    /// Rewrites pic_width_in_luma_samples and pic_height_in_luma_samples.
    pub fn set_dimensions(&mut self, resolution: Resolution) -> anyhow::Result<()> {
        let start = self.fields.offset(SpsField::DimensionsOffset)?;
        let end = self.fields.offset(SpsField::ConformanceWindowFlagOffset)?;
        let dimensions = encode_golombs(&[resolution.width, resolution.height]);

        self.bits.replace(start, end, &dimensions)?;
        self.bits.byte_align(false);
        self.reparse()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        escape_unit(&self.bits)
    }
}
