// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Writes the NAL units of a tile stream, as produced by the tile encoder, for
//! tests: one independent slice segment per picture, SAO on, a single
//! short-term RPS in the SPS and no long-term references.

use std::io::Write;

use crate::codec::h265::headers::ParameterSets;
use crate::codec::h265::nalu::NaluHeader;
use crate::codec::h265::nalu::NaluType;
use crate::codec::h265::ptl::Level;
use crate::utils::bit_buffer::BitBuffer;
use crate::utils::emulation::EmulationPrevention;

/// Slice types, Table 7-7.
const SLICE_TYPE_P: u32 = 1;
const SLICE_TYPE_I: u32 = 2;

/// A bit writer for one NAL unit.
struct Writer(BitBuffer);

impl Writer {
    fn new(type_: NaluType) -> Self {
        let mut bits = BitBuffer::new();
        NaluHeader::new(type_, 0, 1).write(&mut bits).unwrap();
        Self(bits)
    }

    fn u(&mut self, bits: usize, value: u32) -> &mut Self {
        self.0.push_bits(u64::from(value), bits).unwrap();
        self
    }

    fn flag(&mut self, value: bool) -> &mut Self {
        self.0.push(value);
        self
    }

    fn ue(&mut self, value: u32) -> &mut Self {
        self.0.push_golomb(value);
        self
    }

    fn se(&mut self, value: i32) -> &mut Self {
        let mapped = if value > 0 {
            2 * value as u32 - 1
        } else {
            2 * value.unsigned_abs()
        };
        self.ue(mapped)
    }

    /// byte_alignment( ) or rbsp_trailing_bits( ).
    fn align(&mut self) -> &mut Self {
        self.0.push(true);
        self.0.byte_align_without_removal();
        self
    }

    /// The escaped unit, without start code.
    fn finish(&self, payload: &[u8]) -> Vec<u8> {
        let mut writer = EmulationPrevention::new(Vec::new());
        writer.write_all(&self.0.to_bytes()).unwrap();
        writer.write_all(payload).unwrap();
        writer.into_inner()
    }
}

/// Settings of a synthetic tile encoder.
#[derive(Clone, Debug)]
pub struct TileEncoder {
    pub width: u32,
    pub height: u32,
    pub chroma_format_idc: u32,
    pub log2_min_cb_minus3: u32,
    pub log2_diff_max_min_cb: u32,
    pub log2_max_poc_lsb_minus4: u32,
    pub max_sub_layers_minus1: u8,
    pub sub_layer_ordering_info: bool,
    pub conformance_window: Option<[u32; 4]>,
    pub level: Level,
    pub pps_id: u32,
    pub dependent_slice_segments: bool,
    pub output_flag_present: bool,
    pub num_extra_slice_header_bits: u8,
    pub cabac_init_present: bool,
    pub cu_qp_delta: bool,
    pub entropy_coding_sync: bool,
    /// Explicit scaling lists in both the SPS and the PPS.
    pub scaling_lists: bool,
    pub sample_adaptive_offset: bool,
    pub num_short_term_ref_pic_sets: u32,
    pub long_term_ref_pics: bool,
    pub temporal_mvp: bool,
    /// Marks the slice data of this tile.
    pub tag: u8,
}

impl Default for TileEncoder {
    fn default() -> Self {
        Self {
            width: 320,
            height: 256,
            chroma_format_idc: 1,
            log2_min_cb_minus3: 0,
            log2_diff_max_min_cb: 3,
            log2_max_poc_lsb_minus4: 4,
            max_sub_layers_minus1: 0,
            sub_layer_ordering_info: true,
            conformance_window: None,
            level: Level::L3,
            pps_id: 0,
            dependent_slice_segments: false,
            output_flag_present: false,
            num_extra_slice_header_bits: 0,
            cabac_init_present: false,
            cu_qp_delta: false,
            entropy_coding_sync: false,
            scaling_lists: false,
            sample_adaptive_offset: true,
            num_short_term_ref_pic_sets: 1,
            long_term_ref_pics: false,
            temporal_mvp: false,
            tag: 0xa0,
        }
    }
}

impl TileEncoder {
    fn profile_tier_level(&self, w: &mut Writer) {
        // general_profile_space, general_tier_flag, general_profile_idc (Main)
        w.u(2, 0).flag(false).u(5, 1);
        // general_profile_compatibility_flag[ 1 ] and [ 2 ]
        w.u(32, 0x6000_0000);
        // progressive, interlaced, non_packed, frame_only
        w.flag(true).flag(false).flag(false).flag(true);
        // general_reserved_zero_43bits, general_inbld_flag
        w.u(32, 0).u(11, 0).flag(false);
        w.u(8, u32::from(self.level.idc()));

        let sub_layers = usize::from(self.max_sub_layers_minus1);
        for _ in 0..sub_layers {
            // sub_layer_profile_present_flag, sub_layer_level_present_flag
            w.flag(false).flag(true);
        }
        if sub_layers > 0 {
            for _ in sub_layers..8 {
                w.u(2, 0);
            }
        }
        for _ in 0..sub_layers {
            w.u(8, u32::from(self.level.idc()));
        }
    }

    fn sub_layer_ordering_info(&self, w: &mut Writer) {
        let entries = if self.sub_layer_ordering_info {
            u32::from(self.max_sub_layers_minus1) + 1
        } else {
            1
        };
        w.flag(self.sub_layer_ordering_info);
        for _ in 0..entries {
            // max_dec_pic_buffering_minus1, max_num_reorder_pics,
            // max_latency_increase_plus1
            w.ue(1).ue(0).ue(0);
        }
    }

    /// scaling_list_data( ) with an explicit 4x4 and 16x16 intra luma list,
    /// every other list copied from its default.
    fn scaling_list_data(w: &mut Writer) {
        for size_id in 0..4 {
            let matrices = if size_id == 3 { 2 } else { 6 };
            for matrix_id in 0..matrices {
                let explicit = matrix_id == 0 && (size_id == 0 || size_id == 2);
                w.flag(explicit);
                if !explicit {
                    // scaling_list_pred_matrix_id_delta
                    w.ue(0);
                    continue;
                }
                if size_id == 2 {
                    // scaling_list_dc_coef_minus8
                    w.se(8);
                }
                let coef_num = if size_id == 0 { 16 } else { 64 };
                for i in 0..coef_num {
                    w.se(if i % 7 == 0 { 3 } else { 0 });
                }
            }
        }
    }

    pub fn vps(&self) -> Vec<u8> {
        let mut w = Writer::new(NaluType::VpsNut);
        // vps_video_parameter_set_id, base layer internal and available
        w.u(4, 0).flag(true).flag(true);
        // vps_max_layers_minus1
        w.u(6, 0);
        w.u(3, u32::from(self.max_sub_layers_minus1));
        // vps_temporal_id_nesting_flag, vps_reserved_0xffff_16bits
        w.flag(true).u(16, 0xffff);
        self.profile_tier_level(&mut w);
        self.sub_layer_ordering_info(&mut w);
        // vps_max_layer_id, vps_num_layer_sets_minus1
        w.u(6, 0).ue(0);
        // vps_timing_info_present_flag, vps_extension_flag
        w.flag(false).flag(false);
        w.align();
        w.finish(&[])
    }

    pub fn sps(&self) -> Vec<u8> {
        let mut w = Writer::new(NaluType::SpsNut);
        w.u(4, 0).u(3, u32::from(self.max_sub_layers_minus1)).flag(true);
        self.profile_tier_level(&mut w);
        // sps_seq_parameter_set_id
        w.ue(0);
        w.ue(self.chroma_format_idc);
        if self.chroma_format_idc == 3 {
            w.flag(false);
        }
        w.ue(self.width).ue(self.height);
        w.flag(self.conformance_window.is_some());
        if let Some(window) = self.conformance_window {
            for offset in window {
                w.ue(offset);
            }
        }
        // bit_depth_luma_minus8, bit_depth_chroma_minus8
        w.ue(0).ue(0);
        w.ue(self.log2_max_poc_lsb_minus4);
        self.sub_layer_ordering_info(&mut w);
        w.ue(self.log2_min_cb_minus3).ue(self.log2_diff_max_min_cb);
        // log2_min_luma_transform_block_size_minus2,
        // log2_diff_max_min_luma_transform_block_size,
        // max_transform_hierarchy_depth_inter and _intra
        w.ue(0).ue(3).ue(1).ue(1);
        // scaling_list_enabled_flag, sps_scaling_list_data_present_flag
        w.flag(self.scaling_lists);
        if self.scaling_lists {
            w.flag(true);
            Self::scaling_list_data(&mut w);
        }
        // amp_enabled_flag
        w.flag(false);
        w.flag(self.sample_adaptive_offset);
        // pcm_enabled_flag
        w.flag(false);
        w.ue(self.num_short_term_ref_pic_sets);
        for idx in 0..self.num_short_term_ref_pic_sets {
            if idx > 0 {
                // inter_ref_pic_set_prediction_flag
                w.flag(false);
            }
            // One negative picture: the previous one.
            w.ue(1).ue(0).ue(0).flag(true);
        }
        w.flag(self.long_term_ref_pics);
        if self.long_term_ref_pics {
            // num_long_term_ref_pics_sps
            w.ue(0);
        }
        w.flag(self.temporal_mvp);
        // strong_intra_smoothing_enabled_flag, vui_parameters_present_flag,
        // sps_extension_present_flag
        w.flag(true).flag(false).flag(false);
        w.align();
        w.finish(&[])
    }

    pub fn pps(&self) -> Vec<u8> {
        let mut w = Writer::new(NaluType::PpsNut);
        w.ue(self.pps_id);
        // pps_seq_parameter_set_id
        w.ue(0);
        w.flag(self.dependent_slice_segments);
        w.flag(self.output_flag_present);
        w.u(3, u32::from(self.num_extra_slice_header_bits));
        // sign_data_hiding_enabled_flag
        w.flag(true);
        w.flag(self.cabac_init_present);
        // num_ref_idx_l0/l1_default_active_minus1, init_qp_minus26
        w.ue(0).ue(0).se(-4);
        // constrained_intra_pred_flag, transform_skip_enabled_flag
        w.flag(false).flag(true);
        w.flag(self.cu_qp_delta);
        if self.cu_qp_delta {
            // diff_cu_qp_delta_depth
            w.ue(1);
        }
        // pps_cb_qp_offset, pps_cr_qp_offset
        w.se(0).se(1);
        // pps_slice_chroma_qp_offsets_present_flag, weighted_pred_flag,
        // weighted_bipred_flag, transquant_bypass_enabled_flag
        w.flag(false).flag(false).flag(false).flag(false);
        // tiles_enabled_flag
        w.flag(false);
        w.flag(self.entropy_coding_sync);
        // pps_loop_filter_across_slices_enabled_flag,
        // deblocking_filter_control_present_flag,
        // pps_scaling_list_data_present_flag
        w.flag(true).flag(false).flag(self.scaling_lists);
        if self.scaling_lists {
            Self::scaling_list_data(&mut w);
        }
        // lists_modification_present_flag
        w.flag(false);
        // log2_parallel_merge_level_minus2,
        // slice_segment_header_extension_present_flag, pps_extension_present_flag
        w.ue(0).flag(false).flag(false);
        w.align();
        w.finish(&[])
    }

    /// Slice data of picture `frame`, without emulation prevention.
    pub fn payload(&self, frame: u32) -> Vec<u8> {
        let mut payload = vec![0x00, 0x00, 0x00, 0x01, self.tag, frame as u8];
        payload.extend(std::iter::repeat(0x5a).take(frame as usize % 5));
        payload.extend([0x00, 0x00, 0x02, 0xff, 0x00, 0x00, 0x03, 0x80]);
        payload
    }

    fn slice_tail(&self, w: &mut Writer) {
        // slice_qp_delta
        w.se(3);
        // slice_loop_filter_across_slices_enabled_flag
        w.flag(true);
        if self.entropy_coding_sync {
            // One entry point per CTU row after the first.
            w.ue(3).ue(4);
            for offset in [7, 0, 31] {
                w.u(5, offset);
            }
        }
        w.align();
    }

    /// An IDR_W_RADL picture.
    pub fn idr(&self, frame: u32) -> Vec<u8> {
        let mut w = Writer::new(NaluType::IdrWRadl);
        // first_slice_segment_in_pic_flag, no_output_of_prior_pics_flag
        w.flag(true).flag(false);
        w.ue(self.pps_id);
        w.u(usize::from(self.num_extra_slice_header_bits), 0);
        w.ue(SLICE_TYPE_I);
        if self.output_flag_present {
            w.flag(true);
        }
        // slice_sao_luma_flag, slice_sao_chroma_flag
        w.flag(true).flag(true);
        self.slice_tail(&mut w);
        w.finish(&self.payload(frame))
    }

    /// A TRAIL_R picture with picture order count `poc`.
    pub fn trail(&self, frame: u32, poc: u32) -> Vec<u8> {
        let mut w = Writer::new(NaluType::TrailR);
        w.flag(true);
        w.ue(self.pps_id);
        w.u(usize::from(self.num_extra_slice_header_bits), 0);
        w.ue(SLICE_TYPE_P);
        if self.output_flag_present {
            w.flag(true);
        }
        w.u(self.log2_max_poc_lsb_minus4 as usize + 4, poc);
        // short_term_ref_pic_set_sps_flag
        w.flag(true);
        w.flag(true).flag(false);
        // num_ref_idx_active_override_flag
        w.flag(false);
        if self.cabac_init_present {
            w.flag(false);
        }
        // five_minus_max_num_merge_cand
        w.ue(2);
        self.slice_tail(&mut w);
        w.finish(&self.payload(frame))
    }

    pub fn parameter_sets(&self) -> ParameterSets {
        ParameterSets::from_units([
            self.vps().as_slice(),
            self.sps().as_slice(),
            self.pps().as_slice(),
        ])
        .unwrap()
    }

    /// The pictures of a stream of `frames` frames with a keyframe every
    /// `gop` frames, without parameter sets.
    pub fn pictures(&self, frames: u32, gop: u32) -> Vec<Vec<u8>> {
        (0..frames)
            .map(|frame| match frame % gop {
                0 => self.idr(frame),
                poc => self.trail(frame, poc),
            })
            .collect()
    }

    /// An Annex B stream: parameter sets, then `frames` pictures with a
    /// keyframe every `gop` frames. The parameter sets are repeated before
    /// every keyframe.
    pub fn stream_with_gop(&self, frames: u32, gop: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for (frame, picture) in self.pictures(frames, gop).into_iter().enumerate() {
            if frame as u32 % gop == 0 {
                // A 4-byte start code, as encoders emit before parameter sets.
                out.extend([0x00, 0x00, 0x00, 0x01]);
                out.extend(self.vps());
                out.extend([0x00, 0x00, 0x01]);
                out.extend(self.sps());
                out.extend([0x00, 0x00, 0x01]);
                out.extend(self.pps());
            }
            out.extend([0x00, 0x00, 0x01]);
            out.extend(picture);
        }
        out
    }

    /// An Annex B stream of a single GOP.
    pub fn stream(&self, frames: u32) -> Vec<u8> {
        self.stream_with_gop(frames, frames.max(1))
    }
}
