// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Slice segment headers, 7.3.6.1.
//!
//! Tiles are encoded with one independent slice segment per picture, so every
//! segment starts out as the first one of its picture and carries no address.
//! Placing a tile in a larger picture means giving its segment the address of
//! the tile's first CTU, and making it refer to the rewritten PPS.

use anyhow::anyhow;
use anyhow::Context;
use bytes::Bytes;

use crate::bitstream_utils::encode_golombs;
use crate::bitstream_utils::golomb_len;
use crate::bitstream_utils::BitCursor;
use crate::bitstream_utils::Bits;
use crate::bitstream_utils::FieldKey;
use crate::bitstream_utils::FieldTable;
use crate::codec::h265::headers::ParameterSets;
use crate::codec::h265::nalu::NaluHeader;
use crate::codec::h265::pps::PpsFlags;
use crate::stitcher::context::MAX_PPS_ID;
use crate::utils::bit_buffer::BitBuffer;
use crate::utils::emulation::add_emulation_prevention_and_marker;
use crate::utils::emulation::remove_emulation_prevention;

/// first_slice_segment_in_pic_flag directly follows the NAL unit header.
const FIRST_SLICE_SEGMENT_OFFSET: usize = NaluHeader::LEN * 8;

/// The slice segment grammars the tile encoder produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceKind {
    /// IDR_W_RADL: an intra keyframe.
    Idr,
    /// TRAIL_R: a predicted frame referring to the previous picture.
    TrailR,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceField {
    FirstSliceSegmentInPicFlag,
    PpsIdOffset,
    PpsId,
    AddressOffset,
    DependentSliceSegmentFlag,
    SliceSegmentAddress,
    PicOutputFlagOffset,
    PicOutputFlag,
    PicOrderCntLsbOffset,
    PicOrderCntLsb,
    EntryPointOffset,
    TrailingBitsOffset,
    End,
}

impl FieldKey for SliceField {
    fn name(self) -> &'static str {
        match self {
            SliceField::FirstSliceSegmentInPicFlag => "first_slice_segment_in_pic_flag",
            SliceField::PpsIdOffset => "pps_id_offset",
            SliceField::PpsId => "slice_pic_parameter_set_id",
            SliceField::AddressOffset => "address_offset",
            SliceField::DependentSliceSegmentFlag => "dependent_slice_segment_flag",
            SliceField::SliceSegmentAddress => "slice_segment_address",
            SliceField::PicOutputFlagOffset => "pic_output_flag_offset",
            SliceField::PicOutputFlag => "pic_output_flag",
            SliceField::PicOrderCntLsbOffset => "slice_pic_order_cnt_lsb_offset",
            SliceField::PicOrderCntLsb => "slice_pic_order_cnt_lsb",
            SliceField::EntryPointOffset => "entry_point_offset",
            SliceField::TrailingBitsOffset => "trailing_bits_offset",
            SliceField::End => "end",
        }
    }
}

/// The parameter set values a slice segment header is parsed against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceParams {
    /// Width of slice_segment_address in the target picture.
    pub address_bits: usize,
    /// Width of slice_pic_order_cnt_lsb.
    pub max_pic_order_bits: usize,
    /// The PPS the segment was encoded against.
    pub pps: PpsFlags,
}

impl SliceParams {
    pub fn from_headers(headers: &ParameterSets) -> Self {
        Self {
            address_bits: headers.sps().address_length_bits(),
            max_pic_order_bits: headers.sps().max_pic_order_bits(),
            pps: headers.pps().source_flags(),
        }
    }
}

/// One slice segment: its editable header and its untouched slice data.
#[derive(Clone, Debug)]
pub struct SliceSegment {
    header: NaluHeader,
    kind: SliceKind,
    /// De-escaped NAL unit header and slice segment header, byte aligned.
    bits: BitBuffer,
    /// De-escaped slice_segment_data( ) and trailing bits.
    payload: Bytes,
    /// Offsets as parsed. Edits shift everything after their position, so
    /// offsets past an edit are adjusted by the bookkeeping below.
    fields: FieldTable<SliceField>,
    params: SliceParams,
    pps_id: u32,
    /// Set once by [`SliceSegment::set_address_and_pps_id`].
    address: Option<u32>,
    /// Whether a pic_output_flag was inserted at `PicOutputFlagOffset`.
    pic_output_flag_inserted: bool,
    /// Net number of bits added before `PicOutputFlagOffset` by address
    /// assignment. May be negative when the new pps id is shorter.
    bits_added_before_pic_order: isize,
}

impl SliceSegment {
    pub fn parse(
        header: NaluHeader,
        kind: SliceKind,
        data: &[u8],
        headers: &ParameterSets,
    ) -> anyhow::Result<Self> {
        Self::parse_with(header, kind, data, SliceParams::from_headers(headers))
    }

    pub fn parse_with(
        header: NaluHeader,
        kind: SliceKind,
        data: &[u8],
        params: SliceParams,
    ) -> anyhow::Result<Self> {
        let rbsp = Bytes::from(remove_emulation_prevention(data));
        let fields = Self::parse_fields(Bits::from_slice(&rbsp[..]), kind, &params)?;

        let header_len = fields.offset(SliceField::End)? / 8;
        let pps_id = fields.get(SliceField::PpsId)? as u32;

        Ok(Self {
            header,
            kind,
            bits: BitBuffer::from_bytes(&rbsp[..header_len]),
            payload: rbsp.slice(header_len..),
            fields,
            params,
            pps_id,
            address: None,
            pic_output_flag_inserted: false,
            bits_added_before_pic_order: 0,
        })
    }

    fn parse_fields(
        bits: &Bits,
        kind: SliceKind,
        params: &SliceParams,
    ) -> anyhow::Result<FieldTable<SliceField>> {
        let mut c = BitCursor::new(bits, FIRST_SLICE_SEGMENT_OFFSET);
        let pps = &params.pps;

        let first = c.collect_flag(SliceField::FirstSliceSegmentInPicFlag)?;
        if kind == SliceKind::Idr {
            // no_output_of_prior_pics_flag
            c.skip_bits(1)?;
        }
        c.mark_position(SliceField::PpsIdOffset)?;
        c.collect_golomb(SliceField::PpsId)?;

        c.mark_position(SliceField::AddressOffset)?;
        if !first {
            if pps.dependent_slice_segments_enabled
                && c.collect_flag(SliceField::DependentSliceSegmentFlag)?
            {
                return Err(anyhow!("dependent slice segments are not supported"));
            }
            if params.address_bits == 0 {
                return Err(anyhow!("slice segment address in a single-CTU picture"));
            }
            c.collect_value(SliceField::SliceSegmentAddress, params.address_bits)?;
        }

        // slice_reserved_flag
        c.skip_bits(usize::from(pps.num_extra_slice_header_bits))?;
        // slice_type
        c.skip_golomb()?;
        c.mark_position(SliceField::PicOutputFlagOffset)?;
        if pps.output_flag_present {
            c.collect_flag(SliceField::PicOutputFlag)?;
        }

        if kind == SliceKind::TrailR {
            c.mark_position(SliceField::PicOrderCntLsbOffset)?;
            c.collect_value(SliceField::PicOrderCntLsb, params.max_pic_order_bits)?;
            // short_term_ref_pic_set_sps_flag: the RPS always comes from the
            // SPS.
            c.expect_bit(true)?;
        }

        // slice_sao_luma_flag, slice_sao_chroma_flag
        c.skip_bits(2)?;

        if kind == SliceKind::TrailR {
            // num_ref_idx_active_override_flag
            c.expect_bit(false)?;
            // cabac_init_flag
            c.skip_bits_if(1, pps.cabac_init_present)?;
            // five_minus_max_num_merge_cand
            c.skip_golomb()?;
        }

        // slice_qp_delta
        c.skip_golomb()?;
        // slice_loop_filter_across_slices_enabled_flag
        c.skip_bits(1)?;

        c.mark_position(SliceField::EntryPointOffset)?;
        c.skip_entry_point_offsets(pps.entry_point_offsets_present)?;

        c.mark_position(SliceField::TrailingBitsOffset)?;
        // byte_alignment( )
        c.expect_bit(true)?;
        c.byte_align(Some(false))?;
        c.mark_position(SliceField::End)?;

        Ok(c.into_fields())
    }

    pub fn header(&self) -> &NaluHeader {
        &self.header
    }

    pub fn kind(&self) -> SliceKind {
        self.kind
    }

    pub fn is_keyframe(&self) -> bool {
        self.kind == SliceKind::Idr
    }

    pub fn params(&self) -> &SliceParams {
        &self.params
    }

    pub fn pps_id(&self) -> u32 {
        self.pps_id
    }

    pub fn first_slice_segment_in_pic(&self) -> bool {
        self.bits.get(FIRST_SLICE_SEGMENT_OFFSET).unwrap_or(false)
    }

    /// The CTU address the segment starts at.
    pub fn address(&self) -> u32 {
        self.address.unwrap_or_else(|| {
            self.fields
                .get(SliceField::SliceSegmentAddress)
                .unwrap_or(0) as u32
        })
    }

    /// The slice data, without emulation prevention.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Sets the width of slice_segment_address in the picture the segment
    /// will be placed in.
    pub fn set_address_bits(&mut self, address_bits: usize) -> anyhow::Result<()> {
        if self.address.is_some() {
            return Err(anyhow!("segment is already placed"));
        }

        self.params.address_bits = address_bits;
        Ok(())
    }

    /// Current position of a field recorded after the address.
    fn shifted_offset(&self, key: SliceField) -> anyhow::Result<usize> {
        self.fields
            .offset(key)?
            .checked_add_signed(self.bits_added_before_pic_order)
            .ok_or(anyhow!("{} moved out of the header", key.name()))
    }

    /// Places the segment at CTU `address` of a tiled picture using PPS
    /// `pps_id`. Returns the number of bits added before the picture order
    /// count field, which may be negative.
    ///
    /// May only be called once per segment.
    pub fn set_address_and_pps_id(&mut self, address: u32, pps_id: u32) -> anyhow::Result<isize> {
        if let Some(assigned) = self.address {
            return Err(anyhow!("segment address already set to {}", assigned));
        }
        if self.fields.contains(SliceField::SliceSegmentAddress) {
            return Err(anyhow!("segment already starts at address {}", self.address()));
        }
        if pps_id >= MAX_PPS_ID {
            return Err(anyhow!("pps id {} out of range", pps_id));
        }

        let mut field = BitBuffer::new();
        if address != 0 {
            let width = self.params.address_bits;
            if width == 0 {
                return Err(anyhow!("address {} in a single-CTU picture", address));
            }

            if self.params.pps.dependent_slice_segments_enabled {
                // dependent_slice_segment_flag
                field.push(false);
            }
            field
                .push_bits(u64::from(address), width)
                .with_context(|| format!("address {} does not fit the picture", address))?;
        }

        self.bits.set(FIRST_SLICE_SEGMENT_OFFSET, address == 0)?;
        let inserted = field.len();
        if inserted > 0 {
            let at = self.fields.offset(SliceField::AddressOffset)?;
            self.bits.insert_bits(at, field.as_bits())?;
        }

        if !self.params.pps.entry_point_offsets_present {
            // num_entry_point_offsets = 0
            let at = self.fields.offset(SliceField::EntryPointOffset)?
                + usize::from(self.pic_output_flag_inserted)
                + inserted;
            self.bits.insert(at, 1, 1)?;
        }

        // The pps id precedes every other edit, so it goes last.
        let mut added = inserted as isize;
        if pps_id != self.pps_id {
            let start = self.fields.offset(SliceField::PpsIdOffset)?;
            self.bits.replace(
                start,
                start + golomb_len(self.pps_id),
                &encode_golombs(&[pps_id]),
            )?;
            added += golomb_len(pps_id) as isize - golomb_len(self.pps_id) as isize;
            self.pps_id = pps_id;
        }

        self.bits.byte_align(false);
        self.fields.update(SliceField::End, self.bits.len() as u64);
        self.address = Some(address);
        self.bits_added_before_pic_order = added;

        log::trace!(
            "slice segment placed at address {} with pps id {}",
            address,
            pps_id
        );

        Ok(added)
    }

    /// The pic_output_flag, if the segment carries one.
    pub fn pic_output_flag(&self) -> anyhow::Result<Option<bool>> {
        if !self.params.pps.output_flag_present && !self.pic_output_flag_inserted {
            return Ok(None);
        }

        let at = self.shifted_offset(SliceField::PicOutputFlagOffset)?;
        Ok(self.bits.get(at))
    }

    /// Sets pic_output_flag, inserting it if the segment was encoded without
    /// one. The PPS emitted with the segment must have
    /// output_flag_present_flag set.
    pub fn set_pic_output_flag(&mut self, value: bool) -> anyhow::Result<()> {
        let at = self.shifted_offset(SliceField::PicOutputFlagOffset)?;

        if self.params.pps.output_flag_present || self.pic_output_flag_inserted {
            self.bits.set(at, value)?;
            return Ok(());
        }

        self.bits.insert(at, u64::from(value), 1)?;
        self.bits.byte_align(false);
        self.fields.update(SliceField::End, self.bits.len() as u64);
        self.pic_output_flag_inserted = true;
        Ok(())
    }

    fn pic_order_cnt_lsb_offset(&self) -> anyhow::Result<usize> {
        if self.kind != SliceKind::TrailR {
            return Err(anyhow!("{:?} segments carry no picture order count", self.kind));
        }

        Ok(self.shifted_offset(SliceField::PicOrderCntLsbOffset)?
            + usize::from(self.pic_output_flag_inserted))
    }

    pub fn pic_order_cnt_lsb(&self) -> anyhow::Result<u32> {
        let at = self.pic_order_cnt_lsb_offset()?;
        Ok(self.bits.read_bits(at, self.params.max_pic_order_bits)? as u32)
    }

    /// Overwrites slice_pic_order_cnt_lsb in place.
    pub fn set_pic_order_cnt_lsb(&mut self, value: u32) -> anyhow::Result<()> {
        let at = self.pic_order_cnt_lsb_offset()?;
        self.bits
            .set_bits(at, u64::from(value), self.params.max_pic_order_bits)?;
        Ok(())
    }

    /// The segment as it should be emitted.
    pub fn to_bytes(&self) -> Vec<u8> {
        add_emulation_prevention_and_marker(&[&self.bits.to_bytes(), &self.payload])
    }
}
