// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Repetition of a P-frame.
//!
//! A tile whose content does not change can be encoded once as a keyframe and
//! a single P-frame predicting the previous picture unchanged. Repeating that
//! P-frame with increasing picture order counts extends the tile to any number
//! of frames.

use anyhow::anyhow;

use crate::codec::h265::headers::ParameterSets;
use crate::codec::h265::nalu::Nalu;
use crate::codec::h265::slice::SliceSegment;
use crate::utils::nalu::NalIterator;

pub struct FrameRepeater {
    keyframe: Vec<u8>,
    template: SliceSegment,
}

impl FrameRepeater {
    /// `keyframe_with_headers` holds the parameter sets and the keyframe of
    /// the tile, `pframe` the single P-frame to repeat.
    pub fn new(keyframe_with_headers: &[u8], pframe: &[u8]) -> anyhow::Result<Self> {
        let headers = ParameterSets::from_stream(keyframe_with_headers)?;

        let mut template = None;
        for unit in NalIterator::new(pframe) {
            match Nalu::load(unit, Some(&headers))? {
                Nalu::Segment(segment) if segment.is_keyframe() => {
                    return Err(anyhow!("expected a P-frame, got a keyframe"));
                }
                Nalu::Segment(segment) => {
                    if template.replace(segment).is_some() {
                        return Err(anyhow!("more than one slice segment to repeat"));
                    }
                }
                _ => (),
            }
        }
        let template = template.ok_or(anyhow!("no P-frame to repeat"))?;

        log::debug!(
            "repeating a P-frame of {} bytes with {}-bit picture order counts",
            template.payload().len(),
            template.params().max_pic_order_bits
        );

        Ok(Self {
            keyframe: keyframe_with_headers.to_vec(),
            template,
        })
    }

    /// Places the repeated P-frame at CTU `address` of the tiled picture
    /// described by `headers`, referring to PPS `pps_id`.
    pub fn with_address(
        mut self,
        headers: &ParameterSets,
        address: u32,
        pps_id: u32,
    ) -> anyhow::Result<Self> {
        self.template
            .set_address_bits(headers.sps().address_length_bits())?;
        self.template.set_address_and_pps_id(address, pps_id)?;
        Ok(self)
    }

    /// The P-frame NALU, start code included, numbered `poc` modulo the
    /// picture order count range.
    pub fn pframe_for_pic_order(&self, poc: u32) -> anyhow::Result<Vec<u8>> {
        let poc = u64::from(poc);
        let poc = 1u64
            .checked_shl(self.template.params().max_pic_order_bits as u32)
            .map_or(poc, |range| poc % range);

        let mut segment = self.template.clone();
        segment.set_pic_order_cnt_lsb(poc as u32)?;
        Ok(segment.to_bytes())
    }

    /// The keyframe followed by `count` copies of the P-frame.
    pub fn repeat(&self, count: u32) -> anyhow::Result<Vec<u8>> {
        let mut out = self.keyframe.clone();
        for poc in 1..=count {
            out.extend(self.pframe_for_pic_order(poc)?);
        }
        Ok(out)
    }
}
