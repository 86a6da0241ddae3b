// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Frame selection without re-encoding.
//!
//! Every picture is still decoded, so references stay intact, but only the
//! pictures whose pic_output_flag is set are output by the decoder.

use anyhow::anyhow;
use anyhow::Context;

use crate::codec::h265::headers::ParameterSets;
use crate::codec::h265::nalu::Nalu;
use crate::utils::emulation::NAL_MARKER;
use crate::utils::nalu::NalIterator;

/// Rewrites the tile `stream` so that only the frames in `frames_to_keep`
/// are output. Frames are numbered from `first_frame_index`, in stream order.
pub fn keep_frames(
    stream: &[u8],
    first_frame_index: usize,
    frames_to_keep: &[usize],
) -> anyhow::Result<Vec<u8>> {
    let headers = ParameterSets::from_stream(stream)?;
    let mut out = Vec::with_capacity(stream.len() + stream.len() / 64);
    let mut frame = first_frame_index;
    let mut kept = 0;

    for unit in NalIterator::new(stream) {
        match Nalu::load(unit, Some(&headers))? {
            Nalu::Picture(mut pps) => {
                pps.enable_output_flag_present()?;
                out.extend(pps.to_bytes());
            }
            Nalu::Segment(mut segment) => {
                let keep = frames_to_keep.contains(&frame);
                segment
                    .set_pic_output_flag(keep)
                    .with_context(|| format!("while marking frame {}", frame))?;
                out.extend(segment.to_bytes());

                kept += usize::from(keep);
                frame += 1;
            }
            Nalu::Opaque(opaque) if opaque.header().type_().is_vcl() => {
                return Err(anyhow!(
                    "cannot select frames among {:?} pictures",
                    opaque.header().type_()
                ));
            }
            _ => {
                out.extend_from_slice(&NAL_MARKER);
                out.extend_from_slice(unit);
            }
        }
    }

    log::debug!(
        "kept {} of frames {}..{}",
        kept,
        first_frame_index,
        frame
    );

    Ok(out)
}
