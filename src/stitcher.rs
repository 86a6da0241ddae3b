// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stitching of independently encoded H.265 tiles into one tiled stream.
//!
//! Every tile is encoded on its own, as a full picture with a single slice
//! segment. Stitching one GOP takes the parameter sets of the first tile,
//! rewrites them to describe the whole picture split into tiles, and then
//! emits, for every frame, the slice segment of each tile in raster tile
//! order, each relocated to the first CTU of its tile. The slice data itself
//! is never touched.

pub mod context;
pub mod output_flag;
pub mod repeat;

use anyhow::Context;
use thiserror::Error;

use crate::codec::h265::headers::ParameterSets;
use crate::codec::h265::nalu::Nalu;
use crate::codec::h265::nalu::NaluHeader;
use crate::codec::h265::nalu::NaluType;
use crate::codec::h265::sei::active_parameter_sets_sei;
use crate::codec::h265::slice::SliceKind;
use crate::codec::h265::slice::SliceParams;
use crate::codec::h265::slice::SliceSegment;
use crate::stitcher::context::StitchContext;
use crate::utils::nalu::NalIterator;

#[derive(Error, Debug)]
pub enum StitchError {
    #[error("the layout has {expected} tiles but {actual} tile streams were given")]
    TileCountMismatch { expected: usize, actual: usize },
    #[error("tile {tile} has {actual} slice segments where tile 0 has {expected}")]
    SegmentCountMismatch {
        tile: usize,
        expected: usize,
        actual: usize,
    },
    #[error("tiles 0 and {tile} disagree on whether frame {frame} is a keyframe")]
    KeyframeMismatch { frame: usize, tile: usize },
    #[error("tile {tile} contains an unsupported {type_:?} slice segment")]
    UnsupportedSegment { tile: usize, type_: NaluType },
    #[error("invalid tile layout: {0}")]
    InvalidLayout(String),
    #[error("PPS id {0} is out of range")]
    InvalidPpsId(u32),
    #[error(transparent)]
    Bitstream(#[from] anyhow::Error),
}

pub type StitchResult<T> = Result<T, StitchError>;

/// A slice segment NALU of a tile stream, not parsed yet.
#[derive(Clone, Copy)]
struct PendingSegment<'a> {
    header: NaluHeader,
    kind: SliceKind,
    data: &'a [u8],
}

/// Stitches the tiles of one GOP.
pub struct Stitcher {
    context: StitchContext,
}

impl Stitcher {
    pub fn new(context: StitchContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &StitchContext {
        &self.context
    }

    /// Stitches `tiles`, one Annex B stream per tile in raster tile order,
    /// into a single Annex B stream.
    pub fn stitch<T: AsRef<[u8]>>(&self, tiles: &[T]) -> StitchResult<Vec<u8>> {
        let layout = self.context.layout();
        let expected = layout.tile_count() as usize;
        if tiles.len() != expected {
            return Err(StitchError::TileCountMismatch {
                expected,
                actual: tiles.len(),
            });
        }

        if expected == 1 {
            return self.passthrough(tiles[0].as_ref());
        }

        let units = tiles
            .iter()
            .map(|tile| NalIterator::new(tile.as_ref()).collect::<Vec<_>>())
            .collect::<Vec<_>>();

        let headers = self.rewrite_headers(&units[0])?;
        let addresses = layout.addresses(headers.sps().grid())?;
        if addresses.len() != tiles.len() {
            return Err(StitchError::TileCountMismatch {
                expected: addresses.len(),
                actual: tiles.len(),
            });
        }

        let params = SliceParams::from_headers(&headers);
        if params.address_bits == 0 {
            return Err(StitchError::InvalidLayout(
                "the stitched picture is a single CTU".into(),
            ));
        }

        let segments = units
            .iter()
            .enumerate()
            .map(|(tile, units)| Self::segments(tile, units))
            .collect::<StitchResult<Vec<_>>>()?;

        let frames = segments[0].len();
        for (tile, tile_segments) in segments.iter().enumerate().skip(1) {
            if tile_segments.len() != frames {
                return Err(StitchError::SegmentCountMismatch {
                    tile,
                    expected: frames,
                    actual: tile_segments.len(),
                });
            }
        }

        log::debug!(
            "stitching {} frames of {} tiles ({}x{}) into {:?}, pps id {}",
            frames,
            tiles.len(),
            layout.rows(),
            layout.cols(),
            self.context.coded(),
            self.context.pps_id()
        );

        let header_bytes = headers.to_bytes();
        let mut sei_pending = self.context.pps_id() != 0;
        let size = tiles.iter().map(|tile| tile.as_ref().len()).sum::<usize>();
        let mut out = Vec::with_capacity(size + header_bytes.len());

        for frame in 0..frames {
            let keyframe = segments[0][frame].kind == SliceKind::Idr;

            for (tile, tile_segments) in segments.iter().enumerate() {
                let pending = tile_segments[frame];
                if (pending.kind == SliceKind::Idr) != keyframe {
                    return Err(StitchError::KeyframeMismatch { frame, tile });
                }

                if tile == 0 && (keyframe || frame == 0) {
                    out.extend_from_slice(&header_bytes);
                    if sei_pending {
                        out.extend(active_parameter_sets_sei()?);
                        sei_pending = false;
                    }
                }

                let mut segment =
                    SliceSegment::parse_with(pending.header, pending.kind, pending.data, params)
                        .with_context(|| {
                            format!("while parsing frame {} of tile {}", frame, tile)
                        })?;
                segment.set_address_and_pps_id(addresses[tile], self.context.pps_id())?;
                out.extend(segment.to_bytes());
            }
        }

        Ok(out)
    }

    /// A single tile needs no rewriting.
    fn passthrough(&self, tile: &[u8]) -> StitchResult<Vec<u8>> {
        log::debug!("single tile layout, passing {} bytes through", tile.len());

        let mut out = active_parameter_sets_sei()?;
        out.extend_from_slice(tile);
        Ok(out)
    }

    /// Builds the parameter sets of the stitched stream from those of a tile.
    fn rewrite_headers(&self, units: &[&[u8]]) -> StitchResult<ParameterSets> {
        let context = &self.context;
        let mut headers = ParameterSets::from_units(units.iter().copied())
            .context("while reading the parameter sets of tile 0")?;

        // The conformance window precedes the dimensions, so it goes first.
        let sps = headers.sps_mut();
        sps.set_conformance_window(context.display(), context.coded())?;
        sps.set_dimensions(context.coded())?;
        sps.set_general_level_indicator(context.general_level())?;
        headers
            .vps_mut()
            .set_general_level_indicator(context.general_level())?;

        let pps = headers.pps_mut();
        pps.set_tile_dimensions(context.layout(), context.loop_filter_across_tiles())?;
        pps.set_pps_id(context.pps_id())?;

        log::debug!(
            "rewrote parameter sets: {:?} coded, {:?} displayed, level {:?}",
            context.coded(),
            context.display(),
            context.general_level()
        );

        Ok(headers)
    }

    /// The slice segments of one tile stream. Other units are dropped, the
    /// stitched parameter sets replace them.
    fn segments<'a>(tile: usize, units: &[&'a [u8]]) -> StitchResult<Vec<PendingSegment<'a>>> {
        let mut segments = Vec::new();

        for &data in units {
            let type_ = Nalu::peek_type(data)?;
            if !type_.is_vcl() {
                log::trace!("dropping {:?} from tile {}", type_, tile);
                continue;
            }

            let kind = type_
                .slice_kind()
                .ok_or(StitchError::UnsupportedSegment { tile, type_ })?;
            segments.push(PendingSegment {
                header: NaluHeader::parse(data)?,
                kind,
                data,
            });
        }

        Ok(segments)
    }
}
