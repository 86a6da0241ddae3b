// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Geometry and parameters of one stitched GOP.

use crate::codec::h265::ptl::Level;
use crate::codec::h265::sps::CtuGrid;
use crate::stitcher::StitchError;
use crate::Resolution;

/// pps_pic_parameter_set_id is in the range 0..=63.
pub const MAX_PPS_ID: u32 = 64;

/// How the stitched picture is split into tiles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileLayout {
    rows: u32,
    cols: u32,
    uniform: bool,
    /// Explicit row heights in CTUs. Empty for uniform layouts.
    row_heights: Vec<u32>,
    /// Explicit column widths in CTUs. Empty for uniform layouts.
    col_widths: Vec<u32>,
}

impl TileLayout {
    /// A layout of `rows` by `cols` tiles of (nearly) equal size.
    pub fn new(rows: u32, cols: u32) -> Result<Self, StitchError> {
        Self::check_counts(rows, cols)?;

        Ok(Self {
            rows,
            cols,
            uniform: true,
            row_heights: Vec::new(),
            col_widths: Vec::new(),
        })
    }

    /// A layout with explicit row heights and column widths, in CTUs.
    ///
    /// The last row and column take whatever is left of the picture, so they
    /// may be omitted. When given, they must match what is left.
    pub fn with_extents(
        rows: u32,
        cols: u32,
        row_heights: Vec<u32>,
        col_widths: Vec<u32>,
    ) -> Result<Self, StitchError> {
        Self::check_counts(rows, cols)?;
        Self::check_extents("row heights", rows, &row_heights)?;
        Self::check_extents("column widths", cols, &col_widths)?;

        Ok(Self {
            rows,
            cols,
            uniform: false,
            row_heights,
            col_widths,
        })
    }

    fn check_counts(rows: u32, cols: u32) -> Result<(), StitchError> {
        if rows == 0 || cols == 0 {
            return Err(StitchError::InvalidLayout(format!(
                "{}x{} tiles",
                rows, cols
            )));
        }

        Ok(())
    }

    fn check_extents(what: &str, count: u32, extents: &[u32]) -> Result<(), StitchError> {
        let len = extents.len() as u64;
        if len + 1 != u64::from(count) && len != u64::from(count) {
            return Err(StitchError::InvalidLayout(format!(
                "{} {} {} for {} tiles",
                extents.len(),
                what,
                if extents.len() == 1 { "entry" } else { "entries" },
                count
            )));
        }
        if extents.contains(&0) {
            return Err(StitchError::InvalidLayout(format!("empty {}", what)));
        }

        Ok(())
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn tile_count(&self) -> u32 {
        self.rows.saturating_mul(self.cols)
    }

    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    pub fn row_heights(&self) -> &[u32] {
        &self.row_heights
    }

    pub fn col_widths(&self) -> &[u32] {
        &self.col_widths
    }

    /// Splits `total` CTUs into `count` parts, as in 6.5.1.
    fn split(
        what: &str,
        count: u32,
        explicit: Option<&[u32]>,
        total: u32,
    ) -> Result<Vec<u32>, StitchError> {
        if total < count {
            return Err(StitchError::InvalidLayout(format!(
                "{} {} for {} CTUs",
                count, what, total
            )));
        }

        let Some(explicit) = explicit else {
            let count = u64::from(count);
            let total = u64::from(total);
            return Ok((0..count)
                .map(|i| ((i + 1) * total / count - i * total / count) as u32)
                .collect());
        };

        let leading = &explicit[..count as usize - 1];
        let used = leading.iter().map(|&e| u64::from(e)).sum::<u64>();
        if used >= u64::from(total) {
            return Err(StitchError::InvalidLayout(format!(
                "{} cover {} of {} CTUs",
                what, used, total
            )));
        }

        let last = total - used as u32;
        if let Some(&given) = explicit.get(count as usize - 1) {
            if given != last {
                return Err(StitchError::InvalidLayout(format!(
                    "last of the {} is {} but {} CTUs are left",
                    what, given, last
                )));
            }
        }

        let mut extents = leading.to_vec();
        extents.push(last);
        Ok(extents)
    }

    /// Height of every tile row, in CTUs of `grid`.
    pub fn row_extents(&self, grid: &CtuGrid) -> Result<Vec<u32>, StitchError> {
        let explicit = (!self.uniform).then_some(self.row_heights.as_slice());
        Self::split("row heights", self.rows, explicit, grid.height)
    }

    /// Width of every tile column, in CTUs of `grid`.
    pub fn column_extents(&self, grid: &CtuGrid) -> Result<Vec<u32>, StitchError> {
        let explicit = (!self.uniform).then_some(self.col_widths.as_slice());
        Self::split("column widths", self.cols, explicit, grid.width)
    }

    /// The address of the first CTU of every tile, in raster tile order.
    pub fn addresses(&self, grid: &CtuGrid) -> Result<Vec<u32>, StitchError> {
        let rows = self.row_extents(grid)?;
        let cols = self.column_extents(grid)?;

        let mut addresses = Vec::with_capacity(rows.len() * cols.len());
        let mut top = 0u64;
        for height in rows {
            let mut left = 0u64;
            for &width in &cols {
                let address = top * u64::from(grid.width) + left;
                addresses.push(u32::try_from(address).map_err(|_| {
                    StitchError::InvalidLayout(format!(
                        "tile address {} in a {}x{} CTU picture",
                        address, grid.width, grid.height
                    ))
                })?);
                left += u64::from(width);
            }
            top += u64::from(height);
        }

        Ok(addresses)
    }
}

/// Everything needed to stitch one GOP.
#[derive(Clone, Debug)]
pub struct StitchContext {
    layout: TileLayout,
    coded: Resolution,
    display: Resolution,
    pps_id: u32,
    general_level: Level,
    loop_filter_across_tiles: bool,
}

impl StitchContext {
    /// A context for a picture of `coded` size split as in `layout`, using
    /// PPS id 0 and shown uncropped.
    pub fn new(layout: TileLayout, coded: Resolution) -> Self {
        Self {
            layout,
            coded,
            display: coded,
            pps_id: 0,
            general_level: Level::L4,
            loop_filter_across_tiles: false,
        }
    }

    /// Crops the output to `display`, centered in the coded picture.
    pub fn with_display(mut self, display: Resolution) -> Self {
        self.display = display;
        self
    }

    pub fn with_pps_id(mut self, pps_id: u32) -> Result<Self, StitchError> {
        if pps_id >= MAX_PPS_ID {
            return Err(StitchError::InvalidPpsId(pps_id));
        }

        self.pps_id = pps_id;
        Ok(self)
    }

    pub fn with_general_level(mut self, level: Level) -> Self {
        self.general_level = level;
        self
    }

    pub fn with_loop_filter_across_tiles(mut self, enabled: bool) -> Self {
        self.loop_filter_across_tiles = enabled;
        self
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    pub fn coded(&self) -> Resolution {
        self.coded
    }

    pub fn display(&self) -> Resolution {
        self.display
    }

    pub fn pps_id(&self) -> u32 {
        self.pps_id
    }

    pub fn general_level(&self) -> Level {
        self.general_level
    }

    pub fn loop_filter_across_tiles(&self) -> bool {
        self.loop_filter_across_tiles
    }
}

/// Rotates through the PPS ids available to stitched streams: 1 to 63, then
/// 1 again. Id 0 stays with the tiles' own parameter sets.
#[derive(Clone, Debug, Default)]
pub struct PpsIdGenerator {
    last: u32,
}

impl PpsIdGenerator {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Iterator for PpsIdGenerator {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.last = self.last % (MAX_PPS_ID - 1) + 1;
        Some(self.last)
    }
}
