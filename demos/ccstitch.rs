// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! ccstitch, a simple program stitching H.265 tile streams using cros-stitch. Capable of
//! computing the MD5 checksum of the stitched stream.

use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use argh::FromArgs;
use cros_stitch::stitcher::context::StitchContext;
use cros_stitch::stitcher::context::TileLayout;
use cros_stitch::stitcher::output_flag::keep_frames;
use cros_stitch::stitcher::Stitcher;
use cros_stitch::Resolution;

/// A comma-separated list of numbers.
#[derive(Debug, Default)]
struct List(Vec<u32>);

impl FromStr for List {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|n| n.trim().parse::<u32>().map_err(|e| format!("{}: {}", n, e)))
            .collect::<Result<Vec<_>, _>>()
            .map(List)
    }
}

/// Stitches H.265 tile streams into a single tiled stream
#[derive(Debug, FromArgs)]
struct Args {
    /// tile streams, in raster tile order
    #[argh(positional)]
    tiles: Vec<PathBuf>,

    /// output file to write the stitched stream to
    #[argh(option)]
    output: Option<PathBuf>,

    /// number of tile rows. Default: 1
    #[argh(option, default = "1")]
    rows: u32,

    /// number of tile columns. Default: 1
    #[argh(option, default = "1")]
    cols: u32,

    /// coded width of the stitched picture
    #[argh(option)]
    width: u32,

    /// coded height of the stitched picture
    #[argh(option)]
    height: u32,

    /// displayed width of the stitched picture. Default: the coded width
    #[argh(option)]
    display_width: Option<u32>,

    /// displayed height of the stitched picture. Default: the coded height
    #[argh(option)]
    display_height: Option<u32>,

    /// row heights in CTUs, comma-separated. Uniform rows if omitted
    #[argh(option)]
    row_heights: Option<List>,

    /// column widths in CTUs, comma-separated. Uniform columns if omitted
    #[argh(option)]
    col_widths: Option<List>,

    /// PPS id of the stitched stream. Default: 0
    #[argh(option, default = "0")]
    pps_id: u32,

    /// indices of the frames to output, comma-separated. All frames if omitted
    #[argh(option)]
    keep_frames: Option<List>,

    /// index of the first frame of the tiles, for --keep-frames. Default: 0
    #[argh(option, default = "0")]
    first_frame: usize,

    /// whether to display the MD5 of the stitched stream
    #[argh(switch)]
    compute_md5: bool,
}

fn read(path: &PathBuf) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut buf))
        .with_context(|| format!("error reading {}", path.display()))?;
    Ok(buf)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let layout = match (args.row_heights, args.col_widths) {
        (None, None) => TileLayout::new(args.rows, args.cols)?,
        (rows, cols) => TileLayout::with_extents(
            args.rows,
            args.cols,
            rows.unwrap_or_default().0,
            cols.unwrap_or_default().0,
        )?,
    };

    let coded = Resolution {
        width: args.width,
        height: args.height,
    };
    let display = Resolution {
        width: args.display_width.unwrap_or(coded.width),
        height: args.display_height.unwrap_or(coded.height),
    };
    let context = StitchContext::new(layout, coded)
        .with_display(display)
        .with_pps_id(args.pps_id)?;

    let mut tiles = args
        .tiles
        .iter()
        .map(read)
        .collect::<anyhow::Result<Vec<_>>>()?;

    if let Some(List(frames)) = args.keep_frames {
        let frames = frames.into_iter().map(|f| f as usize).collect::<Vec<_>>();
        tiles = tiles
            .iter()
            .map(|tile| keep_frames(tile, args.first_frame, &frames))
            .collect::<anyhow::Result<Vec<_>>>()?;
    }

    let stitched = Stitcher::new(context).stitch(&tiles)?;

    if let Some(path) = args.output {
        File::create(&path)
            .and_then(|mut file| file.write_all(&stitched))
            .with_context(|| format!("error writing {}", path.display()))?;
    }

    if args.compute_md5 {
        println!("{:x}", md5::compute(&stitched));
    }

    Ok(())
}
