#![no_main]

use cros_stitch::stitcher::context::StitchContext;
use cros_stitch::stitcher::context::TileLayout;
use cros_stitch::stitcher::Stitcher;
use cros_stitch::Resolution;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(layout) = TileLayout::new(1, 2) else {
        return;
    };
    let context = StitchContext::new(
        layout,
        Resolution {
            width: 640,
            height: 256,
        },
    );

    // The same stream for both tiles.
    let _ = Stitcher::new(context).stitch(&[data, data]);
});
