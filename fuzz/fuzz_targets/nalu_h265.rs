#![no_main]

use cros_stitch::codec::h265::headers::ParameterSets;
use cros_stitch::codec::h265::nalu::Nalu;
use cros_stitch::utils::nalu::NalIterator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let headers = ParameterSets::from_stream(data).ok();

    for unit in NalIterator::new(data) {
        if let Ok(nalu) = Nalu::load(unit, headers.as_ref()) {
            let _ = nalu.to_bytes();
        }
    }
});
