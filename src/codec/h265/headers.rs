// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The parameter sets of one tile stream.

use anyhow::anyhow;

use crate::codec::h265::nalu::Nalu;
use crate::codec::h265::nalu::NaluType;
use crate::codec::h265::pps::Pps;
use crate::codec::h265::sps::Sps;
use crate::codec::h265::vps::Vps;
use crate::utils::nalu::NalIterator;

/// Exactly one VPS, SPS and PPS.
#[derive(Clone, Debug)]
pub struct ParameterSets {
    vps: Vps,
    sps: Sps,
    pps: Pps,
}

impl ParameterSets {
    pub fn new(vps: Vps, sps: Sps, pps: Pps) -> Self {
        Self { vps, sps, pps }
    }

    /// Builds the bundle from the first three parameter-set-like units of a
    /// stream, which must be one VPS, one SPS and one PPS in any order.
    ///
    /// Slice segments, access unit delimiters and SEI messages are skipped.
    pub fn from_units<'a, I>(units: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut vps = None;
        let mut sps = None;
        let mut pps = None;
        let mut found = 0;

        for unit in units {
            let type_ = Nalu::peek_type(unit)?;
            if type_.is_vcl()
                || matches!(
                    type_,
                    NaluType::AudNut | NaluType::PrefixSeiNut | NaluType::SuffixSeiNut
                )
            {
                continue;
            }

            let duplicate = match Nalu::load(unit, None)? {
                Nalu::Video(v) => vps.replace(v).is_some(),
                Nalu::Sequence(s) => sps.replace(s).is_some(),
                Nalu::Picture(p) => pps.replace(p).is_some(),
                _ => return Err(anyhow!("unexpected {:?} among the parameter sets", type_)),
            };
            if duplicate {
                return Err(anyhow!("duplicate {:?}", type_));
            }

            found += 1;
            if found == 3 {
                break;
            }
        }

        match (vps, sps, pps) {
            (Some(vps), Some(sps), Some(pps)) => Ok(Self::new(vps, sps, pps)),
            _ => Err(anyhow!("stream lacks one of VPS, SPS and PPS")),
        }
    }

    /// Builds the bundle from an Annex B stream.
    pub fn from_stream(stream: &[u8]) -> anyhow::Result<Self> {
        Self::from_units(NalIterator::new(stream))
    }

    pub fn vps(&self) -> &Vps {
        &self.vps
    }

    pub fn sps(&self) -> &Sps {
        &self.sps
    }

    pub fn pps(&self) -> &Pps {
        &self.pps
    }

    pub fn vps_mut(&mut self) -> &mut Vps {
        &mut self.vps
    }

    pub fn sps_mut(&mut self) -> &mut Sps {
        &mut self.sps
    }

    pub fn pps_mut(&mut self) -> &mut Pps {
        &mut self.pps
    }

    /// VPS, SPS then PPS, each with its start code.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.vps.to_bytes();
        out.extend(self.sps.to_bytes());
        out.extend(self.pps.to_bytes());
        out
    }
}
