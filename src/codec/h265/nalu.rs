// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! NAL unit classification, 7.3.1.

use anyhow::anyhow;
use anyhow::Context;
use bitreader::BitReader;
use bytes::Bytes;
use enumn::N;

use crate::bitstream_utils::BitstreamResult;
use crate::codec::h265::headers::ParameterSets;
use crate::codec::h265::pps::Pps;
use crate::codec::h265::slice::SliceKind;
use crate::codec::h265::slice::SliceSegment;
use crate::codec::h265::sps::Sps;
use crate::codec::h265::vps::Vps;
use crate::utils::bit_buffer::BitBuffer;
use crate::utils::emulation::add_emulation_prevention_and_marker;

/// Table 7-1 – NAL unit type codes and NAL unit type classes
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaluType {
    #[default]
    TrailN = 0,
    TrailR = 1,
    TsaN = 2,
    TsaR = 3,
    StsaN = 4,
    StsaR = 5,
    RadlN = 6,
    RadlR = 7,
    RaslN = 8,
    RaslR = 9,
    RsvVclN10 = 10,
    RsvVclR11 = 11,
    RsvVclN12 = 12,
    RsvVclR13 = 13,
    RsvVclN14 = 14,
    RsvVclR15 = 15,
    BlaWLp = 16,
    BlaWRadl = 17,
    BlaNLp = 18,
    IdrWRadl = 19,
    IdrNLp = 20,
    CraNut = 21,
    RsvIrapVcl22 = 22,
    RsvIrapVcl23 = 23,
    RsvVcl24 = 24,
    RsvVcl25 = 25,
    RsvVcl26 = 26,
    RsvVcl27 = 27,
    RsvVcl28 = 28,
    RsvVcl29 = 29,
    RsvVcl30 = 30,
    RsvVcl31 = 31,
    VpsNut = 32,
    SpsNut = 33,
    PpsNut = 34,
    AudNut = 35,
    EosNut = 36,
    EobNut = 37,
    FdNut = 38,
    PrefixSeiNut = 39,
    SuffixSeiNut = 40,
    RsvNvcl41 = 41,
    RsvNvcl42 = 42,
    RsvNvcl43 = 43,
    RsvNvcl44 = 44,
    RsvNvcl45 = 45,
    RsvNvcl46 = 46,
    RsvNvcl47 = 47,
    Unspec48 = 48,
    Unspec49 = 49,
    Unspec50 = 50,
    Unspec51 = 51,
    Unspec52 = 52,
    Unspec53 = 53,
    Unspec54 = 54,
    Unspec55 = 55,
    Unspec56 = 56,
    Unspec57 = 57,
    Unspec58 = 58,
    Unspec59 = 59,
    Unspec60 = 60,
    Unspec61 = 61,
    Unspec62 = 62,
    Unspec63 = 63,
}

impl NaluType {
    /// Whether this is a VCL NALU, i.e. one carrying slice data.
    pub fn is_vcl(&self) -> bool {
        (*self as u32) < Self::VpsNut as u32
    }

    /// Whether this is an IDR NALU.
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    /// The slice segment grammar used for this type, if it is one the tiles
    /// are encoded with.
    pub fn slice_kind(&self) -> Option<SliceKind> {
        match self {
            Self::IdrWRadl => Some(SliceKind::Idr),
            Self::TrailR => Some(SliceKind::TrailR),
            _ => None,
        }
    }
}

/// The 2-byte NAL unit header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaluHeader {
    /// The NALU type.
    type_: NaluType,
    /// Specifies the identifier of the layer to which a VCL NAL unit belongs or
    /// the identifier of a layer to which a non-VCL NAL unit applies.
    nuh_layer_id: u8,
    /// Minus 1 specifies a temporal identifier for the NAL unit. The value of
    /// nuh_temporal_id_plus1 shall not be equal to 0.
    nuh_temporal_id_plus1: u8,
}

impl NaluHeader {
    /// Size of the header in bytes, 7.3.1.2.
    pub const LEN: usize = 2;

    pub fn new(type_: NaluType, nuh_layer_id: u8, nuh_temporal_id_plus1: u8) -> Self {
        Self {
            type_,
            nuh_layer_id,
            nuh_temporal_id_plus1,
        }
    }

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let data = data
            .get(0..Self::LEN)
            .ok_or(anyhow!("NALU shorter than its header"))?;
        let mut r = BitReader::new(data);

        if r.read_bool()? {
            return Err(anyhow!("forbidden_zero_bit is set"));
        }

        let header = Self {
            type_: NaluType::n(r.read_u32(6)?).ok_or(anyhow!("Invalid NALU type"))?,
            nuh_layer_id: r.read_u8(6)?,
            nuh_temporal_id_plus1: r.read_u8(3)?,
        };

        if header.nuh_temporal_id_plus1 == 0 {
            return Err(anyhow!("nuh_temporal_id_plus1 is 0"));
        }

        Ok(header)
    }

    pub fn type_(&self) -> NaluType {
        self.type_
    }

    pub fn layer_id(&self) -> u8 {
        self.nuh_layer_id
    }

    pub fn temporal_id_plus1(&self) -> u8 {
        self.nuh_temporal_id_plus1
    }

    /// Appends the header to `out`.
    pub fn write(&self, out: &mut BitBuffer) -> BitstreamResult<()> {
        out.push(false);
        out.push_bits(self.type_ as u64, 6)?;
        out.push_bits(u64::from(self.nuh_layer_id), 6)?;
        out.push_bits(u64::from(self.nuh_temporal_id_plus1), 3)
    }
}

/// A NAL unit the stitcher carries without looking inside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opaque {
    header: NaluHeader,
    /// The escaped unit, header included, without start code.
    data: Bytes,
}

impl Opaque {
    pub fn header(&self) -> &NaluHeader {
        &self.header
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.data.len());
        out.extend_from_slice(&[0x00, 0x00, 0x01]);
        out.extend_from_slice(&self.data);
        out
    }
}

/// A parsed NAL unit.
#[derive(Clone, Debug)]
pub enum Nalu {
    Video(Vps),
    Sequence(Sps),
    Picture(Pps),
    AccessDelimiter(Opaque),
    Segment(SliceSegment),
    Opaque(Opaque),
}

impl Nalu {
    /// Reads the type of the NALU in `data` without parsing its payload.
    pub fn peek_type(data: &[u8]) -> anyhow::Result<NaluType> {
        NaluHeader::parse(data).map(|header| header.type_())
    }

    /// Classifies and parses one NALU (without start code).
    ///
    /// Slice segments can only be parsed against their parameter sets:
    /// loading one without `headers` fails.
    pub fn load(data: &[u8], headers: Option<&ParameterSets>) -> anyhow::Result<Self> {
        let header = NaluHeader::parse(data)?;

        let nalu = match header.type_() {
            NaluType::VpsNut => Nalu::Video(Vps::parse(header, data)?),
            NaluType::SpsNut => Nalu::Sequence(Sps::parse(header, data)?),
            NaluType::PpsNut => Nalu::Picture(Pps::parse(header, data)?),
            NaluType::AudNut => Nalu::AccessDelimiter(Opaque {
                header,
                data: Bytes::copy_from_slice(data),
            }),
            type_ => match type_.slice_kind() {
                Some(kind) => {
                    let headers = headers.ok_or(anyhow!(
                        "{:?} slice segment before its parameter sets",
                        type_
                    ))?;
                    let segment = SliceSegment::parse(header, kind, data, headers)
                        .with_context(|| format!("while parsing {:?} slice segment", type_))?;
                    Nalu::Segment(segment)
                }
                None => Nalu::Opaque(Opaque {
                    header,
                    data: Bytes::copy_from_slice(data),
                }),
            },
        };

        Ok(nalu)
    }

    pub fn header(&self) -> &NaluHeader {
        match self {
            Nalu::Video(vps) => vps.header(),
            Nalu::Sequence(sps) => sps.header(),
            Nalu::Picture(pps) => pps.header(),
            Nalu::AccessDelimiter(opaque) | Nalu::Opaque(opaque) => opaque.header(),
            Nalu::Segment(segment) => segment.header(),
        }
    }

    pub fn is_segment(&self) -> bool {
        matches!(self, Nalu::Segment(_))
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, Nalu::Segment(segment) if segment.is_keyframe())
    }

    /// The unit as it should be emitted: start code, then the escaped unit.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Nalu::Video(vps) => vps.to_bytes(),
            Nalu::Sequence(sps) => sps.to_bytes(),
            Nalu::Picture(pps) => pps.to_bytes(),
            Nalu::AccessDelimiter(opaque) | Nalu::Opaque(opaque) => opaque.to_bytes(),
            Nalu::Segment(segment) => segment.to_bytes(),
        }
    }
}

/// Escapes a de-escaped unit for emission.
pub(crate) fn escape_unit(bits: &BitBuffer) -> Vec<u8> {
    add_emulation_prevention_and_marker(&[&bits.to_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h265::synthesizer::TileEncoder;

    #[test]
    fn parse_header() {
        let header = NaluHeader::parse(&[0x40, 0x01]).unwrap();
        assert_eq!(header.type_(), NaluType::VpsNut);
        assert_eq!(header.layer_id(), 0);
        assert_eq!(header.temporal_id_plus1(), 1);

        let header = NaluHeader::parse(&[0x26, 0x01, 0xaf]).unwrap();
        assert_eq!(header.type_(), NaluType::IdrWRadl);

        assert_eq!(
            NaluHeader::parse(&[0x7e, 0x01]).unwrap().type_(),
            NaluType::Unspec63
        );
    }

    #[test]
    fn malformed_headers() {
        // forbidden_zero_bit
        assert!(NaluHeader::parse(&[0xc0, 0x01]).is_err());
        // nuh_temporal_id_plus1 == 0
        assert!(NaluHeader::parse(&[0x40, 0x00]).is_err());
        assert!(NaluHeader::parse(&[0x40]).is_err());
    }

    #[test]
    fn write_header() {
        let mut out = BitBuffer::new();
        NaluHeader::new(NaluType::PrefixSeiNut, 0, 1)
            .write(&mut out)
            .unwrap();
        assert_eq!(out.to_bytes(), vec![0x4e, 0x01]);
    }

    #[test]
    fn classify() {
        let encoder = TileEncoder::default();

        assert!(matches!(
            Nalu::load(&encoder.vps(), None).unwrap(),
            Nalu::Video(_)
        ));
        assert!(matches!(
            Nalu::load(&encoder.sps(), None).unwrap(),
            Nalu::Sequence(_)
        ));
        assert!(matches!(
            Nalu::load(&encoder.pps(), None).unwrap(),
            Nalu::Picture(_)
        ));
        assert!(matches!(
            Nalu::load(&[0x46, 0x01, 0x50], None).unwrap(),
            Nalu::AccessDelimiter(_)
        ));
        assert!(matches!(
            Nalu::load(&[0x4e, 0x01, 0x05, 0x00], None).unwrap(),
            Nalu::Opaque(_)
        ));
        // CRA is VCL, but not a slice type the tiles are encoded with.
        assert!(matches!(
            Nalu::load(&[0x2a, 0x01, 0x80], None).unwrap(),
            Nalu::Opaque(_)
        ));

        // A slice needs its parameter sets.
        assert!(Nalu::load(&encoder.idr(0), None).is_err());

        let headers = encoder.parameter_sets();
        let idr = Nalu::load(&encoder.idr(0), Some(&headers)).unwrap();
        assert!(idr.is_segment());
        assert!(idr.is_keyframe());

        let trail = Nalu::load(&encoder.trail(1, 1), Some(&headers)).unwrap();
        assert!(trail.is_segment());
        assert!(!trail.is_keyframe());
        assert_eq!(trail.header().type_(), NaluType::TrailR);
    }

    #[test]
    fn to_bytes_round_trips() {
        let encoder = TileEncoder::default();
        let headers = encoder.parameter_sets();

        for unit in [encoder.vps(), encoder.sps(), encoder.pps(), encoder.idr(0)] {
            let nalu = Nalu::load(&unit, Some(&headers)).unwrap();
            let bytes = nalu.to_bytes();
            assert_eq!(&bytes[..3], &[0x00, 0x00, 0x01]);
            assert_eq!(&bytes[3..], &unit[..]);
        }

        let aud = [0x46, 0x01, 0x50];
        assert_eq!(
            Nalu::load(&aud, None).unwrap().to_bytes(),
            vec![0x00, 0x00, 0x01, 0x46, 0x01, 0x50]
        );
    }
}
