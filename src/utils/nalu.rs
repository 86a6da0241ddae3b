// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Annex B byte stream demuxing.

const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

fn find_start_code(data: &[u8], offset: usize) -> Option<usize> {
    data.get(offset..)?
        .windows(3)
        .position(|window| window == START_CODE)
        .map(|pos| offset + pos)
}

/// Iterator over the NAL units of an Annex B byte stream.
///
/// Yields each unit's bytes without the start code and without trailing
/// zero bytes (trailing_zero_8bits, or the leading zero_byte of a following
/// 4-byte start code). Bytes before the first start code are discarded.
pub struct NalIterator<'a> {
    data: &'a [u8],
    /// Offset of the start code of the next unit, if any.
    next: Option<usize>,
}

impl<'a> NalIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            next: find_start_code(data, 0),
        }
    }
}

impl<'a> Iterator for NalIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let nalu_offset = self.next? + START_CODE.len();
            self.next = find_start_code(self.data, nalu_offset);

            let mut end = self.next.unwrap_or(self.data.len());
            while end > nalu_offset && self.data[end - 1] == 0x00 {
                // Discard trailing_zero_8bits
                end -= 1;
            }

            // Empty units between back-to-back start codes carry nothing.
            if end > nalu_offset {
                return Some(&self.data[nalu_offset..end]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_start_codes() {
        let stream = [
            0xaa, 0x00, 0x00, 0x01, 0x40, 0x01, 0x0c, 0x00, 0x00, 0x00, 0x01, 0x42, 0x01, 0x00,
            0x00, 0x01, 0x44, 0x01, 0x00, 0x00,
        ];

        let nalus: Vec<&[u8]> = NalIterator::new(&stream).collect();
        assert_eq!(
            nalus,
            vec![&[0x40, 0x01, 0x0c][..], &[0x42, 0x01][..], &[0x44, 0x01][..]]
        );
    }

    #[test]
    fn escaped_payload_is_not_split() {
        let stream = [0x00, 0x00, 0x01, 0x26, 0x01, 0x00, 0x00, 0x03, 0x01, 0x80];
        let nalus: Vec<&[u8]> = NalIterator::new(&stream).collect();
        assert_eq!(nalus, vec![&stream[3..]]);
    }

    #[test]
    fn no_start_code() {
        assert_eq!(NalIterator::new(&[0x00, 0x00, 0x02, 0x26]).count(), 0);
        assert_eq!(NalIterator::new(&[]).count(), 0);
        assert_eq!(NalIterator::new(&[0x00, 0x00, 0x01]).count(), 0);
        assert_eq!(
            NalIterator::new(&[0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x02, 0x01]).count(),
            1
        );
    }
}
