// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Reference models of the tested memory and of the tested image.

use crate::{log::TestLog, random::random_bytes};

/// The expected contents of the tested memory. Every byte is either defined, with a known
/// value, or undefined, in which case any value read back is accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceMemory {
    data: Vec<u8>,
    defined: Vec<u64>,
}

/// The first byte where memory read back differs from the reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

impl ReferenceMemory {
    /// Creates a reference of `size` undefined bytes.
    pub fn new(size: usize) -> Self {
        ReferenceMemory {
            data: vec![0; size],
            defined: vec![0; size.div_ceil(64)],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn is_defined(&self, pos: usize) -> bool {
        self.defined[pos / 64] & (1 << (pos % 64)) != 0
    }

    /// Returns the byte at `pos`, or `None` if it is undefined.
    #[inline]
    pub fn get(&self, pos: usize) -> Option<u8> {
        self.is_defined(pos).then(|| self.data[pos])
    }

    #[inline]
    pub fn set(&mut self, pos: usize, value: u8) {
        self.data[pos] = value;
        self.defined[pos / 64] |= 1 << (pos % 64);
    }

    /// Defines the bytes starting at `offset` as `data`.
    pub fn set_data(&mut self, offset: usize, data: &[u8]) {
        for (i, &value) in data.iter().enumerate() {
            self.set(offset + i, value);
        }
    }

    /// Marks `len` bytes starting at `offset` as undefined.
    pub fn set_undefined(&mut self, offset: usize, len: usize) {
        let end = (offset + len).min(self.data.len());

        for pos in offset..end {
            self.defined[pos / 64] &= !(1 << (pos % 64));
        }
    }

    /// Compares the defined bytes among the first `actual.len()` bytes with `actual`.
    pub fn first_mismatch(&self, actual: &[u8]) -> Option<Mismatch> {
        actual
            .iter()
            .enumerate()
            .find_map(|(offset, &actual)| match self.get(offset) {
                Some(expected) if expected != actual => Some(Mismatch {
                    offset,
                    expected,
                    actual,
                }),
                _ => None,
            })
    }
}

impl Mismatch {
    /// Formats the mismatch as a failure of the command `name` at position `index`.
    pub fn describe(&self, index: usize, name: &str) -> String {
        format!(
            "{index}:{name} Result differs from reference, Expected: {:#04x}, Got: {:#04x}, At \
            offset: {}",
            self.expected, self.actual, self.offset,
        )
    }
}

/// The expected contents of an RGBA8 image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceImage {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 4]>,
}

impl ReferenceImage {
    /// Creates an image with every pixel set to zero.
    pub fn new(width: u32, height: u32) -> Self {
        ReferenceImage::filled(width, height, [0; 4])
    }

    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        ReferenceImage {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    /// Creates an image with the bytes generated from `seed`, in row-major RGBA order.
    pub fn from_seed(width: u32, height: u32, seed: u32) -> Self {
        let bytes = random_bytes(seed, 4 * width as usize * height as usize);

        ReferenceImage {
            width,
            height,
            pixels: bytemuck::cast_slice(&bytes).to_vec(),
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn extent(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        self.pixels[(y * self.width + x) as usize] = color;
    }

    /// Returns the pixels as tightly packed bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Returns the image scaled to `width` by `height` with nearest filtering, sampling the
    /// source at the center of every destination pixel.
    pub fn blit_nearest(&self, width: u32, height: u32) -> ReferenceImage {
        let mut scaled = ReferenceImage::new(width, height);

        for y in 0..height {
            let src_y = nearest(y, self.height, height);

            for x in 0..width {
                let src_x = nearest(x, self.width, width);
                scaled.set_pixel(x, y, self.pixel(src_x, src_y));
            }
        }

        scaled
    }

    /// Compares the image with tightly packed RGBA8 bytes and records the result in `log`.
    /// Returns whether every pixel matched exactly.
    pub fn compare(&self, log: &mut TestLog, name: &str, actual: &[u8]) -> bool {
        let expected_len = self.as_bytes().len();

        if actual.len() != expected_len {
            log.message(format!(
                "{name}: expected {expected_len} bytes of image data, got {}",
                actual.len(),
            ));

            return false;
        }

        let actual: &[[u8; 4]] = bytemuck::cast_slice(actual);
        let mut first_mismatch = None;
        let mut mismatch_count = 0;

        for (i, (expected, actual)) in self.pixels.iter().zip(actual).enumerate() {
            if expected != actual {
                let i = i as u32;
                first_mismatch.get_or_insert([i % self.width, i / self.width]);
                mismatch_count += 1;
            }
        }

        log.image_comparison(name, self.extent(), first_mismatch, mismatch_count);

        first_mismatch.is_none()
    }
}

fn nearest(dst: u32, src_len: u32, dst_len: u32) -> u32 {
    let src = (2 * u64::from(dst) + 1) * u64::from(src_len) / (2 * u64::from(dst_len));

    (src as u32).min(src_len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_bytes_are_not_compared() {
        let mut reference = ReferenceMemory::new(130);
        assert_eq!(reference.get(0), None);

        reference.set_data(60, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(reference.get(63), Some(4));
        assert_eq!(reference.get(64), Some(5));

        reference.set_undefined(62, 3);
        assert_eq!(reference.get(61), Some(2));
        assert_eq!(reference.get(62), None);
        assert_eq!(reference.get(64), None);
        assert_eq!(reference.get(65), Some(6));

        let mut actual = vec![0xff; 130];
        actual[60] = 1;
        actual[61] = 2;
        actual[65] = 6;
        actual[66] = 7;
        actual[67] = 8;
        assert_eq!(reference.first_mismatch(&actual), None);

        actual[66] = 0;
        assert_eq!(
            reference.first_mismatch(&actual),
            Some(Mismatch {
                offset: 66,
                expected: 7,
                actual: 0,
            }),
        );
    }

    #[test]
    fn mismatch_message() {
        let mismatch = Mismatch {
            offset: 12,
            expected: 0xab,
            actual: 0x01,
        };

        assert_eq!(
            mismatch.describe(3, "HostMemoryAccess"),
            "3:HostMemoryAccess Result differs from reference, Expected: 0xab, Got: 0x01, At \
            offset: 12",
        );
    }

    #[test]
    fn seeded_image_matches_seeded_bytes() {
        let image = ReferenceImage::from_seed(3, 2, 99);
        assert_eq!(image.as_bytes(), random_bytes(99, 24));
        assert_eq!(image.pixel(1, 1), image.as_bytes()[16..20]);
    }

    #[test]
    fn double_scale_blit_replicates_pixels() {
        let image = ReferenceImage::from_seed(3, 2, 1);
        let scaled = image.blit_nearest(6, 4);

        for y in 0..4 {
            for x in 0..6 {
                assert_eq!(scaled.pixel(x, y), image.pixel(x / 2, y / 2));
            }
        }

        assert_eq!(scaled.blit_nearest(3, 2), image);
    }

    #[test]
    fn compare_reports_first_mismatch() {
        let image = ReferenceImage::filled(4, 4, [0, 0, 0, 255]);
        let mut actual = image.as_bytes().to_vec();
        let mut log = TestLog::new();

        assert!(image.compare(&mut log, "match", &actual));

        actual[4 * 6] = 255;
        actual[4 * 9 + 1] = 255;
        assert!(!image.compare(&mut log, "mismatch", &actual));

        assert_eq!(
            log.entries()[1],
            crate::log::LogEntry::ImageComparison {
                name: "mismatch".to_owned(),
                width: 4,
                height: 4,
                first_mismatch: Some([2, 1]),
                mismatch_count: 2,
            },
        );
    }
}
