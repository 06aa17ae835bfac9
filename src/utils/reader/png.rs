// Copyright 2026 the crabby-heif authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::image::*;
use crate::utils::reader::Reader;
use crate::*;

use std::fs::File;

#[derive(Default)]
pub struct PngReader;

impl Reader for PngReader {
    fn read_frame(&mut self, filename: &str) -> HeifResult<Image> {
        let file = File::open(filename)
            .or(HeifError::input_does_not_exist(format!("cannot open {filename}")))?;
        let decoder = png::Decoder::new(file);
        let mut reader = decoder
            .read_info()
            .or(HeifError::invalid_input(SubErrorKind::Unspecified, "png"))?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut buffer)
            .or(HeifError::invalid_input(SubErrorKind::Unspecified, "png"))?;
        let depth: u8 = match info.bit_depth {
            png::BitDepth::Eight => 8,
            png::BitDepth::Sixteen => 16,
            _ => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedBitDepth,
                    "png bit depth below 8",
                )
            }
        };
        let format = match (info.color_type, depth) {
            (png::ColorType::Grayscale, _) => PixelFormat::Monochrome,
            (png::ColorType::Rgb, 8) => PixelFormat::InterleavedRgb,
            (png::ColorType::Rgba, 8) => PixelFormat::InterleavedRgba,
            (png::ColorType::Rgb, _) => PixelFormat::InterleavedRrggbbBe,
            (png::ColorType::Rgba, _) => PixelFormat::InterleavedRrggbbaaBe,
            _ => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedColorConversion,
                    format!("png colour type {:?}", info.color_type),
                )
            }
        };
        let mut image = Image::create(info.width, info.height, depth, format);
        image.allocate_planes(false)?;
        let samples = image.width(Plane::Y);
        for y in 0..info.height {
            let source = &buffer[y as usize * info.line_size..];
            if depth == 16 {
                let source: Vec<u16> = source[..samples * 2]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                image.row16_mut(Plane::Y, y)?.copy_from_slice(&source);
            } else {
                image.row_mut(Plane::Y, y)?.copy_from_slice(&source[..samples]);
            }
        }
        Ok(image)
    }
}
