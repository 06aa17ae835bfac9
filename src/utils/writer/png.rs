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
use crate::utils::writer::Writer;
use crate::*;

use std::fs::File;
use std::io::BufWriter;

#[derive(Default)]
pub struct PngWriter;

impl Writer for PngWriter {
    fn write_frame(&mut self, file: &mut File, image: &Image) -> HeifResult<()> {
        let (color_type, channels) = match image.yuv_format {
            PixelFormat::Monochrome => (png::ColorType::Grayscale, 1usize),
            PixelFormat::InterleavedRgb
            | PixelFormat::InterleavedRrggbbBe
            | PixelFormat::InterleavedRrggbbLe => (png::ColorType::Rgb, 3),
            PixelFormat::InterleavedRgba
            | PixelFormat::InterleavedRrggbbaaBe
            | PixelFormat::InterleavedRrggbbaaLe => (png::ColorType::Rgba, 4),
            _ => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedColorConversion,
                    "png output requires an RGB or monochrome image",
                )
            }
        };
        let bit_depth = if image.depth > 8 { png::BitDepth::Sixteen } else { png::BitDepth::Eight };
        let mut encoder = png::Encoder::new(BufWriter::new(file), image.width, image.height);
        encoder.set_color(color_type);
        encoder.set_depth(bit_depth);
        let mut writer = encoder
            .write_header()
            .or(HeifError::invalid_input(SubErrorKind::Unspecified, "png"))?;
        let mut data =
            Vec::with_capacity(image.width as usize * image.height as usize * channels * 2);
        // PNG 16-bit samples are big-endian; samples below 16 bits are
        // scaled up to the full range.
        let shift = if image.depth > 8 { 16 - image.depth as u32 } else { 0 };
        for y in 0..image.height {
            if image.depth > 8 {
                for sample in image.row16(Plane::Y, y)? {
                    data.extend_from_slice(&((*sample as u32) << shift).to_be_bytes()[2..]);
                }
            } else {
                data.extend_from_slice(image.row(Plane::Y, y)?);
            }
        }
        writer
            .write_image_data(&data)
            .or(HeifError::invalid_input(SubErrorKind::Unspecified, "png"))
    }
}
