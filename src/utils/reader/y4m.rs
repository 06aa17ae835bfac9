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

use std::fs;

#[derive(Default)]
pub struct Y4MReader;

impl Reader for Y4MReader {
    fn read_frame(&mut self, filename: &str) -> HeifResult<Image> {
        let data = fs::read(filename)
            .or(HeifError::input_does_not_exist(format!("cannot open {filename}")))?;
        let header_end = data
            .iter()
            .position(|&byte| byte == b'\n')
            .ok_or(HeifError::new(
                ErrorKind::InvalidInput,
                SubErrorKind::EndOfData,
                "truncated y4m header".into(),
            ))?;
        let header = String::from_utf8_lossy(&data[..header_end]).to_string();
        let mut width = 0u32;
        let mut height = 0u32;
        let mut format = PixelFormat::Yuv420;
        let mut depth = 8u8;
        for token in header.split_whitespace().skip(1) {
            match token.as_bytes()[0] {
                b'W' => width = token[1..].parse().unwrap_or(0),
                b'H' => height = token[1..].parse().unwrap_or(0),
                b'C' => {
                    (format, depth) = match &token[1..] {
                        "mono" => (PixelFormat::Monochrome, 8),
                        "mono10" => (PixelFormat::Monochrome, 10),
                        "mono12" => (PixelFormat::Monochrome, 12),
                        "420" | "420jpeg" | "420mpeg2" | "420paldv" => (PixelFormat::Yuv420, 8),
                        "420p10" => (PixelFormat::Yuv420, 10),
                        "420p12" => (PixelFormat::Yuv420, 12),
                        "422" => (PixelFormat::Yuv422, 8),
                        "422p10" => (PixelFormat::Yuv422, 10),
                        "422p12" => (PixelFormat::Yuv422, 12),
                        "444" => (PixelFormat::Yuv444, 8),
                        "444p10" => (PixelFormat::Yuv444, 10),
                        "444p12" => (PixelFormat::Yuv444, 12),
                        value => {
                            return HeifError::unsupported_feature(
                                SubErrorKind::UnsupportedColorConversion,
                                format!("y4m colour space {value}"),
                            )
                        }
                    }
                }
                _ => {}
            }
        }
        if width == 0 || height == 0 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidImageSize,
                "y4m header without dimensions",
            );
        }
        let mut offset = header_end + 1;
        // FRAME marker, possibly with parameters.
        let frame_end = data[offset..]
            .iter()
            .position(|&byte| byte == b'\n')
            .ok_or(HeifError::new(
                ErrorKind::InvalidInput,
                SubErrorKind::EndOfData,
                "missing y4m FRAME marker".into(),
            ))?;
        if !data[offset..].starts_with(b"FRAME") {
            return HeifError::invalid_input(SubErrorKind::Unspecified, "missing FRAME marker");
        }
        offset += frame_end + 1;

        let mut image = Image::create(width, height, depth, format);
        image.allocate_planes(false)?;
        let bytes_per_sample = if depth > 8 { 2 } else { 1 };
        let planes = if format == PixelFormat::Monochrome {
            vec![Plane::Y]
        } else {
            YUV_PLANES.to_vec()
        };
        for plane in planes {
            let samples = image.width(plane);
            for y in 0..image.height(plane) {
                let row_size = samples * bytes_per_sample;
                if offset + row_size > data.len() {
                    return HeifError::invalid_input(
                        SubErrorKind::EndOfData,
                        "truncated y4m frame",
                    );
                }
                let source = &data[offset..offset + row_size];
                if depth > 8 {
                    let source: Vec<u16> = source
                        .chunks_exact(2)
                        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                        .collect();
                    image.row16_mut(plane, y as u32)?.copy_from_slice(&source);
                } else {
                    image.row_mut(plane, y as u32)?.copy_from_slice(source);
                }
                offset += row_size;
            }
        }
        Ok(image)
    }
}
