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
use std::io::Write;

#[derive(Default)]
pub struct Y4MWriter {
    header_written: bool,
}

impl Y4MWriter {
    fn color_space_string(image: &Image) -> HeifResult<&'static str> {
        let value = match (image.yuv_format, image.depth) {
            (PixelFormat::Monochrome, 8) => "Cmono",
            (PixelFormat::Monochrome, 10) => "Cmono10",
            (PixelFormat::Monochrome, 12) => "Cmono12",
            (PixelFormat::Yuv420, 8) => "C420jpeg",
            (PixelFormat::Yuv420, 10) => "C420p10",
            (PixelFormat::Yuv420, 12) => "C420p12",
            (PixelFormat::Yuv422, 8) => "C422",
            (PixelFormat::Yuv422, 10) => "C422p10",
            (PixelFormat::Yuv422, 12) => "C422p12",
            (PixelFormat::Yuv444, 8) => "C444",
            (PixelFormat::Yuv444, 10) => "C444p10",
            (PixelFormat::Yuv444, 12) => "C444p12",
            _ => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedColorConversion,
                    format!(
                        "no y4m representation for {:?}/{}",
                        image.yuv_format, image.depth
                    ),
                )
            }
        };
        Ok(value)
    }
}

impl Writer for Y4MWriter {
    fn write_frame(&mut self, file: &mut File, image: &Image) -> HeifResult<()> {
        if !self.header_written {
            let header = format!(
                "YUV4MPEG2 W{} H{} F25:1 Ip A0:0 {}\n",
                image.width,
                image.height,
                Self::color_space_string(image)?
            );
            file.write_all(header.as_bytes())
                .or(HeifError::invalid_input(SubErrorKind::Unspecified, "io"))?;
            self.header_written = true;
        }
        file.write_all(b"FRAME\n")
            .or(HeifError::invalid_input(SubErrorKind::Unspecified, "io"))?;
        let planes = if image.yuv_format == PixelFormat::Monochrome {
            vec![Plane::Y]
        } else {
            YUV_PLANES.to_vec()
        };
        for plane in planes {
            for y in 0..image.height(plane) {
                if image.depth > 8 {
                    let row = image.row16(plane, y as u32)?;
                    let bytes: Vec<u8> = row
                        .iter()
                        .flat_map(|sample| sample.to_le_bytes())
                        .collect();
                    file.write_all(&bytes)
                        .or(HeifError::invalid_input(SubErrorKind::Unspecified, "io"))?;
                } else {
                    file.write_all(image.row(plane, y as u32)?)
                        .or(HeifError::invalid_input(SubErrorKind::Unspecified, "io"))?;
                }
            }
        }
        Ok(())
    }
}
