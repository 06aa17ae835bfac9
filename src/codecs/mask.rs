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

use crate::codecs::Decoder;
use crate::codecs::DecoderConfig;
use crate::codecs::DecoderPlugin;
use crate::image::*;
use crate::parser::mp4box::CodecConfiguration;
use crate::*;

// Built-in codec for mask image items ('mski', ISO/IEC 23008-12:2022
// section 6.10.2). The payload is the raw mask plane, row by row.

pub struct MaskCodec;

impl DecoderPlugin for MaskCodec {
    fn name(&self) -> &'static str {
        "mask"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn supports_format(&self, format: CompressionFormat) -> bool {
        format == CompressionFormat::Mask
    }

    fn new_decoder(&self, config: &DecoderConfig) -> HeifResult<Box<dyn Decoder>> {
        Ok(Box::new(MaskDecoder {
            config: config.clone(),
            data: Vec::new(),
        }))
    }
}

struct MaskDecoder {
    config: DecoderConfig,
    data: Vec<u8>,
}

impl Decoder for MaskDecoder {
    fn push_data(&mut self, data: &[u8]) -> HeifResult<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn decode_image(&mut self) -> HeifResult<Image> {
        let bits_per_pixel = match &self.config.codec_config {
            Some(CodecConfiguration::Mask(mskc)) => mskc.bits_per_pixel,
            _ => {
                return HeifError::invalid_input(
                    SubErrorKind::InvalidParameterValue,
                    "mski item without mskC property",
                )
            }
        };
        if bits_per_pixel != 8 && bits_per_pixel != 16 {
            return HeifError::unsupported_feature(
                SubErrorKind::UnsupportedBitDepth,
                format!("mask bits_per_pixel {bits_per_pixel}"),
            );
        }
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let bytes_per_sample = (bits_per_pixel / 8) as usize;
        if self.data.len() < width * height * bytes_per_sample {
            return HeifError::invalid_input(
                SubErrorKind::EndOfData,
                "mask payload is shorter than width x height",
            );
        }
        let mut image = Image::create(
            self.config.width,
            self.config.height,
            bits_per_pixel,
            PixelFormat::Monochrome,
        );
        image.allocate_planes(false)?;
        for y in 0..height {
            let source = &self.data[y * width * bytes_per_sample..];
            if bits_per_pixel == 16 {
                let source: Vec<u16> = source[..width * 2]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                image.row16_mut(Plane::Y, y as u32)?.copy_from_slice(&source);
            } else {
                image
                    .row_mut(Plane::Y, y as u32)?
                    .copy_from_slice(&source[..width]);
            }
        }
        Ok(image)
    }

    fn set_strict_decoding(&mut self, _strict: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mp4box::MaskConfiguration;

    #[test]
    fn mask_decode() {
        let mut decoder = MaskDecoder {
            config: DecoderConfig {
                width: 2,
                height: 2,
                depth: 8,
                codec_config: Some(CodecConfiguration::Mask(MaskConfiguration {
                    bits_per_pixel: 8,
                })),
                ..DecoderConfig::default()
            },
            data: vec![0, 255, 128, 64],
        };
        let image = decoder.decode_image().unwrap();
        assert_eq!(image.yuv_format, PixelFormat::Monochrome);
        assert_eq!(image.row(Plane::Y, 0).unwrap(), &[0, 255]);
        assert_eq!(image.row(Plane::Y, 1).unwrap(), &[128, 64]);
    }
}
