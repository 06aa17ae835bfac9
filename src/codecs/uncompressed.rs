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
use crate::internal_utils::*;
use crate::parser::mp4box::component_type;
use crate::parser::mp4box::*;
use crate::*;

// Built-in codec for ISO/IEC 23001-17 uncompressed image items ('unci').
// Supports component- and pixel-interleaved layouts of monochrome, YCbCr
// and RGB(A) images with 8 to 16 bits per component. Block packing, tiling
// and subsampled pixel interleaves are not implemented.

pub struct UncompressedCodec;

impl DecoderPlugin for UncompressedCodec {
    fn name(&self) -> &'static str {
        "uncompressed"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn supports_format(&self, format: CompressionFormat) -> bool {
        format == CompressionFormat::Uncompressed
    }

    fn new_decoder(&self, config: &DecoderConfig) -> HeifResult<Box<dyn Decoder>> {
        Ok(Box::new(UncompressedDecoder {
            config: config.clone(),
            data: Vec::new(),
        }))
    }
}

struct UncompressedDecoder {
    config: DecoderConfig,
    data: Vec<u8>,
}

// Storage layout derived from uncC + cmpd.
enum Layout {
    Monochrome,
    YCbCr(PixelFormat),
    // Output channel index (0 = R, 1 = G, 2 = B, 3 = A) of each stored
    // component, in storage order.
    Rgb(Vec<usize>),
}

fn component_roles(
    uncc: &UncompressedConfiguration,
    cmpd: Option<&ComponentDefinitions>,
) -> HeifResult<Vec<u16>> {
    let implied;
    let definitions = match cmpd {
        Some(cmpd) => cmpd,
        None => {
            implied = implied_cmpd(&uncc.profile);
            match &implied {
                Some(cmpd) => cmpd,
                None => {
                    return HeifError::invalid_input(
                        SubErrorKind::InvalidParameterValue,
                        "unci item without cmpd",
                    )
                }
            }
        }
    };
    let mut roles = Vec::new();
    for component in &uncc.components {
        let index = component.component_index as usize;
        match definitions.components.get(index) {
            Some(definition) => roles.push(definition.component_type),
            None => {
                return HeifError::invalid_input(
                    SubErrorKind::InvalidParameterValue,
                    format!("uncC component_index {index} is not defined in cmpd"),
                )
            }
        }
    }
    Ok(roles)
}

fn layout(uncc: &UncompressedConfiguration, roles: &[u16]) -> HeifResult<Layout> {
    if roles.len() == 1
        && matches!(roles[0], component_type::MONOCHROME | component_type::Y)
    {
        return Ok(Layout::Monochrome);
    }
    if roles == [component_type::Y, component_type::CB, component_type::CR] {
        let format = match uncc.sampling_mode {
            SamplingMode::NoSubsampling => PixelFormat::Yuv444,
            SamplingMode::Sampling422 => PixelFormat::Yuv422,
            SamplingMode::Sampling420 => PixelFormat::Yuv420,
            SamplingMode::Sampling411 => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedColorConversion,
                    "4:1:1 uncompressed sampling",
                )
            }
        };
        return Ok(Layout::YCbCr(format));
    }
    if uncc.sampling_mode != SamplingMode::NoSubsampling {
        return HeifError::unsupported_feature(
            SubErrorKind::UnsupportedColorConversion,
            "subsampled non-YCbCr uncompressed image",
        );
    }
    let channel_of_role = |role: u16| -> Option<usize> {
        match role {
            component_type::RED => Some(0),
            component_type::GREEN => Some(1),
            component_type::BLUE => Some(2),
            component_type::ALPHA => Some(3),
            _ => None,
        }
    };
    let mut channels = Vec::new();
    for role in roles {
        match channel_of_role(*role) {
            Some(channel) => channels.push(channel),
            None => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedColorConversion,
                    format!("uncompressed component role {role}"),
                )
            }
        }
    }
    let mut seen = channels.clone();
    seen.sort_unstable();
    if seen != (0..channels.len()).collect::<Vec<_>>() {
        return HeifError::unsupported_feature(
            SubErrorKind::UnsupportedColorConversion,
            "uncompressed component set is not RGB(A)",
        );
    }
    Ok(Layout::Rgb(channels))
}

fn aligned_row_bytes(samples: u32, bytes_per_sample: u32, row_align_size: u32) -> HeifResult<u32> {
    let row_bytes = checked_mul!(samples, bytes_per_sample)?;
    if row_align_size == 0 {
        return Ok(row_bytes);
    }
    Ok(row_bytes.div_ceil(row_align_size) * row_align_size)
}

impl UncompressedDecoder {
    fn uncc(&self) -> HeifResult<UncompressedConfiguration> {
        match &self.config.codec_config {
            Some(CodecConfiguration::Uncompressed(uncc)) => Ok(uncc.clone()),
            _ => HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                "unci item without uncC property",
            ),
        }
    }

    fn check_unsupported(&self, uncc: &UncompressedConfiguration) -> HeifResult<()> {
        if uncc.block_size != 0
            || uncc.block_pad_lsb
            || uncc.block_little_endian
            || uncc.block_reversed
        {
            return HeifError::unsupported_feature(
                SubErrorKind::InvalidParameterValue,
                "uncompressed block packing",
            );
        }
        if uncc.num_tile_cols != 1 || uncc.num_tile_rows != 1 {
            return HeifError::unsupported_feature(
                SubErrorKind::InvalidParameterValue,
                "uncompressed tiling",
            );
        }
        let depth = uncc.bit_depth();
        if !(8..=16).contains(&depth) || uncc.components.iter().any(|c| c.bit_depth != depth) {
            return HeifError::unsupported_feature(
                SubErrorKind::UnsupportedBitDepth,
                "mixed or sub-byte uncompressed component depths",
            );
        }
        if depth > 8 && depth < 16 {
            // 9..15 bit components would need block packing.
            return HeifError::unsupported_feature(
                SubErrorKind::UnsupportedBitDepth,
                format!("uncompressed component depth {depth}"),
            );
        }
        if uncc.components.iter().any(|c| c.align_size > 2) {
            return HeifError::unsupported_feature(
                SubErrorKind::InvalidParameterValue,
                "uncompressed component align_size",
            );
        }
        Ok(())
    }

    fn decode_planar(
        &self,
        uncc: &UncompressedConfiguration,
        format: PixelFormat,
    ) -> HeifResult<Image> {
        let mut image = Image::create(
            self.config.width,
            self.config.height,
            uncc.bit_depth(),
            format,
        );
        image.allocate_planes(false)?;
        let bytes_per_sample = if uncc.bit_depth() > 8 { 2u32 } else { 1u32 };
        let mut offset = 0usize;
        let planes = if format.plane_count() == 3 { YUV_PLANES.to_vec() } else { vec![Plane::Y] };
        for plane in planes {
            let samples = u32_from_usize(image.width(plane))?;
            let row_bytes = aligned_row_bytes(samples, bytes_per_sample, uncc.row_align_size)?;
            for y in 0..image.height(plane) {
                let end = checked_add!(offset, row_bytes as usize)?;
                if end > self.data.len() {
                    return HeifError::invalid_input(
                        SubErrorKind::EndOfData,
                        "uncompressed payload is shorter than the declared layout",
                    );
                }
                let source = &self.data[offset..offset + (samples * bytes_per_sample) as usize];
                if bytes_per_sample == 2 {
                    let source: Vec<u16> = source
                        .chunks_exact(2)
                        .map(|pair| {
                            if uncc.components_little_endian {
                                u16::from_le_bytes([pair[0], pair[1]])
                            } else {
                                u16::from_be_bytes([pair[0], pair[1]])
                            }
                        })
                        .collect();
                    image.row16_mut(plane, y as u32)?.copy_from_slice(&source);
                } else {
                    image.row_mut(plane, y as u32)?.copy_from_slice(source);
                }
                offset = end;
            }
        }
        Ok(image)
    }

    fn decode_interleaved(
        &self,
        uncc: &UncompressedConfiguration,
        channels: &[usize],
    ) -> HeifResult<Image> {
        let depth = uncc.bit_depth();
        let has_alpha = channels.len() == 4;
        let format = match (depth, uncc.components_little_endian, has_alpha) {
            (8, _, false) => PixelFormat::InterleavedRgb,
            (8, _, true) => PixelFormat::InterleavedRgba,
            (16, false, false) => {
                // The 48-bit big-endian RGB layout predates ISO/IEC 23001-17
                // and is only read when explicitly allowed.
                if !self.config.allow_rrggbb_48bit {
                    return HeifError::unsupported_feature(
                        SubErrorKind::UnsupportedBitDepth,
                        "48-bit big-endian interleaved RGB",
                    );
                }
                PixelFormat::InterleavedRrggbbBe
            }
            (16, true, false) => PixelFormat::InterleavedRrggbbLe,
            (16, false, true) => PixelFormat::InterleavedRrggbbaaBe,
            (16, true, true) => PixelFormat::InterleavedRrggbbaaLe,
            _ => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedBitDepth,
                    format!("interleaved uncompressed depth {depth}"),
                )
            }
        };
        let mut image = Image::create(self.config.width, self.config.height, depth, format);
        image.allocate_planes(false)?;
        let bytes_per_sample = if depth > 8 { 2u32 } else { 1u32 };
        let channel_count = u32_from_usize(channels.len())?;
        let samples_per_row = checked_mul!(self.config.width, channel_count)?;
        if uncc.pixel_size != 0
            && uncc.pixel_size != checked_mul!(channel_count, bytes_per_sample)?
        {
            return HeifError::unsupported_feature(
                SubErrorKind::InvalidParameterValue,
                "uncompressed pixel_size padding",
            );
        }
        let row_bytes = aligned_row_bytes(samples_per_row, bytes_per_sample, uncc.row_align_size)?;
        let mut offset = 0usize;
        for y in 0..self.config.height {
            let end = checked_add!(offset, row_bytes as usize)?;
            if end > self.data.len() {
                return HeifError::invalid_input(
                    SubErrorKind::EndOfData,
                    "uncompressed payload is shorter than the declared layout",
                );
            }
            let source = &self.data[offset..offset + (samples_per_row * bytes_per_sample) as usize];
            if bytes_per_sample == 2 {
                let row = image.row16_mut(Plane::Y, y)?;
                for (pixel_index, pixel) in source
                    .chunks_exact(2 * channels.len())
                    .enumerate()
                {
                    for (storage_index, channel) in channels.iter().enumerate() {
                        let pair = [pixel[storage_index * 2], pixel[storage_index * 2 + 1]];
                        let value = if uncc.components_little_endian {
                            u16::from_le_bytes(pair)
                        } else {
                            u16::from_be_bytes(pair)
                        };
                        row[pixel_index * channels.len() + channel] = value;
                    }
                }
            } else {
                let row = image.row_mut(Plane::Y, y)?;
                for (pixel_index, pixel) in source.chunks_exact(channels.len()).enumerate() {
                    for (storage_index, channel) in channels.iter().enumerate() {
                        row[pixel_index * channels.len() + channel] = pixel[storage_index];
                    }
                }
            }
            offset = end;
        }
        Ok(image)
    }
}

impl Decoder for UncompressedDecoder {
    fn push_data(&mut self, data: &[u8]) -> HeifResult<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn decode_image(&mut self) -> HeifResult<Image> {
        let uncc = self.uncc()?;
        self.check_unsupported(&uncc)?;
        let roles = component_roles(&uncc, self.config.component_definitions.as_ref())?;
        match (layout(&uncc, &roles)?, uncc.interleave_mode) {
            (Layout::Monochrome, InterleaveMode::Component | InterleaveMode::Pixel) => {
                self.decode_planar(&uncc, PixelFormat::Monochrome)
            }
            (Layout::YCbCr(format), InterleaveMode::Component) => {
                self.decode_planar(&uncc, format)
            }
            (Layout::Rgb(channels), InterleaveMode::Pixel) => {
                self.decode_interleaved(&uncc, &channels)
            }
            (_, mode) => HeifError::unsupported_feature(
                SubErrorKind::InvalidParameterValue,
                format!("uncompressed interleave mode {mode:?} for this component set"),
            ),
        }
    }

    fn set_strict_decoding(&mut self, _strict: bool) {
        // Every layout mismatch is already fatal for this codec.
    }
}

/// Builds the 'unci' payload and configuration properties for an image, for
/// the encode path. Rows are written tightly packed (row_align_size 0).
pub(crate) fn encode(
    image: &Image,
) -> HeifResult<(Vec<u8>, UncompressedConfiguration, ComponentDefinitions)> {
    let (roles, sampling_mode, interleave_mode): (Vec<u16>, _, _) = match image.yuv_format {
        PixelFormat::Monochrome => (
            vec![component_type::MONOCHROME],
            SamplingMode::NoSubsampling,
            InterleaveMode::Component,
        ),
        PixelFormat::Yuv444 => (
            vec![component_type::Y, component_type::CB, component_type::CR],
            SamplingMode::NoSubsampling,
            InterleaveMode::Component,
        ),
        PixelFormat::Yuv422 => (
            vec![component_type::Y, component_type::CB, component_type::CR],
            SamplingMode::Sampling422,
            InterleaveMode::Component,
        ),
        PixelFormat::Yuv420 => (
            vec![component_type::Y, component_type::CB, component_type::CR],
            SamplingMode::Sampling420,
            InterleaveMode::Component,
        ),
        PixelFormat::InterleavedRgb
        | PixelFormat::InterleavedRrggbbBe
        | PixelFormat::InterleavedRrggbbLe => (
            vec![component_type::RED, component_type::GREEN, component_type::BLUE],
            SamplingMode::NoSubsampling,
            InterleaveMode::Pixel,
        ),
        PixelFormat::InterleavedRgba
        | PixelFormat::InterleavedRrggbbaaBe
        | PixelFormat::InterleavedRrggbbaaLe => (
            vec![
                component_type::RED,
                component_type::GREEN,
                component_type::BLUE,
                component_type::ALPHA,
            ],
            SamplingMode::NoSubsampling,
            InterleaveMode::Pixel,
        ),
        PixelFormat::None => {
            return HeifError::invalid_input(SubErrorKind::InvalidImageSize, "empty image")
        }
    };
    let little_endian = matches!(
        image.yuv_format,
        PixelFormat::InterleavedRrggbbLe | PixelFormat::InterleavedRrggbbaaLe
    );
    let uncc = UncompressedConfiguration {
        version: 0,
        profile: "\0\0\0\0".into(),
        components: (0..roles.len())
            .map(|index| UncompressedComponent {
                component_index: index as u16,
                bit_depth: image.depth,
                format: 0,
                align_size: 0,
            })
            .collect(),
        sampling_mode,
        interleave_mode,
        components_little_endian: little_endian,
        num_tile_cols: 1,
        num_tile_rows: 1,
        ..UncompressedConfiguration::default()
    };
    // The component definitions are always written explicitly so that alpha
    // presence is never ambiguous.
    let cmpd = ComponentDefinitions {
        components: roles
            .iter()
            .map(|&role| ComponentDefinition {
                component_type: role,
                uri: String::new(),
            })
            .collect(),
    };

    let mut payload = Vec::new();
    let planes = match image.yuv_format.plane_count() {
        3 => YUV_PLANES.to_vec(),
        _ => vec![Plane::Y],
    };
    for plane in planes {
        for y in 0..image.height(plane) {
            if image.depth > 8 {
                for value in image.row16(plane, y as u32)? {
                    if little_endian {
                        payload.extend_from_slice(&value.to_le_bytes());
                    } else {
                        payload.extend_from_slice(&value.to_be_bytes());
                    }
                }
            } else {
                payload.extend_from_slice(image.row(plane, y as u32)?);
            }
        }
    }
    Ok((payload, uncc, cmpd))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder_for(image_format: PixelFormat, width: u32, height: u32, depth: u8) -> Image {
        let mut image = Image::create(width, height, depth, image_format);
        image.allocate_planes(false).unwrap();
        image
    }

    #[test]
    fn rgb_round_trip() {
        let mut image = decoder_for(PixelFormat::InterleavedRgb, 3, 2, 8);
        for y in 0..2 {
            let row = image.row_mut(Plane::Y, y).unwrap();
            for x in 0..9 {
                row[x] = (y as usize * 9 + x) as u8;
            }
        }
        let (payload, uncc, cmpd) = encode(&image).unwrap();
        assert_eq!(payload.len(), 18);
        let mut decoder = UncompressedDecoder {
            config: DecoderConfig {
                width: 3,
                height: 2,
                depth: 8,
                codec_config: Some(CodecConfiguration::Uncompressed(uncc)),
                component_definitions: Some(cmpd),
                allow_rrggbb_48bit: true,
                ..DecoderConfig::default()
            },
            data: payload,
        };
        let decoded = decoder.decode_image().unwrap();
        assert_eq!(decoded.yuv_format, PixelFormat::InterleavedRgb);
        for y in 0..2 {
            assert_eq!(
                image.row(Plane::Y, y).unwrap(),
                decoded.row(Plane::Y, y).unwrap()
            );
        }
    }

    #[test]
    fn yuv420_round_trip() {
        let mut image = decoder_for(PixelFormat::Yuv420, 4, 4, 8);
        for plane in [Plane::Y, Plane::U, Plane::V] {
            for y in 0..image.height(plane) {
                let width = image.width(plane);
                let row = image.row_mut(plane, y as u32).unwrap();
                for x in 0..width {
                    row[x] = (x + y * width) as u8 + plane as u8 * 7;
                }
            }
        }
        let (payload, uncc, cmpd) = encode(&image).unwrap();
        // 16 luma + 4 + 4 chroma samples.
        assert_eq!(payload.len(), 24);
        let mut decoder = UncompressedDecoder {
            config: DecoderConfig {
                width: 4,
                height: 4,
                depth: 8,
                codec_config: Some(CodecConfiguration::Uncompressed(uncc)),
                component_definitions: Some(cmpd),
                ..DecoderConfig::default()
            },
            data: payload,
        };
        let decoded = decoder.decode_image().unwrap();
        assert_eq!(decoded.yuv_format, PixelFormat::Yuv420);
        for plane in [Plane::Y, Plane::U, Plane::V] {
            for y in 0..image.height(plane) {
                assert_eq!(
                    image.row(plane, y as u32).unwrap(),
                    decoded.row(plane, y as u32).unwrap()
                );
            }
        }
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let image = decoder_for(PixelFormat::InterleavedRgb, 3, 2, 8);
        let (mut payload, uncc, cmpd) = encode(&image).unwrap();
        payload.pop();
        let mut decoder = UncompressedDecoder {
            config: DecoderConfig {
                width: 3,
                height: 2,
                depth: 8,
                codec_config: Some(CodecConfiguration::Uncompressed(uncc)),
                component_definitions: Some(cmpd),
                ..DecoderConfig::default()
            },
            data: payload,
        };
        let err = decoder.decode_image().unwrap_err();
        assert_eq!(err.sub_kind, SubErrorKind::EndOfData);
    }

    #[test]
    fn short_form_profile_without_cmpd() {
        // A version 1 'rgb3' profile implies the RGB component definitions.
        let uncc = UncompressedConfiguration {
            version: 1,
            profile: "rgb3".into(),
            components: (0..3)
                .map(|index| UncompressedComponent {
                    component_index: index as u16,
                    bit_depth: 8,
                    format: 0,
                    align_size: 0,
                })
                .collect(),
            interleave_mode: InterleaveMode::Pixel,
            num_tile_cols: 1,
            num_tile_rows: 1,
            ..UncompressedConfiguration::default()
        };
        let mut decoder = UncompressedDecoder {
            config: DecoderConfig {
                width: 2,
                height: 1,
                depth: 8,
                codec_config: Some(CodecConfiguration::Uncompressed(uncc)),
                component_definitions: None,
                ..DecoderConfig::default()
            },
            data: vec![1, 2, 3, 4, 5, 6],
        };
        let decoded = decoder.decode_image().unwrap();
        assert_eq!(decoded.yuv_format, PixelFormat::InterleavedRgb);
        assert_eq!(&decoded.row(Plane::Y, 0).unwrap()[..6], &[1, 2, 3, 4, 5, 6]);
    }
}
