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

mod utils;

use crabby_heif::codecs;
use crabby_heif::codecs::register_decoder_plugin;
use crabby_heif::codecs::DecoderConfig;
use crabby_heif::codecs::DecoderPlugin;
use crabby_heif::decoder::Decoder;
use crabby_heif::decoder::ProgressObserver;
use crabby_heif::image::*;
use crabby_heif::parser::mp4box::*;
use crabby_heif::*;
use utils::*;

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Synthetic codec standing in for an external decoder: it produces a solid
/// image whose luma value is the first payload byte.
struct SolidColorPlugin {
    name: &'static str,
    priority: i32,
    format: CompressionFormat,
    pixel_format: PixelFormat,
    /// Overrides the payload byte when set.
    value: Option<u8>,
}

struct SolidColorDecoder {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    value: Option<u8>,
    data: Vec<u8>,
}

impl DecoderPlugin for SolidColorPlugin {
    fn name(&self) -> &'static str {
        self.name
    }
    fn priority(&self) -> i32 {
        self.priority
    }
    fn supports_format(&self, format: CompressionFormat) -> bool {
        format == self.format
    }
    fn new_decoder(&self, config: &DecoderConfig) -> HeifResult<Box<dyn codecs::Decoder>> {
        Ok(Box::new(SolidColorDecoder {
            width: config.width,
            height: config.height,
            pixel_format: self.pixel_format,
            value: self.value,
            data: Vec::new(),
        }))
    }
}

impl codecs::Decoder for SolidColorDecoder {
    fn push_data(&mut self, data: &[u8]) -> HeifResult<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }
    fn decode_image(&mut self) -> HeifResult<Image> {
        let value = match self.value {
            Some(value) => value,
            None => *self.data.first().unwrap_or(&0),
        };
        let mut image = Image::create(self.width, self.height, 8, self.pixel_format);
        image.allocate_planes(false)?;
        for plane in [Plane::Y, Plane::U, Plane::V] {
            if !image.has_plane(plane) {
                continue;
            }
            let fill = if plane == Plane::Y { value } else { 128 };
            for y in 0..image.height(plane) {
                let width = image.width(plane);
                image.row_mut(plane, y as u32)?[..width].fill(fill);
            }
        }
        Ok(image)
    }
    fn set_strict_decoding(&mut self, _strict: bool) {}
}

/// A minimal hvcC configuration: 4:2:0, 8-bit, 4-byte NAL lengths, no
/// parameter set arrays.
fn fake_hvcc() -> CodecConfiguration {
    let mut bits = BitWriter::default();
    bits.push_bits(1, 8); // configurationVersion
    for _ in 0..126 / 2 {
        bits.push_bits(0, 2); // profile/level/reserved fields
    }
    bits.push_bits(1, 2); // chroma_format_idc: 4:2:0
    bits.push_bits(0, 5);
    bits.push_bits(0, 3); // bit_depth_luma_minus8
    bits.push_bits(0, 30);
    bits.push_bits(3, 2); // lengthSizeMinusOne
    bits.push_bits(0, 8); // numOfArrays
    CodecConfiguration::Hevc(HevcCodecConfiguration {
        bitdepth: 8,
        pixel_format: PixelFormat::Yuv420,
        nal_length_size: 4,
        vps: Vec::new(),
        sps: Vec::new(),
        pps: Vec::new(),
        raw_data: bits.data,
    })
}

fn hevc_grid_file(tile_values: [u8; 4], output_width: u32, output_height: u32) -> Vec<u8> {
    crabby_heif::init();
    register_decoder_plugin(Arc::new(SolidColorPlugin {
        name: "fake-hevc",
        priority: 60,
        format: CompressionFormat::Hevc,
        pixel_format: PixelFormat::Yuv420,
        value: None,
    }));
    let mut encoder = crabby_heif::encoder::Encoder::create();
    let mut tile_ids = Vec::new();
    for value in tile_values {
        let tile_properties = Image::create(512, 512, 8, PixelFormat::Yuv420);
        let id = encoder
            .add_coded_image("hvc1", fake_hvcc(), &tile_properties, vec![value; 16])
            .unwrap();
        tile_ids.push(id);
    }
    let grid_id = encoder
        .add_grid_image(2, 2, output_width, output_height, &tile_ids)
        .unwrap();
    encoder.set_primary_item(grid_id).unwrap();
    encoder.write().unwrap()
}

#[test]
fn hevc_grid_decodes_row_major() {
    let file = hevc_grid_file([10, 20, 30, 40], 1024, 1024);
    let mut decoder = Decoder::default();
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let image = decoder.decode().unwrap();
    assert_eq!((image.width, image.height), (1024, 1024));
    assert_eq!(image.yuv_format, PixelFormat::Yuv420);
    // Tile (0,0) occupies rows 0..511, columns 0..511; tiles paste in
    // row-major order.
    let top = image.row(Plane::Y, 0).unwrap();
    assert_eq!(top[0], 10);
    assert_eq!(top[511], 10);
    assert_eq!(top[512], 20);
    let row_511 = image.row(Plane::Y, 511).unwrap();
    assert_eq!(row_511[511], 10);
    let bottom = image.row(Plane::Y, 512).unwrap();
    assert_eq!(bottom[0], 30);
    assert_eq!(bottom[1023], 40);
}

#[test]
fn grid_requires_rows_times_columns_inputs() {
    let mut file = hevc_grid_file([10, 20, 30, 40], 1024, 1024);
    // The grid payload is the last mdat chunk: rewrite rows_minus_one so
    // the declared layout no longer matches the four dimg references.
    let payload_start = file.len() - 8;
    file[payload_start + 2] = 0;
    let mut decoder = Decoder::default();
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let err = decoder.decode().unwrap_err();
    assert_eq!(err.sub_kind, SubErrorKind::InvalidGridData);
}

#[test]
fn grid_tiles_must_cover_the_canvas() {
    // 2x2 tiles of 512x512 cannot tile a 2048x512 canvas.
    let file = hevc_grid_file([10, 20, 30, 40], 2048, 512);
    let mut decoder = Decoder::default();
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let err = decoder.decode().unwrap_err();
    assert_eq!(err.sub_kind, SubErrorKind::InvalidGridData);
}

#[test]
fn grid_output_trims_right_and_bottom() {
    let file = hevc_grid_file([1, 2, 3, 4], 1000, 900);
    let mut decoder = Decoder::default();
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let image = decoder.decode().unwrap();
    assert_eq!((image.width, image.height), (1000, 900));
    let top = image.row(Plane::Y, 0).unwrap();
    assert_eq!(top[999], 2);
    let bottom = image.row(Plane::Y, 899).unwrap();
    assert_eq!(bottom[0], 3);
    assert_eq!(bottom[999], 4);
}

#[test]
fn uncompressed_grid_single_threaded() {
    crabby_heif::init();
    let mut encoder = crabby_heif::encoder::Encoder::create();
    let tiles = [
        solid_rgb_image(64, 64, 11),
        solid_rgb_image(64, 64, 22),
        solid_rgb_image(64, 64, 33),
        solid_rgb_image(64, 64, 44),
    ];
    let tile_ids: Vec<u32> = tiles
        .iter()
        .map(|tile| encoder.add_image(tile).unwrap())
        .collect();
    let grid_id = encoder.add_grid_image(2, 2, 128, 128, &tile_ids).unwrap();
    encoder.set_primary_item(grid_id).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = Decoder::default();
    decoder.settings.max_threads = 1;
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let image = decoder.decode().unwrap();
    assert_eq!(image.row(Plane::Y, 0).unwrap()[0], 11);
    assert_eq!(image.row(Plane::Y, 0).unwrap()[127 * 3], 22);
    assert_eq!(image.row(Plane::Y, 127).unwrap()[0], 33);
    assert_eq!(image.row(Plane::Y, 127).unwrap()[127 * 3], 44);
}

struct CancelingObserver {
    after_steps: u32,
    seen: AtomicU32,
}

impl ProgressObserver for CancelingObserver {
    fn on_progress(&self, completed_steps: u32) {
        self.seen.store(completed_steps, Ordering::SeqCst);
    }
    fn is_cancelled(&self) -> bool {
        self.seen.load(Ordering::SeqCst) >= self.after_steps
    }
}

#[test]
fn cancellation_between_tiles() {
    crabby_heif::init();
    let mut encoder = crabby_heif::encoder::Encoder::create();
    let tiles = [
        solid_rgb_image(64, 64, 1),
        solid_rgb_image(64, 64, 2),
        solid_rgb_image(64, 64, 3),
        solid_rgb_image(64, 64, 4),
    ];
    let tile_ids: Vec<u32> = tiles
        .iter()
        .map(|tile| encoder.add_image(tile).unwrap())
        .collect();
    let grid_id = encoder.add_grid_image(2, 2, 128, 128, &tile_ids).unwrap();
    encoder.set_primary_item(grid_id).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = Decoder::default();
    decoder.settings.max_threads = 1; // deterministic tile order
    decoder.settings.progress = Some(Arc::new(CancelingObserver {
        after_steps: 1,
        seen: AtomicU32::new(0),
    }));
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let err = decoder.decode().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Canceled);
}

#[test]
fn plugin_priority_selects_the_decoder() {
    crabby_heif::init();
    register_decoder_plugin(Arc::new(SolidColorPlugin {
        name: "vvc-low",
        priority: 10,
        format: CompressionFormat::Vvc,
        pixel_format: PixelFormat::Yuv444,
        value: Some(1),
    }));
    register_decoder_plugin(Arc::new(SolidColorPlugin {
        name: "vvc-high",
        priority: 90,
        format: CompressionFormat::Vvc,
        pixel_format: PixelFormat::Yuv444,
        value: Some(99),
    }));
    let vvcc = CodecConfiguration::Vvc(VvcCodecConfiguration {
        nal_length_size: 4,
        ptl_present: false,
        chroma_format_idc: None,
        bitdepth: None,
        raw_data: vec![0xFE],
    });
    let mut encoder = crabby_heif::encoder::Encoder::create();
    let properties = Image::create(16, 16, 8, PixelFormat::Yuv444);
    encoder
        .add_coded_image("vvc1", vvcc, &properties, vec![0; 4])
        .unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = Decoder::default();
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let image = decoder.decode().unwrap();
    assert_eq!(image.row(Plane::Y, 0).unwrap()[0], 99);
}

#[test]
fn missing_codec_plugin_is_unsupported() {
    crabby_heif::init();
    let mut encoder = crabby_heif::encoder::Encoder::create();
    let properties = Image::create(8, 8, 8, PixelFormat::Yuv444);
    // No plugin is registered for JPEG 2000.
    let j2k = CodecConfiguration::Jpeg2000(Jpeg2000CodecConfiguration {
        raw_data: vec![0xAA; 4],
    });
    encoder
        .add_coded_image("j2k1", j2k, &properties, vec![0; 4])
        .unwrap();
    let file = encoder.write().unwrap();
    let mut decoder = Decoder::default();
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let err = decoder.decode().unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedFeature);
    assert_eq!(err.sub_kind, SubErrorKind::UnsupportedCodec);
}
