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

use crabby_heif::decoder::Decoder;
use crabby_heif::encoder::Encoder;
use crabby_heif::image::*;
use crabby_heif::parser::mp4box::*;
use crabby_heif::parser::regions::RegionGeometry;
use crabby_heif::utils::PixelAspectRatio;
use crabby_heif::*;
use utils::*;

#[test]
fn uncompressed_rgb_round_trip() {
    let mut image = rgb_image(1024, 768);
    image.pasp = Some(PixelAspectRatio {
        h_spacing: 1,
        v_spacing: 1,
    });
    let mut encoder = Encoder::create();
    let item_id = encoder.add_image(&image).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file).unwrap();
    assert_eq!(decoder.primary_item_id().unwrap(), item_id);
    // ispe reports the pixel dimensions.
    let ispe = decoder.ispe_of(item_id).unwrap().unwrap();
    assert_eq!((ispe.width, ispe.height), (1024, 768));
    // uncC declares 3 components of 8 bits.
    let properties = decoder.properties_of(item_id).unwrap();
    let uncc = properties
        .iter()
        .find_map(|(property, essential)| match property {
            ItemProperty::CodecConfiguration(CodecConfiguration::Uncompressed(uncc)) => {
                assert!(*essential);
                Some(uncc.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(uncc.components.len(), 3);
    assert!(uncc.components.iter().all(|c| c.bit_depth == 8));
    // Neither pixi nor pasp are essential.
    for (property, essential) in properties {
        match property {
            ItemProperty::PixelInformation(_) | ItemProperty::PixelAspectRatio(_) => {
                assert!(!essential)
            }
            _ => {}
        }
    }
    // Every channel byte equals the original.
    let decoded = decoder.decode().unwrap();
    assert!(images_equal(&image, &decoded));
}

#[test]
fn iloc_offsets_locate_the_item_data() {
    let image = rgb_image(32, 8);
    let mut encoder = Encoder::create();
    let item_id = encoder.add_image(&image).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file.clone()).unwrap();
    let payload = decoder.item_data(item_id).unwrap();
    // Locate the item bytes directly through the emitted iloc offsets: the
    // extents must address bytes identical to the payload.
    let item = decoder.item(item_id).unwrap();
    let mut located = Vec::new();
    for extent in &item.extents {
        let start = (item.base_offset + extent.offset) as usize;
        located.extend_from_slice(&file[start..start + extent.size as usize]);
    }
    assert_eq!(located, payload);
}

#[test]
fn serialize_parse_fixpoint() {
    let mut image = rgb_image(64, 48);
    image.irot_angle = Some(1);
    let mut encoder = Encoder::create();
    let item_id = encoder.add_image(&image).unwrap();
    encoder.add_exif(vec![7; 32], item_id).unwrap();
    let file = encoder.write().unwrap();

    let mut first = parse_bytes(file).unwrap();
    let rewritten = first.serialize().unwrap();
    let mut second = parse_bytes(rewritten.clone()).unwrap();
    // parse(serialise(parse(F))) == parse(F), structurally: the same items
    // with the same property lists and the same payload bytes.
    assert_eq!(second.item_ids().unwrap(), first.item_ids().unwrap());
    for item_id in first.item_ids().unwrap() {
        let first_type = first.item(item_id).unwrap().item_type.clone();
        let first_properties = first.properties_of(item_id).unwrap().to_vec();
        assert_eq!(first_type, second.item(item_id).unwrap().item_type);
        assert_eq!(first_properties, second.properties_of(item_id).unwrap());
        assert_eq!(
            first.item_data(item_id).unwrap(),
            second.item_data(item_id).unwrap()
        );
    }
    // Once the layout is canonical, serialisation is a byte-level fixpoint.
    let rewritten_again = second.serialize().unwrap();
    assert_eq!(rewritten_again, rewritten);
    let third = parse_bytes(rewritten_again).unwrap();
    assert_eq!(third.dump().unwrap(), second.dump().unwrap());
}

#[test]
fn box_sizes_partition_the_file() {
    let image = rgb_image(16, 16);
    let mut encoder = Encoder::create();
    encoder.add_image(&image).unwrap();
    let file = encoder.write().unwrap();
    // Every top-level box size must equal the bytes from the start of the
    // box to its end, and the boxes must exactly partition the file.
    let mut offset = 0usize;
    let mut seen = Vec::new();
    while offset < file.len() {
        let size = u32::from_be_bytes(file[offset..offset + 4].try_into().unwrap()) as usize;
        let box_type = String::from_utf8_lossy(&file[offset + 4..offset + 8]).to_string();
        assert!(size >= 8);
        assert!(offset + size <= file.len());
        seen.push(box_type);
        offset += size;
    }
    assert_eq!(offset, file.len());
    assert_eq!(seen, vec!["ftyp", "meta", "mdat"]);
}

#[test]
fn exif_block_round_trips_byte_for_byte() {
    let exif: Vec<u8> = (0..170u32).map(|i| (i % 256) as u8).collect();
    assert_eq!(exif.len(), 170);
    let image = rgb_image(64, 64);
    let mut encoder = Encoder::create();
    let item_id = encoder.add_image(&image).unwrap();
    encoder.add_exif(exif.clone(), item_id).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file).unwrap();
    let read_back = decoder.exif(None).unwrap().unwrap();
    assert_eq!(read_back, exif);
    // The metadata item itself is an Exif item with an empty content type.
    let exif_item_id = decoder
        .item_ids()
        .unwrap()
        .into_iter()
        .find(|id| *id != item_id)
        .unwrap();
    let exif_item = decoder.item(exif_item_id).unwrap();
    assert_eq!(exif_item.item_type, "Exif");
    assert_eq!(exif_item.content_type, "");
}

#[test]
fn region_item_round_trips_in_order() {
    let image = rgb_image(1280, 1024);
    let mut encoder = Encoder::create();
    let item_id = encoder.add_image(&image).unwrap();
    encoder
        .add_region_item(
            1280,
            1024,
            vec![
                RegionGeometry::Point { x: 100, y: 200 },
                RegionGeometry::Rectangle {
                    x: 150,
                    y: 250,
                    width: 30,
                    height: 50,
                },
            ],
            item_id,
        )
        .unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file).unwrap();
    let regions = decoder.region_items(None).unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].reference_width, 1280);
    assert_eq!(regions[0].reference_height, 1024);
    assert_eq!(
        regions[0].regions,
        vec![
            RegionGeometry::Point { x: 100, y: 200 },
            RegionGeometry::Rectangle {
                x: 150,
                y: 250,
                width: 30,
                height: 50,
            },
        ]
    );
}

#[test]
fn transforms_apply_in_stored_order() {
    let mut image = rgb_image(20, 10);
    image.irot_angle = Some(1);
    let mut encoder = Encoder::create();
    encoder.add_image(&image).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file).unwrap();
    let decoded = decoder.decode().unwrap();
    // A 90 degree rotation swaps the displayed dimensions.
    assert_eq!((decoded.width, decoded.height), (10, 20));
    let expected = image.rotate_ccw(1).unwrap();
    assert!(images_equal(&expected, &decoded));
}

#[test]
fn imir_axis_zero_mirrors_left_right() {
    let mut image = rgb_image(4, 2);
    image.imir_axis = Some(0);
    let mut encoder = Encoder::create();
    let item_id = encoder.add_image(&image).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file).unwrap();
    assert_eq!(decoder.mirror_of(item_id).unwrap(), Some(0));
    let decoded = decoder.decode().unwrap();
    // ISO/IEC 23008-12 Section 6.5.12: axis 0 reflects about a vertical
    // axis, so pixel columns swap left-to-right while rows stay in place.
    for y in 0..2 {
        let source = image.row(Plane::Y, y).unwrap();
        let mirrored = decoded.row(Plane::Y, y).unwrap();
        for pixel in 0..4usize {
            assert_eq!(
                mirrored[pixel * 3..pixel * 3 + 3],
                source[(3 - pixel) * 3..(3 - pixel) * 3 + 3]
            );
        }
    }
}

#[test]
fn alpha_auxiliary_is_merged() {
    let color = yuv444_image(32, 16);
    let alpha = monochrome_image(32, 16, 200);
    let mut encoder = Encoder::create();
    let color_id = encoder.add_image(&color).unwrap();
    let alpha_id = encoder.add_image(&alpha).unwrap();
    encoder
        .set_auxiliary(
            alpha_id,
            color_id,
            "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha",
        )
        .unwrap();
    encoder.set_primary_item(color_id).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file).unwrap();
    assert_eq!(
        decoder.auxiliary_role_of(alpha_id).unwrap().unwrap(),
        "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha"
    );
    let decoded = decoder.decode().unwrap();
    assert!(decoded.alpha_present);
    assert_eq!(decoded.row(Plane::A, 0).unwrap()[..32], [200u8; 32]);
}

#[test]
fn identity_item_applies_its_own_transforms() {
    let image = rgb_image(12, 8);
    let mut encoder = Encoder::create();
    let source_id = encoder.add_image(&image).unwrap();
    let iden_id = encoder
        .add_identity_image(source_id, Some(2), None)
        .unwrap();
    encoder.set_primary_item(iden_id).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file).unwrap();
    let decoded = decoder.decode().unwrap();
    let expected = image.rotate_ccw(2).unwrap();
    assert!(images_equal(&expected, &decoded));
}

#[test]
fn overlay_composition_with_clipping() {
    let background = solid_rgb_image(8, 8, 10);
    let patch = solid_rgb_image(4, 4, 250);
    let mut encoder = Encoder::create();
    let background_id = encoder.add_image(&background).unwrap();
    let patch_id = encoder.add_image(&patch).unwrap();
    let overlay_id = encoder
        .add_overlay_image(
            8,
            8,
            [0, 0, 0, u16::MAX],
            // The patch is clipped on the right and bottom edges.
            &[(background_id, 0, 0), (patch_id, 6, 6)],
        )
        .unwrap();
    encoder.set_primary_item(overlay_id).unwrap();
    let file = encoder.write().unwrap();

    let mut decoder = parse_bytes(file).unwrap();
    let decoded = decoder.decode().unwrap();
    assert_eq!((decoded.width, decoded.height), (8, 8));
    // Top-left pixel comes from the background.
    assert_eq!(decoded.row(Plane::Y, 0).unwrap()[0], 10);
    // Bottom-right pixel comes from the clipped patch.
    let last_row = decoded.row(Plane::Y, 7).unwrap();
    assert_eq!(last_row[7 * 3], 250);
}

#[test]
fn rrggbb_48bit_reading_is_guarded_by_a_flag() {
    let mut image = Image::create(4, 2, 16, PixelFormat::InterleavedRrggbbBe);
    image.allocate_planes(false).unwrap();
    for y in 0..2 {
        let row = image.row16_mut(Plane::Y, y).unwrap();
        for x in 0..12 {
            row[x] = (x as u16 + y as u16 * 12) * 1000;
        }
    }
    let mut encoder = Encoder::create();
    encoder.add_image(&image).unwrap();
    let file = encoder.write().unwrap();
    // The historical 48-bit big-endian layout is readable by default.
    let mut decoder = parse_bytes(file.clone()).unwrap();
    let decoded = decoder.decode().unwrap();
    assert_eq!(
        decoded.row16(Plane::Y, 1).unwrap(),
        image.row16(Plane::Y, 1).unwrap()
    );
    // With the flag off it is refused.
    crabby_heif::init();
    let mut decoder = Decoder::default();
    decoder.settings.allow_rrggbb_48bit = false;
    decoder.set_io_vec(file);
    decoder.parse().unwrap();
    let err = decoder.decode().unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedFeature);
}

#[test]
fn color_profile_query() {
    let mut image = rgb_image(8, 8);
    image.color_primaries = ColorPrimaries::Bt709;
    image.transfer_characteristics = TransferCharacteristics::Srgb;
    image.matrix_coefficients = MatrixCoefficients::Bt601;
    let mut encoder = Encoder::create();
    let item_id = encoder.add_image(&image).unwrap();
    let file = encoder.write().unwrap();

    let decoder = parse_bytes(file).unwrap();
    match decoder.color_profile_of(item_id).unwrap() {
        ColorInformation::Nclx(nclx) => {
            assert_eq!(nclx.color_primaries, ColorPrimaries::Bt709);
            assert_eq!(nclx.transfer_characteristics, TransferCharacteristics::Srgb);
            assert_eq!(nclx.matrix_coefficients, MatrixCoefficients::Bt601);
        }
        other => panic!("expected nclx, got {other:?}"),
    }
}
