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
use crabby_heif::parser::mp4box::*;
use crabby_heif::*;
use utils::*;

// A 256x256 4:2:0 AVIF 'mini' file with no alpha, ICC, Exif or XMP, and a
// 16-byte coded payload.
fn mini_avif_file() -> Vec<u8> {
    let mut bits = BitWriter::default();
    bits.push_bits(0, 2); // version
    bits.push_bits(0, 1); // explicit_codec_types_flag
    bits.push_bits(0, 1); // float_flag
    bits.push_bits(1, 1); // full_range_flag
    bits.push_bits(0, 1); // alpha_flag
    bits.push_bits(0, 1); // explicit_cicp_flag
    bits.push_bits(0, 1); // hdr_flag
    bits.push_bits(0, 1); // icc_flag
    bits.push_bits(0, 1); // exif_flag
    bits.push_bits(0, 1); // xmp_flag
    bits.push_bits(1, 2); // chroma_subsampling: 4:2:0
    bits.push_bits(0, 3); // orientation_minus1
    bits.push_bits(1, 1); // large_dimensions_flag
    bits.push_bits(255, 15); // width_minus1
    bits.push_bits(255, 15); // height_minus1
    bits.push_bits(0, 1); // chroma_is_horizontally_centered
    bits.push_bits(0, 1); // chroma_is_vertically_centered
    bits.push_bits(0, 1); // high_bit_depth_flag
    bits.push_bits(0, 1); // large_codec_config_flag
    bits.push_bits(0, 1); // large_item_data_flag
    bits.push_bits(4, 3); // main_item_codec_config_size
    bits.push_bits(15, 15); // main_item_data_size_minus1
    bits.pad();
    // av1C: marker/version, profile/level, 4:2:0 flags.
    bits.data.extend_from_slice(&[0x81, 0x00, 0x0C, 0x00]);
    // Coded payload.
    bits.data.extend_from_slice(&[0xAB; 16]);

    let mut file = ftyp("mif3", "avif", &[]);
    file.extend_from_slice(&bmff_box("mini", &bits.data));
    file
}

const GOLDEN_DUMP: &str = "\
Box: ftyp -----
| major_brand: mif3
| minor_version: avif
| compatible_brands: []
Box: mini -----
| bytes: 29
| Box: meta -----
| | Box: hdlr -----
| | | handler_type: pict
| | Box: pitm -----
| | | item_ID: 1
| | Box: iinf -----
| | | Box: infe -----
| | | | item_ID: 1 item_type: \"av01\" item_name: \"\"
| | Box: iloc -----
| | | item_ID: 1 construction_method: 0 base_offset: 0
| | | | extent: offset: 37 size: 16
| | Box: iprp -----
| | | Box: ipco -----
| | | | Box: av1C -----
| | | | | seq_profile: 0 seq_level_idx_0: 0 high_bitdepth: 0 twelve_bit: 0 monochrome: 0 chroma_subsampling: 11 chroma_sample_position: 0
| | | | Box: ispe -----
| | | | | width: 256 height: 256
| | | | Box: pixi -----
| | | | | bits_per_channel: [8, 8, 8]
| | | | Box: colr -----
| | | | | nclx: 1/13/6 full_range: 1
| | | | Box: free ----- (entry 5)
| | | | Box: free ----- (entry 6)
| | | | Box: free ----- (entry 7)
| | | | Box: free ----- (entry 8)
| | | | Box: free ----- (entry 9)
| | | | Box: free ----- (entry 10)
| | | | Box: free ----- (entry 11)
| | | Box: ipma -----
| | | | item_ID: 1 associations: [1*, 2, 3, 4*, 5*, 9*, 10*]
";

#[test]
fn mini_file_round_trip_with_golden_dump() {
    let file = mini_avif_file();
    let mut decoder = parse_bytes(file.clone()).unwrap();
    assert_eq!(decoder.dump().unwrap(), GOLDEN_DUMP);
    assert_eq!(decoder.primary_item_id().unwrap(), 1);
    // The synthesised iloc points at the coded payload inside the mini box.
    assert_eq!(decoder.item_data(1).unwrap(), vec![0xAB; 16]);
    // Re-serialisation reproduces the top-level boxes bit-exactly.
    let rewritten = decoder.serialize().unwrap();
    assert_eq!(rewritten, file);
    // And the re-parsed dump is identical.
    let reparsed = parse_bytes(rewritten).unwrap();
    assert_eq!(reparsed.dump().unwrap(), GOLDEN_DUMP);
}

#[test]
fn mini_synthesises_item_properties() {
    let mut decoder = parse_bytes(mini_avif_file()).unwrap();
    let ispe = decoder.ispe_of(1).unwrap().unwrap();
    assert_eq!((ispe.width, ispe.height), (256, 256));
    let pixi = decoder.pixi_of(1).unwrap().unwrap();
    assert_eq!(pixi.plane_depths, vec![8, 8, 8]);
    match decoder.color_profile_of(1).unwrap() {
        ColorInformation::Nclx(nclx) => {
            assert_eq!(nclx.color_primaries, ColorPrimaries::Bt709);
            assert_eq!(nclx.transfer_characteristics, TransferCharacteristics::Srgb);
            assert_eq!(nclx.matrix_coefficients, MatrixCoefficients::Bt601);
        }
        other => panic!("expected nclx, got {other:?}"),
    }
    // The codec configuration is essential.
    let properties = decoder.properties_of(1).unwrap();
    assert!(properties.iter().any(|(property, essential)| matches!(
        property,
        ItemProperty::CodecConfiguration(CodecConfiguration::Av1(_))
    ) && *essential));
    // Decoding requires an AV1 codec plugin, which is an external
    // collaborator; without one the dispatch must fail cleanly.
    let err = decoder.decode().unwrap_err();
    assert_eq!(err.sub_kind, SubErrorKind::UnsupportedCodec);
}

#[test]
fn mini_with_gainmap_is_refused() {
    let mut bits = BitWriter::default();
    bits.push_bits(0, 2); // version
    bits.push_bits(0, 1); // explicit_codec_types_flag
    bits.push_bits(0, 1); // float_flag
    bits.push_bits(1, 1); // full_range_flag
    bits.push_bits(0, 1); // alpha_flag
    bits.push_bits(0, 1); // explicit_cicp_flag
    bits.push_bits(1, 1); // hdr_flag
    bits.push_bits(0, 1); // icc_flag
    bits.push_bits(0, 1); // exif_flag
    bits.push_bits(0, 1); // xmp_flag
    bits.push_bits(1, 2); // chroma_subsampling
    bits.push_bits(0, 3); // orientation_minus1
    bits.push_bits(0, 1); // large_dimensions_flag
    bits.push_bits(15, 7); // width_minus1
    bits.push_bits(15, 7); // height_minus1
    bits.push_bits(0, 1); // chroma_is_horizontally_centered
    bits.push_bits(0, 1); // chroma_is_vertically_centered
    bits.push_bits(0, 1); // high_bit_depth_flag
    bits.push_bits(1, 1); // gainmap_flag
    bits.pad();
    let mut file = ftyp("mif3", "avif", &[]);
    file.extend_from_slice(&bmff_box("mini", &bits.data));
    crabby_heif::init();
    let mut decoder = Decoder::default();
    decoder.set_io_vec(file);
    let err = decoder.parse().unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedFeature);
}
