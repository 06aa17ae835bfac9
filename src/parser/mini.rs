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

use crate::image::YuvRange;
use crate::internal_utils::stream::*;
use crate::parser::mp4box::*;
use crate::utils::*;
use crate::*;

// Implementation for ISO/IEC 23008-12 3rd edition AMD 2 low-overhead image
// file format. The MinimizedImageBox is a compact alternative to the MetaBox
// for single-image files.

pub(crate) const MINI_COLOR_ITEM_ID: u32 = 1;
pub(crate) const MINI_ALPHA_ITEM_ID: u32 = 2;
pub(crate) const MINI_EXIF_ITEM_ID: u32 = 6;
pub(crate) const MINI_XMP_ITEM_ID: u32 = 7;

// Parses a MinimizedImageBox and returns a virtually reconstructed MetaBox.
// `offset` is the absolute file offset of the mini payload, so that the
// synthesised iloc extents point into the original file.
pub(crate) fn parse_mini(stream: &mut IStream, offset: usize) -> HeifResult<MetaBox> {
    let mut meta = MetaBox::default();

    let version = stream.read_bits(2)?; // bit(2) version = 0;
    if version != 0 {
        return HeifError::invalid_input(
            SubErrorKind::UnsupportedDataVersion,
            format!("version {version} should be 0 in 'mini' box"),
        );
    }

    // flags
    let has_explicit_codec_types = stream.read_bool()?; // bit(1) explicit_codec_types_flag;
    let float_flag = stream.read_bool()?; // bit(1) float_flag;
    let full_range = stream.read_bool()?; // bit(1) full_range_flag;
    let has_alpha = stream.read_bool()?; // bit(1) alpha_flag;
    let has_explicit_cicp = stream.read_bool()?; // bit(1) explicit_cicp_flag;
    let has_hdr = stream.read_bool()?; // bit(1) hdr_flag;
    let has_icc = stream.read_bool()?; // bit(1) icc_flag;
    let has_exif = stream.read_bool()?; // bit(1) exif_flag;
    let has_xmp = stream.read_bool()?; // bit(1) xmp_flag;

    let chroma_subsampling = stream.read_bits(2)?; // bit(2) chroma_subsampling;
    let orientation = stream.read_bits(3)? + 1; // bit(3) orientation_minus1;

    // Spatial extents
    let large_dimensions_flag = stream.read_bool()?; // bit(1) large_dimensions_flag;
    // unsigned int(large_dimensions_flag ? 15 : 7) width_minus1;
    let width = stream.read_bits(if large_dimensions_flag { 15 } else { 7 })? + 1;
    // unsigned int(large_dimensions_flag ? 15 : 7) height_minus1;
    let height = stream.read_bits(if large_dimensions_flag { 15 } else { 7 })? + 1;

    // Pixel information
    let _chroma_is_horizontally_centered = if chroma_subsampling == 1 || chroma_subsampling == 2 {
        stream.read_bool()? // bit(1) chroma_is_horizontally_centered;
    } else {
        false
    };
    let _chroma_is_vertically_centered = if chroma_subsampling == 1 {
        stream.read_bool()? // bit(1) chroma_is_vertically_centered;
    } else {
        false
    };

    let bit_depth = if float_flag {
        // bit(2) bit_depth_log2_minus4; floating point samples are not used
        // by any codec this library dispatches to.
        return HeifError::unsupported_feature(
            SubErrorKind::UnsupportedBitDepth,
            "mini float_flag",
        );
    } else {
        let high_bit_depth_flag = stream.read_bool()?; // bit(1) high_bit_depth_flag;
        if high_bit_depth_flag {
            stream.read_bits(3)? + 9 // bit(3) bit_depth_minus9;
        } else {
            8
        }
    };

    let alpha_is_premultiplied = if has_alpha {
        stream.read_bool()? // bit(1) alpha_is_premultiplied;
    } else {
        false
    };

    // Colour properties
    let color_primaries;
    let transfer_characteristics;
    let matrix_coefficients;
    if has_explicit_cicp {
        color_primaries = ColorPrimaries::from(stream.read_bits(8)? as u16); // bit(8) colour_primaries;
        transfer_characteristics = TransferCharacteristics::from(stream.read_bits(8)? as u16); // bit(8) transfer_characteristics;
        matrix_coefficients = if chroma_subsampling != 0 {
            MatrixCoefficients::from(stream.read_bits(8)? as u16) // bit(8) matrix_coefficients;
        } else {
            MatrixCoefficients::Unspecified
        };
    } else {
        color_primaries = if has_icc { ColorPrimaries::Unspecified } else { ColorPrimaries::Bt709 };
        transfer_characteristics = if has_icc {
            TransferCharacteristics::Unspecified
        } else {
            TransferCharacteristics::Srgb
        };
        matrix_coefficients = if chroma_subsampling == 0 {
            MatrixCoefficients::Unspecified
        } else {
            MatrixCoefficients::Bt601
        };
    }

    let infe_type;
    if has_explicit_codec_types {
        // bit(32) infe_type;
        let infe = [
            stream.read_bits(8)? as u8,
            stream.read_bits(8)? as u8,
            stream.read_bits(8)? as u8,
            stream.read_bits(8)? as u8,
        ];
        let infe = String::from_utf8(infe.into());
        // bit(32) codec_config_type;
        let codec_config = [
            stream.read_bits(8)? as u8,
            stream.read_bits(8)? as u8,
            stream.read_bits(8)? as u8,
            stream.read_bits(8)? as u8,
        ];
        let codec_config = String::from_utf8(codec_config.into());
        if infe != Ok("av01".into()) || codec_config != Ok("av1C".into()) {
            return HeifError::unsupported_feature(
                SubErrorKind::UnsupportedCodec,
                format!("mini infe_type {infe:?} or codec_config_type {codec_config:?}"),
            );
        }
        infe_type = infe.unwrap();
    } else {
        infe_type = String::from("av01");
    }

    // High Dynamic Range properties
    let mut clli = None;
    if has_hdr {
        let has_gainmap = stream.read_bool()?; // bit(1) gainmap_flag;
        if has_gainmap {
            return HeifError::unsupported_feature(
                SubErrorKind::Unspecified,
                "mini gainmap_flag",
            );
        }
        clli = parse_mini_hdrproperties(stream)?;
    }

    // Chunk sizes
    let large_metadata_flag = if has_icc || has_exif || has_xmp {
        stream.read_bool()? // bit(1) large_metadata_flag;
    } else {
        false
    };
    let large_codec_config_flag = stream.read_bool()?; // bit(1) large_codec_config_flag;
    let large_item_data_flag = stream.read_bool()?; // bit(1) large_item_data_flag;

    let icc_data_size = if has_icc {
        // unsigned int(large_metadata_flag ? 20 : 10) icc_data_size_minus1;
        stream.read_bits(if large_metadata_flag { 20 } else { 10 })? + 1
    } else {
        0
    };

    // unsigned int(large_codec_config_flag ? 12 : 3) main_item_codec_config_size;
    let main_item_codec_config_size =
        stream.read_bits(if large_codec_config_flag { 12 } else { 3 })?;
    // unsigned int(large_item_data_flag ? 28 : 15) main_item_data_size_minus1;
    let main_item_data_size = stream.read_bits(if large_item_data_flag { 28 } else { 15 })? + 1;

    let alpha_item_data_size = if has_alpha {
        // unsigned int(large_item_data_flag ? 28 : 15) alpha_item_data_size;
        stream.read_bits(if large_item_data_flag { 28 } else { 15 })?
    } else {
        0
    };
    let mut alpha_item_codec_config_size = if has_alpha && alpha_item_data_size != 0 {
        // unsigned int(large_codec_config_flag ? 12 : 3) alpha_item_codec_config_size;
        stream.read_bits(if large_codec_config_flag { 12 } else { 3 })?
    } else {
        0
    };

    if has_exif || has_xmp {
        let exif_xmp_compressed_flag = stream.read_bool()?; // unsigned int(1) exif_xmp_compressed_flag;
        if exif_xmp_compressed_flag {
            return HeifError::unsupported_feature(
                SubErrorKind::Unspecified,
                "mini compressed Exif/XMP",
            );
        }
    }
    let exif_data_size = if has_exif {
        // unsigned int(large_metadata_flag ? 20 : 10) exif_data_size_minus_one;
        stream.read_bits(if large_metadata_flag { 20 } else { 10 })? + 1
    } else {
        0
    };
    let xmp_data_size = if has_xmp {
        // unsigned int(large_metadata_flag ? 20 : 10) xmp_data_size_minus_one;
        stream.read_bits(if large_metadata_flag { 20 } else { 10 })? + 1
    } else {
        0
    };

    // trailing_bits(); // bit padding till byte alignment
    stream.pad()?;

    // unsigned int(8) main_item_codec_config[main_item_codec_config_size];
    let main_item_codec_config = Av1CodecConfiguration::parse(
        &mut stream.sub_stream(&BoxSize::FixedSize(main_item_codec_config_size as usize))?,
    )?;
    let alpha_item_codec_config = if has_alpha && alpha_item_data_size != 0 {
        Some(if alpha_item_codec_config_size == 0 {
            alpha_item_codec_config_size = main_item_codec_config_size;
            main_item_codec_config.clone()
        } else {
            // unsigned int(8) alpha_item_codec_config[alpha_item_codec_config_size];
            Av1CodecConfiguration::parse(
                &mut stream
                    .sub_stream(&BoxSize::FixedSize(alpha_item_codec_config_size as usize))?,
            )?
        })
    } else {
        None
    };

    // The subsampling declared in the mini flags must match the codec
    // configuration.
    let declared_format = match chroma_subsampling {
        0 => PixelFormat::Monochrome,
        1 => PixelFormat::Yuv420,
        2 => PixelFormat::Yuv422,
        _ => PixelFormat::Yuv444,
    };
    if declared_format != main_item_codec_config.pixel_format() {
        return HeifError::invalid_input(
            SubErrorKind::InvalidParameterValue,
            "mismatch between mini chroma_subsampling and the codec config",
        );
    }

    // Make sure all metadata and coded chunks fit. There should be no
    // missing nor unused byte.
    let offset_till_remaining_bytes = stream.offset;
    let remaining_bytes = &stream.data[offset_till_remaining_bytes..];
    if remaining_bytes.len() as u32
        != icc_data_size + alpha_item_data_size + main_item_data_size + exif_data_size
            + xmp_data_size
    {
        return HeifError::invalid_input(SubErrorKind::InvalidBoxSize, "unexpected mini size");
    }

    let offset_till_remaining_bytes = offset + offset_till_remaining_bytes;
    let mut remaining_bytes_offset = 0usize;

    // Create the items and properties generated by the MinimizedImageBox.
    // The MinimizedImageBox always creates a fixed number of properties for
    // specification easiness; FreeSpaceBoxes act as no-op placeholders when
    // necessary. Item IDs do not have to be contiguous, whereas property
    // indices shall be 1, 2, 3, ... in order.
    meta.iprp.properties = vec![
        // entry 1
        ItemProperty::CodecConfiguration(CodecConfiguration::Av1(main_item_codec_config)),
        // entry 2
        ItemProperty::ImageSpatialExtents(ImageSpatialExtents { width, height }),
        // entry 3
        ItemProperty::PixelInformation(PixelInformation {
            plane_depths: vec![bit_depth as u8; declared_format.plane_count()],
        }),
        // entry 4
        ItemProperty::ColorInformation(ColorInformation::Nclx(Nclx {
            color_primaries,
            transfer_characteristics,
            matrix_coefficients,
            yuv_range: if full_range { YuvRange::Full } else { YuvRange::Limited },
        })),
        // entry 5
        if has_icc {
            let icc = &remaining_bytes
                [remaining_bytes_offset..(remaining_bytes_offset + icc_data_size as usize)];
            remaining_bytes_offset += icc_data_size as usize;
            ItemProperty::ColorInformation(ColorInformation::Icc(icc.into()))
        } else {
            ItemProperty::Unused
        },
        // entry 6
        match alpha_item_codec_config {
            Some(config) => {
                ItemProperty::CodecConfiguration(CodecConfiguration::Av1(config))
            }
            None => ItemProperty::Unused,
        },
        // entry 7
        if alpha_item_data_size != 0 {
            ItemProperty::AuxiliaryType("urn:mpeg:mpegB:cicp:systems:auxiliary:alpha".into())
        } else {
            ItemProperty::Unused
        },
        // entry 8
        if alpha_item_data_size != 0 {
            // The alpha av1C may not be monochrome. Some encoders do not
            // support 4:0:0 and encode alpha with placeholder chroma planes
            // that are ignored at decoding.
            ItemProperty::PixelInformation(PixelInformation {
                plane_depths: vec![bit_depth as u8],
            })
        } else {
            ItemProperty::Unused
        },
        // entry 9
        match orientation {
            3 => ItemProperty::ImageRotation(2),
            5 => ItemProperty::ImageRotation(1),
            6 => ItemProperty::ImageRotation(3),
            7 => ItemProperty::ImageRotation(1),
            8 => ItemProperty::ImageRotation(1),
            _ => ItemProperty::Unused,
        },
        // entry 10
        // Axis 0 is a left-right mirror, axis 1 top-bottom. The transposing
        // orientations 5 and 7 decompose into the rotation of entry 9
        // followed by a top-bottom or left-right mirror respectively.
        match orientation {
            2 => ItemProperty::ImageMirror(0),
            4 => ItemProperty::ImageMirror(1),
            5 => ItemProperty::ImageMirror(1),
            7 => ItemProperty::ImageMirror(0),
            _ => ItemProperty::Unused,
        },
        // entry 11
        match clli {
            Some(clli) => ItemProperty::ContentLightLevelInformation(clli),
            None => ItemProperty::Unused,
        },
    ];

    // Color item
    meta.primary_item_id = MINI_COLOR_ITEM_ID;
    meta.iinf.push(ItemInfo {
        item_id: MINI_COLOR_ITEM_ID,
        item_type: infe_type.clone(),
        ..Default::default()
    });
    meta.iprp.associations.push(ItemPropertyAssociation {
        item_id: MINI_COLOR_ITEM_ID,
        associations: vec![(1, true), (2, false), (3, false), (4, true), (5, true)],
    });
    if has_hdr {
        meta.iprp
            .associations
            .last_mut()
            .unwrap()
            .associations
            .push((11, false));
    }
    // ISO/IEC 23008-12 Section 6.5.1: descriptive properties come before
    // any other property. irot and imir are transformative, so associate
    // them last.
    meta.iprp
        .associations
        .last_mut()
        .unwrap()
        .associations
        .extend_from_slice(&[(9, true), (10, true)]);

    // Alpha item
    if has_alpha {
        meta.iinf.push(ItemInfo {
            item_id: MINI_ALPHA_ITEM_ID,
            item_type: infe_type.clone(),
            ..Default::default()
        });
        meta.iref.push(ItemReference {
            from_item_id: MINI_ALPHA_ITEM_ID,
            to_item_id: MINI_COLOR_ITEM_ID,
            reference_type: "auxl".into(),
            index: 0,
        });
        if alpha_is_premultiplied {
            meta.iref.push(ItemReference {
                from_item_id: MINI_COLOR_ITEM_ID,
                to_item_id: MINI_ALPHA_ITEM_ID,
                reference_type: "prem".into(),
                index: 0,
            });
        }
        meta.iprp.associations.push(ItemPropertyAssociation {
            item_id: MINI_ALPHA_ITEM_ID,
            associations: vec![
                (6, true),
                (2, false),
                (7, true),
                (8, false),
                (9, true),
                (10, true),
            ],
        });
    }

    // Extents. Chunks are laid out in the payload in this order: icc
    // (consumed above), alpha, main, exif, xmp.
    if has_alpha {
        meta.iloc.items.push(ItemLocationEntry {
            item_id: MINI_ALPHA_ITEM_ID,
            construction_method: 0,
            data_reference_index: 0,
            base_offset: 0,
            extents: vec![ItemLocationExtent {
                index: 0,
                offset: (offset_till_remaining_bytes + remaining_bytes_offset) as u64,
                size: alpha_item_data_size as u64,
            }],
        });
        remaining_bytes_offset += alpha_item_data_size as usize;
    }

    meta.iloc.items.push(ItemLocationEntry {
        item_id: MINI_COLOR_ITEM_ID,
        construction_method: 0,
        data_reference_index: 0,
        base_offset: 0,
        extents: vec![ItemLocationExtent {
            index: 0,
            offset: (offset_till_remaining_bytes + remaining_bytes_offset) as u64,
            size: main_item_data_size as u64,
        }],
    });
    remaining_bytes_offset += main_item_data_size as usize;

    if has_exif {
        meta.iinf.push(ItemInfo {
            item_id: MINI_EXIF_ITEM_ID,
            item_type: "Exif".into(),
            ..Default::default()
        });
        meta.iref.push(ItemReference {
            from_item_id: MINI_EXIF_ITEM_ID,
            to_item_id: MINI_COLOR_ITEM_ID,
            reference_type: "cdsc".into(),
            index: 0,
        });
        meta.iloc.items.push(ItemLocationEntry {
            item_id: MINI_EXIF_ITEM_ID,
            construction_method: 0,
            data_reference_index: 0,
            base_offset: 0,
            extents: vec![ItemLocationExtent {
                index: 0,
                offset: (offset_till_remaining_bytes + remaining_bytes_offset) as u64,
                size: exif_data_size as u64,
            }],
        });
        remaining_bytes_offset += exif_data_size as usize;
    }

    if has_xmp {
        meta.iinf.push(ItemInfo {
            item_id: MINI_XMP_ITEM_ID,
            item_type: "mime".into(),
            content_type: "application/rdf+xml".into(),
            ..Default::default()
        });
        meta.iref.push(ItemReference {
            from_item_id: MINI_XMP_ITEM_ID,
            to_item_id: MINI_COLOR_ITEM_ID,
            reference_type: "cdsc".into(),
            index: 0,
        });
        meta.iloc.items.push(ItemLocationEntry {
            item_id: MINI_XMP_ITEM_ID,
            construction_method: 0,
            data_reference_index: 0,
            base_offset: 0,
            extents: vec![ItemLocationExtent {
                index: 0,
                offset: (offset_till_remaining_bytes + remaining_bytes_offset) as u64,
                size: xmp_data_size as u64,
            }],
        });
    }

    Ok(meta)
}

fn skip_mastering_display_colour_volume(stream: &mut IStream) -> HeifResult<()> {
    for _ in [0, 1, 2] {
        stream.skip_bits(16)?; // unsigned int(16) display_primaries_x;
        stream.skip_bits(16)?; // unsigned int(16) display_primaries_y;
    }
    stream.skip_bits(16)?; // unsigned int(16) white_point_x;
    stream.skip_bits(16)?; // unsigned int(16) white_point_y;
    stream.skip_bits(32)?; // unsigned int(32) max_display_mastering_luminance;
    stream.skip_bits(32)?; // unsigned int(32) min_display_mastering_luminance;
    Ok(())
}

fn skip_content_colour_volume(stream: &mut IStream) -> HeifResult<()> {
    stream.skip_bits(2)?; // ccv_cancel_flag, ccv_persistence_flag (reserved)
    let ccv_primaries_present = stream.read_bool()?; // unsigned int(1) ccv_primaries_present_flag;
    let ccv_min_luminance_value_present = stream.read_bool()?; // unsigned int(1) ccv_min_luminance_value_present_flag;
    let ccv_max_luminance_value_present = stream.read_bool()?; // unsigned int(1) ccv_max_luminance_value_present_flag;
    let ccv_avg_luminance_value_present = stream.read_bool()?; // unsigned int(1) ccv_avg_luminance_value_present_flag;
    stream.skip_bits(2)?; // unsigned int(2) reserved = 0;
    if ccv_primaries_present {
        for _ in [0, 1, 2] {
            stream.skip_bits(32)?; // signed int(32) ccv_primaries_x[[c]];
            stream.skip_bits(32)?; // signed int(32) ccv_primaries_y[[c]];
        }
    }
    if ccv_min_luminance_value_present {
        stream.skip_bits(32)?; // unsigned int(32) ccv_min_luminance_value;
    }
    if ccv_max_luminance_value_present {
        stream.skip_bits(32)?; // unsigned int(32) ccv_max_luminance_value;
    }
    if ccv_avg_luminance_value_present {
        stream.skip_bits(32)?; // unsigned int(32) ccv_avg_luminance_value;
    }
    Ok(())
}

fn skip_ambient_viewing_environment(stream: &mut IStream) -> HeifResult<()> {
    stream.skip_bits(32)?; // unsigned int(32) ambient_illuminance;
    stream.skip_bits(16)?; // unsigned int(16) ambient_light_x;
    stream.skip_bits(16)?; // unsigned int(16) ambient_light_y;
    Ok(())
}

fn skip_reference_viewing_environment(stream: &mut IStream) -> HeifResult<()> {
    stream.skip_bits(32)?; // unsigned int(32) surround_luminance;
    stream.skip_bits(16)?; // unsigned int(16) surround_light_x;
    stream.skip_bits(16)?; // unsigned int(16) surround_light_y;
    stream.skip_bits(32)?; // unsigned int(32) periphery_luminance;
    stream.skip_bits(16)?; // unsigned int(16) periphery_light_x;
    stream.skip_bits(16)?; // unsigned int(16) periphery_light_y;
    Ok(())
}

fn parse_mini_hdrproperties(
    stream: &mut IStream,
) -> HeifResult<Option<ContentLightLevelInformation>> {
    let has_clli = stream.read_bool()?; // bit(1) clli_flag;
    let has_mdcv = stream.read_bool()?; // bit(1) mdcv_flag;
    let has_cclv = stream.read_bool()?; // bit(1) cclv_flag;
    let has_amve = stream.read_bool()?; // bit(1) amve_flag;
    let has_reve = stream.read_bool()?; // bit(1) reve_flag;
    let has_ndwt = stream.read_bool()?; // bit(1) ndwt_flag;
    let clli = if has_clli {
        // ContentLightLevel clli;
        Some(ContentLightLevelInformation {
            max_cll: stream.read_bits(16)? as u16,
            max_pall: stream.read_bits(16)? as u16,
        })
    } else {
        None
    };
    if has_mdcv {
        skip_mastering_display_colour_volume(stream)?; // MasteringDisplayColourVolume mdcv;
    }
    if has_cclv {
        skip_content_colour_volume(stream)?; // ContentColourVolume cclv;
    }
    if has_amve {
        skip_ambient_viewing_environment(stream)?; // AmbientViewingEnvironment amve;
    }
    if has_reve {
        skip_reference_viewing_environment(stream)?; // ReferenceViewingEnvironment reve;
    }
    if has_ndwt {
        stream.skip_bits(32)?; // NominalDiffuseWhite ndwt (diffuse_white_luminance);
    }
    Ok(clli)
}
