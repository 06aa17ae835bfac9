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

use crate::internal_utils::stream::OStream;
use crate::internal_utils::*;
use crate::parser::mp4box::*;
use crate::utils::*;
use crate::*;

pub(crate) fn write_hdlr(stream: &mut OStream, handler_type: &str) -> HeifResult<()> {
    stream.start_full_box("hdlr", (0, 0))?;
    // unsigned int(32) pre_defined = 0;
    stream.write_u32(0)?;
    // unsigned int(32) handler_type;
    stream.write_str(handler_type)?;
    // const unsigned int(32)[3] reserved = 0;
    stream.write_u32(0)?;
    stream.write_u32(0)?;
    stream.write_u32(0)?;
    // string name;
    stream.write_str_with_nul("")?;
    stream.finish_box()
}

pub(crate) fn write_pitm(stream: &mut OStream, item_id: u32) -> HeifResult<()> {
    if item_id <= u16::MAX as u32 {
        stream.start_full_box("pitm", (0, 0))?;
        // unsigned int(16) item_ID;
        stream.write_u16(item_id as u16)?;
    } else {
        stream.start_full_box("pitm", (1, 0))?;
        // unsigned int(32) item_ID;
        stream.write_u32(item_id)?;
    }
    stream.finish_box()
}

pub(crate) fn write_grid_payload(grid: &crate::decoder::tile::Grid) -> HeifResult<Vec<u8>> {
    // ISO/IEC 23008-12 Section 6.6.2.3.2.
    let mut stream = OStream::default();
    let flags = if grid.width > 65535 || grid.height > 65535 { 1 } else { 0 };
    // unsigned int(8) version = 0;
    stream.write_u8(0)?;
    // unsigned int(8) flags;
    stream.write_u8(flags)?;
    // unsigned int(8) rows_minus_one;
    stream.write_u8(grid.rows as u8 - 1)?;
    // unsigned int(8) columns_minus_one;
    stream.write_u8(grid.columns as u8 - 1)?;
    // unsigned int(FieldLength) output_width;
    // unsigned int(FieldLength) output_height;
    if flags == 1 {
        stream.write_u32(grid.width)?;
        stream.write_u32(grid.height)?;
    } else {
        stream.write_u16(grid.width as u16)?;
        stream.write_u16(grid.height as u16)?;
    }
    Ok(stream.data)
}

pub(crate) fn write_overlay_payload(
    overlay: &crate::decoder::tile::Overlay,
) -> HeifResult<Vec<u8>> {
    // ISO/IEC 23008-12 Section 6.6.2.4.2.
    let mut stream = OStream::default();
    let wide = overlay.width > 65535
        || overlay.height > 65535
        || overlay
            .horizontal_offsets
            .iter()
            .chain(overlay.vertical_offsets.iter())
            .any(|offset| *offset > i16::MAX as i32 || *offset < i16::MIN as i32);
    // unsigned int(8) version = 0;
    stream.write_u8(0)?;
    // unsigned int(8) flags;
    stream.write_u8(if wide { 1 } else { 0 })?;
    for value in overlay.canvas_fill_value {
        // unsigned int(16) canvas_fill_value;
        stream.write_u16(value)?;
    }
    if wide {
        stream.write_u32(overlay.width)?;
        stream.write_u32(overlay.height)?;
    } else {
        stream.write_u16(overlay.width as u16)?;
        stream.write_u16(overlay.height as u16)?;
    }
    for index in 0..overlay.horizontal_offsets.len() {
        if wide {
            stream.write_i32(overlay.horizontal_offsets[index])?;
            stream.write_i32(overlay.vertical_offsets[index])?;
        } else {
            stream.write_i16(overlay.horizontal_offsets[index] as i16)?;
            stream.write_i16(overlay.vertical_offsets[index] as i16)?;
        }
    }
    Ok(stream.data)
}

fn write_nclx(stream: &mut OStream, nclx: &Nclx) -> HeifResult<()> {
    // unsigned int(32) colour_type;
    stream.write_str("nclx")?;
    // unsigned int(16) colour_primaries;
    stream.write_u16(nclx.color_primaries as u16)?;
    // unsigned int(16) transfer_characteristics;
    stream.write_u16(nclx.transfer_characteristics as u16)?;
    // unsigned int(16) matrix_coefficients;
    stream.write_u16(nclx.matrix_coefficients as u16)?;
    // unsigned int(1) full_range_flag;
    // unsigned int(7) reserved = 0;
    stream.write_u8(
        if nclx.yuv_range == crate::image::YuvRange::Full { 0x80 } else { 0x00 },
    )
}

#[allow(non_snake_case)]
fn write_uncC(stream: &mut OStream, uncc: &UncompressedConfiguration) -> HeifResult<()> {
    // ISO/IEC 23001-17 section 5.2. Always written in the version 0 full
    // form, even if the configuration was parsed from a short form.
    stream.write_u32(0)?; // version and flags.
    // unsigned int(32) profile;
    stream.write_str(if uncc.version == 0 { &uncc.profile } else { "\0\0\0\0" })?;
    // unsigned int(32) component_count;
    stream.write_u32(u32_from_usize(uncc.components.len())?)?;
    for component in &uncc.components {
        // unsigned int(16) component_index;
        stream.write_u16(component.component_index)?;
        // unsigned int(8) component_bit_depth_minus_one;
        stream.write_u8(component.bit_depth - 1)?;
        // unsigned int(8) component_format;
        stream.write_u8(component.format)?;
        // unsigned int(8) component_align_size;
        stream.write_u8(component.align_size)?;
    }
    // unsigned int(8) sampling_type;
    stream.write_u8(uncc.sampling_mode as u8)?;
    // unsigned int(8) interleave_type;
    stream.write_u8(uncc.interleave_mode as u8)?;
    // unsigned int(8) block_size;
    stream.write_u8(uncc.block_size)?;
    let mut flags = 0u8;
    if uncc.components_little_endian {
        flags |= 0x80;
    }
    if uncc.block_pad_lsb {
        flags |= 0x40;
    }
    if uncc.block_little_endian {
        flags |= 0x20;
    }
    if uncc.block_reversed {
        flags |= 0x10;
    }
    if uncc.pad_unknown {
        flags |= 0x08;
    }
    stream.write_u8(flags)?;
    // unsigned int(32) pixel_size;
    stream.write_u32(uncc.pixel_size)?;
    // unsigned int(32) row_align_size;
    stream.write_u32(uncc.row_align_size)?;
    // unsigned int(32) tile_align_size;
    stream.write_u32(uncc.tile_align_size)?;
    // unsigned int(32) num_tile_cols_minus_one;
    stream.write_u32(uncc.num_tile_cols - 1)?;
    // unsigned int(32) num_tile_rows_minus_one;
    stream.write_u32(uncc.num_tile_rows - 1)
}

fn write_cmpd(stream: &mut OStream, cmpd: &ComponentDefinitions) -> HeifResult<()> {
    // unsigned int(32) component_count;
    stream.write_u32(u32_from_usize(cmpd.components.len())?)?;
    for component in &cmpd.components {
        // unsigned int(16) component_type;
        stream.write_u16(component.component_type)?;
        if component.component_type >= 0x8000 {
            // utf8string component_type_uri;
            stream.write_str_with_nul(&component.uri)?;
        }
    }
    Ok(())
}

/// Serialises one ipco child box.
pub(crate) fn write_property(stream: &mut OStream, property: &ItemProperty) -> HeifResult<()> {
    match property {
        ItemProperty::ImageSpatialExtents(ispe) => {
            stream.start_full_box("ispe", (0, 0))?;
            // unsigned int(32) image_width;
            stream.write_u32(ispe.width)?;
            // unsigned int(32) image_height;
            stream.write_u32(ispe.height)?;
        }
        ItemProperty::PixelInformation(pixi) => {
            stream.start_full_box("pixi", (0, 0))?;
            // unsigned int(8) num_channels;
            stream.write_u8(u8_from_usize(pixi.plane_depths.len())?)?;
            for depth in &pixi.plane_depths {
                // unsigned int(8) bits_per_channel;
                stream.write_u8(*depth)?;
            }
        }
        ItemProperty::CodecConfiguration(config) => match config {
            CodecConfiguration::Av1(av1c) => {
                stream.start_box("av1C")?;
                stream.write_slice(&av1c.raw_data)?;
            }
            CodecConfiguration::Hevc(hvcc) => {
                stream.start_box("hvcC")?;
                stream.write_slice(&hvcc.raw_data)?;
            }
            CodecConfiguration::Vvc(vvcc) => {
                stream.start_box("vvcC")?;
                stream.write_slice(&vvcc.raw_data)?;
            }
            CodecConfiguration::Jpeg2000(j2kh) => {
                stream.start_box("j2kH")?;
                stream.write_slice(&j2kh.raw_data)?;
            }
            CodecConfiguration::Uncompressed(uncc) => {
                stream.start_box("uncC")?;
                write_uncC(stream, uncc)?;
            }
            CodecConfiguration::Mask(mskc) => {
                stream.start_full_box("mskC", (0, 0))?;
                // unsigned int(8) bits_per_pixel;
                stream.write_u8(mskc.bits_per_pixel)?;
            }
        },
        ItemProperty::ColorInformation(ColorInformation::Nclx(nclx)) => {
            stream.start_box("colr")?;
            write_nclx(stream, nclx)?;
        }
        ItemProperty::ColorInformation(ColorInformation::Icc(icc)) => {
            stream.start_box("colr")?;
            // unsigned int(32) colour_type;
            stream.write_str("prof")?;
            stream.write_slice(icc)?;
        }
        ItemProperty::ColorInformation(ColorInformation::Unknown) => {
            stream.start_box("colr")?;
            stream.write_str("\0\0\0\0")?;
        }
        ItemProperty::PixelAspectRatio(pasp) => {
            stream.start_box("pasp")?;
            // unsigned int(32) hSpacing;
            stream.write_u32(pasp.h_spacing)?;
            // unsigned int(32) vSpacing;
            stream.write_u32(pasp.v_spacing)?;
        }
        ItemProperty::AuxiliaryType(aux_type) => {
            stream.start_full_box("auxC", (0, 0))?;
            // string aux_type;
            stream.write_str_with_nul(aux_type)?;
        }
        ItemProperty::CleanAperture(clap) => {
            stream.start_box("clap")?;
            stream.write_ufraction(clap.width)?;
            stream.write_ufraction(clap.height)?;
            stream.write_ufraction(clap.horiz_off)?;
            stream.write_ufraction(clap.vert_off)?;
        }
        ItemProperty::ImageRotation(angle) => {
            stream.start_box("irot")?;
            // unsigned int(6) reserved = 0; unsigned int(2) angle;
            stream.write_u8(angle & 0x3)?;
        }
        ItemProperty::ImageMirror(axis) => {
            stream.start_box("imir")?;
            // unsigned int(7) reserved = 0; unsigned int(1) axis;
            stream.write_u8(axis & 0x1)?;
        }
        ItemProperty::ContentLightLevelInformation(clli) => {
            stream.start_box("clli")?;
            // unsigned int(16) max_content_light_level;
            stream.write_u16(clli.max_cll)?;
            // unsigned int(16) max_pic_average_light_level;
            stream.write_u16(clli.max_pall)?;
        }
        ItemProperty::MasteringDisplayColourVolume(mdcv) => {
            stream.start_box("mdcv")?;
            for i in 0..3 {
                stream.write_u16(mdcv.display_primaries_x[i])?;
                stream.write_u16(mdcv.display_primaries_y[i])?;
            }
            stream.write_u16(mdcv.white_point_x)?;
            stream.write_u16(mdcv.white_point_y)?;
            stream.write_u32(mdcv.max_display_mastering_luminance)?;
            stream.write_u32(mdcv.min_display_mastering_luminance)?;
        }
        ItemProperty::ComponentDefinitions(cmpd) => {
            stream.start_box("cmpd")?;
            write_cmpd(stream, cmpd)?;
        }
        ItemProperty::Unknown {
            box_type,
            uuid,
            data,
        } => {
            stream.start_box(box_type)?;
            if let Some(uuid) = uuid {
                stream.write_slice(uuid)?;
            }
            stream.write_slice(data)?;
        }
        ItemProperty::Unused => {
            // Placeholder keeping the 1-based ipco indices stable.
            stream.start_box("free")?;
        }
    }
    stream.finish_box()
}

pub(crate) fn write_iinf(stream: &mut OStream, infos: &[ItemInfo]) -> HeifResult<()> {
    stream.start_full_box("iinf", (0, 0))?;
    // unsigned int(16) entry_count;
    stream.write_u16(u16_from_usize(infos.len())?)?;
    for info in infos {
        let flags = if info.hidden { 1 } else { 0 };
        let version: u8 = if info.item_id <= u16::MAX as u32 { 2 } else { 3 };
        stream.start_full_box("infe", (version, flags))?;
        if version == 2 {
            // unsigned int(16) item_ID;
            stream.write_u16(info.item_id as u16)?;
        } else {
            // unsigned int(32) item_ID;
            stream.write_u32(info.item_id)?;
        }
        // unsigned int(16) item_protection_index;
        stream.write_u16(info.item_protection_index)?;
        // unsigned int(32) item_type;
        stream.write_str(&info.item_type)?;
        // utf8string item_name;
        stream.write_str_with_nul(&info.item_name)?;
        match info.item_type.as_str() {
            "mime" => {
                // utf8string content_type;
                stream.write_str_with_nul(&info.content_type)?;
                // utf8string content_encoding; // optional
                if !info.content_encoding.is_empty() {
                    stream.write_str_with_nul(&info.content_encoding)?;
                }
            }
            "uri " => {
                // utf8string item_uri_type;
                stream.write_str_with_nul(&info.uri_type)?;
            }
            _ => {}
        }
        stream.finish_box()?;
    }
    stream.finish_box()
}

pub(crate) fn write_iref(stream: &mut OStream, references: &[ItemReference]) -> HeifResult<()> {
    if references.is_empty() {
        return Ok(());
    }
    let wide = references
        .iter()
        .any(|r| r.from_item_id > u16::MAX as u32 || r.to_item_id > u16::MAX as u32);
    stream.start_full_box("iref", (if wide { 1 } else { 0 }, 0))?;
    // Consecutive edges sharing a type and a from id collapse into a single
    // TrackReferenceTypeBox, preserving their order.
    let mut index = 0;
    while index < references.len() {
        let reference = &references[index];
        let mut count = 1;
        while index + count < references.len()
            && references[index + count].reference_type == reference.reference_type
            && references[index + count].from_item_id == reference.from_item_id
        {
            count += 1;
        }
        stream.start_box(&reference.reference_type)?;
        if wide {
            // unsigned int(32) from_item_ID;
            stream.write_u32(reference.from_item_id)?;
            // unsigned int(16) reference_count;
            stream.write_u16(u16_from_usize(count)?)?;
            for edge in &references[index..index + count] {
                // unsigned int(32) to_item_ID;
                stream.write_u32(edge.to_item_id)?;
            }
        } else {
            // unsigned int(16) from_item_ID;
            stream.write_u16(reference.from_item_id as u16)?;
            // unsigned int(16) reference_count;
            stream.write_u16(u16_from_usize(count)?)?;
            for edge in &references[index..index + count] {
                // unsigned int(16) to_item_ID;
                stream.write_u16(edge.to_item_id as u16)?;
            }
        }
        stream.finish_box()?;
        index += count;
    }
    stream.finish_box()
}

pub(crate) fn write_ipco(stream: &mut OStream, properties: &[ItemProperty]) -> HeifResult<()> {
    stream.start_box("ipco")?;
    for property in properties {
        write_property(stream, property)?;
    }
    stream.finish_box()
}

pub(crate) fn write_ipma(
    stream: &mut OStream,
    associations: &[ItemPropertyAssociation],
) -> HeifResult<()> {
    let wide_item_ids = associations.iter().any(|a| a.item_id > u16::MAX as u32);
    let wide_indices = associations
        .iter()
        .any(|a| a.associations.iter().any(|(index, _)| *index > 127));
    stream.start_full_box(
        "ipma",
        (
            if wide_item_ids { 1 } else { 0 },
            if wide_indices { 1 } else { 0 },
        ),
    )?;
    // unsigned int(32) entry_count;
    stream.write_u32(u32_from_usize(associations.len())?)?;
    for association in associations {
        if wide_item_ids {
            // unsigned int(32) item_ID;
            stream.write_u32(association.item_id)?;
        } else {
            // unsigned int(16) item_ID;
            stream.write_u16(association.item_id as u16)?;
        }
        // unsigned int(8) association_count;
        stream.write_u8(u8_from_usize(association.associations.len())?)?;
        for (property_index, essential) in &association.associations {
            if wide_indices {
                // bit(1) essential; unsigned int(15) property_index;
                stream.write_u16(*property_index | if *essential { 0x8000 } else { 0 })?;
            } else {
                // bit(1) essential; unsigned int(7) property_index;
                stream.write_u8(
                    u8_from_usize(*property_index as usize)? | if *essential { 0x80 } else { 0 },
                )?;
            }
        }
    }
    stream.finish_box()
}

pub(crate) fn write_iprp(stream: &mut OStream, iprp: &ItemPropertyBox) -> HeifResult<()> {
    stream.start_box("iprp")?;
    write_ipco(stream, &iprp.properties)?;
    write_ipma(stream, &iprp.associations)?;
    stream.finish_box()
}

pub(crate) fn write_grpl(stream: &mut OStream, groups: &[EntityGroup]) -> HeifResult<()> {
    if groups.is_empty() {
        return Ok(());
    }
    stream.start_box("grpl")?;
    for group in groups {
        stream.start_full_box(&group.grouping_type, (0, 0))?;
        // unsigned int(32) group_id;
        stream.write_u32(group.group_id)?;
        // unsigned int(32) num_entities_in_group;
        stream.write_u32(u32_from_usize(group.entity_ids.len())?)?;
        for entity_id in &group.entity_ids {
            stream.write_u32(*entity_id)?;
        }
        stream.finish_box()?;
    }
    stream.finish_box()
}

/// Where the iloc extent offset of an item will have to be patched once the
/// mdat payload location is known, and how many bytes the offset field has.
pub(crate) struct IlocOffsetLocation {
    pub item_id: u32,
    pub offset_position: usize,
    pub offset_size: u8,
}

fn write_iloc_field(stream: &mut OStream, value: u64, field_size: u8) -> HeifResult<()> {
    if field_size == 8 {
        stream.write_u64(value)
    } else {
        stream.write_u32(u32_from_u64(value)?)
    }
}

/// Writes an iloc whose offset and length fields are 4 bytes wide, or 8
/// bytes when the accumulated payload or any preserved extent would not fit
/// a 32-bit field. Items whose construction method is 0 get a single extent
/// with a placeholder offset; the returned locations must be patched once
/// the media data is written. Items using idat (method 1) or item
/// references (method 2) keep their original extents, whose offsets are not
/// file-absolute.
pub(crate) fn write_iloc(
    stream: &mut OStream,
    entries: &[(ItemLocationEntry, u64)],
) -> HeifResult<Vec<IlocOffsetLocation>> {
    let mut locations = Vec::new();
    if entries.iter().any(|(entry, _)| entry.item_id > u16::MAX as u32) {
        return HeifError::unsupported_feature(
            SubErrorKind::Unspecified,
            "cannot write an iloc with 32-bit item ids",
        );
    }
    let needs_method = entries
        .iter()
        .any(|(entry, _)| entry.construction_method != 0);
    // The media data is appended after the metadata, so the patched offsets
    // are bounded by the total payload size plus the metadata in front of
    // it (kept as a 256 MiB headroom here). Switch every offset and length
    // field to 8 bytes once the accumulated payload or any preserved extent
    // field can no longer be expressed on 4.
    let mut total_payload: u64 = 0;
    for (_, total_size) in entries {
        checked_incr!(total_payload, *total_size);
    }
    let wide = total_payload > u32::MAX as u64 - (1 << 28)
        || entries.iter().any(|(entry, _)| {
            entry.extents.iter().any(|extent| {
                extent.size > u32::MAX as u64
                    || entry
                        .base_offset
                        .checked_add(extent.offset)
                        .map_or(true, |offset| offset > u32::MAX as u64)
            })
        });
    let field_size: u8 = if wide { 8 } else { 4 };
    stream.start_full_box("iloc", (if needs_method { 1 } else { 0 }, 0))?;
    // unsigned int(4) offset_size; unsigned int(4) length_size;
    stream.write_u8(if wide { 0x88 } else { 0x44 })?;
    // unsigned int(4) base_offset_size; unsigned int(4) index_size/reserved;
    stream.write_u8(if needs_method { 0x04 } else { 0x00 })?;
    // unsigned int(16) item_count;
    stream.write_u16(u16_from_usize(entries.len())?)?;
    for (entry, total_size) in entries {
        // unsigned int(16) item_ID;
        stream.write_u16(entry.item_id as u16)?;
        if needs_method {
            // unsigned int(12) reserved; unsigned int(4) construction_method;
            stream.write_u16(entry.construction_method as u16)?;
        }
        // unsigned int(16) data_reference_index;
        stream.write_u16(entry.data_reference_index)?;
        // No base_offset is written (base_offset_size is 0).
        match entry.construction_method {
            0 => {
                // unsigned int(16) extent_count;
                stream.write_u16(1)?;
                if needs_method {
                    // unsigned int(32) item_reference_index;
                    stream.write_u32(0)?;
                }
                locations.push(IlocOffsetLocation {
                    item_id: entry.item_id,
                    offset_position: stream.offset(),
                    offset_size: field_size,
                });
                // unsigned int(offset_size*8) extent_offset;
                write_iloc_field(stream, 0, field_size)?;
                // unsigned int(length_size*8) extent_length;
                write_iloc_field(stream, *total_size, field_size)?;
            }
            _ => {
                // unsigned int(16) extent_count;
                stream.write_u16(u16_from_usize(entry.extents.len())?)?;
                for extent in &entry.extents {
                    // unsigned int(32) item_reference_index;
                    stream.write_u32(u32_from_u64(extent.index)?)?;
                    // unsigned int(offset_size*8) extent_offset;
                    write_iloc_field(
                        stream,
                        checked_add!(entry.base_offset, extent.offset)?,
                        field_size,
                    )?;
                    // unsigned int(length_size*8) extent_length;
                    write_iloc_field(stream, extent.size, field_size)?;
                }
            }
        }
    }
    stream.finish_box()?;
    Ok(locations)
}

pub(crate) fn write_ftyp(stream: &mut OStream, ftyp: &FileTypeBox) -> HeifResult<()> {
    stream.start_box("ftyp")?;
    // unsigned int(32) major_brand;
    stream.write_str(&ftyp.major_brand)?;
    // unsigned int(32) minor_version;
    stream.write_str(&ftyp.minor_version)?;
    // unsigned int(32) compatible_brands[];
    for compatible_brand in &ftyp.compatible_brands {
        stream.write_str(compatible_brand)?;
    }
    stream.finish_box()
}

/// Appends the media data of all construction-method-0 items as a single
/// mdat box and patches the iloc extent offsets in place.
pub(crate) fn write_mdat(
    stream: &mut OStream,
    payloads: &[(u32, Vec<u8>)],
    locations: &[IlocOffsetLocation],
) -> HeifResult<()> {
    stream.start_box("mdat")?;
    for (item_id, payload) in payloads {
        let chunk_offset = stream.offset();
        stream.write_slice(payload)?;
        for location in locations.iter().filter(|l| l.item_id == *item_id) {
            if location.offset_size == 8 {
                stream.write_u64_at_offset(
                    u64_from_usize(chunk_offset)?,
                    location.offset_position,
                )?;
            } else {
                stream.write_u32_at_offset(
                    u32_from_usize(chunk_offset)?,
                    location.offset_position,
                )?;
            }
        }
    }
    stream.finish_box()
}

impl crate::decoder::Decoder {
    /// Re-serialises the parsed file: ftyp and preserved top-level boxes are
    /// emitted in their original order, the meta box is rebuilt from the
    /// parsed tables, and the media data of all file-offset items is
    /// rewritten as a single mdat with patched iloc offsets.
    pub fn serialize(&mut self) -> HeifResult<Vec<u8>> {
        let mut stream = OStream::default();
        let mut iloc_locations = Vec::new();
        let mut payloads: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut wrote_meta = false;
        // Collect the method-0 payloads first; reading them borrows the io.
        let entry_count = self.boxes.top_level.len();
        for entry_index in 0..entry_count {
            if matches!(self.boxes.top_level[entry_index], TopLevelEntry::Meta) {
                let iloc_items: Vec<(u32, u64)> = self
                    .boxes
                    .meta
                    .iloc
                    .items
                    .iter()
                    .filter(|entry| entry.construction_method == 0)
                    .map(|entry| {
                        (
                            entry.item_id,
                            entry.extents.iter().map(|extent| extent.size).sum(),
                        )
                    })
                    .collect();
                for (item_id, total_size) in iloc_items {
                    // Items without payload (such as identity derivations)
                    // still get their empty chunk.
                    let payload = if total_size == 0 {
                        Vec::new()
                    } else {
                        self.item_data(item_id)?
                    };
                    payloads.push((item_id, payload));
                }
            }
        }
        for entry in &self.boxes.top_level {
            match entry {
                TopLevelEntry::Ftyp => write_ftyp(&mut stream, &self.boxes.ftyp)?,
                TopLevelEntry::Mini { data } => {
                    stream.start_box("mini")?;
                    stream.write_slice(data)?;
                    stream.finish_box()?;
                }
                TopLevelEntry::Meta => {
                    let meta = &self.boxes.meta;
                    stream.start_full_box("meta", (0, 0))?;
                    write_hdlr(&mut stream, "pict")?;
                    write_pitm(&mut stream, meta.primary_item_id)?;
                    let iloc_entries: Vec<(ItemLocationEntry, u64)> = meta
                        .iloc
                        .items
                        .iter()
                        .map(|entry| {
                            let total: u64 =
                                entry.extents.iter().map(|extent| extent.size).sum();
                            (
                                ItemLocationEntry {
                                    item_id: entry.item_id,
                                    construction_method: entry.construction_method,
                                    data_reference_index: entry.data_reference_index,
                                    base_offset: entry.base_offset,
                                    extents: entry.extents.clone(),
                                },
                                total,
                            )
                        })
                        .collect();
                    iloc_locations = write_iloc(&mut stream, &iloc_entries)?;
                    write_iinf(&mut stream, &meta.iinf)?;
                    write_iref(&mut stream, &meta.iref)?;
                    write_iprp(&mut stream, &meta.iprp)?;
                    if !meta.idat.is_empty() {
                        stream.start_box("idat")?;
                        stream.write_slice(&meta.idat)?;
                        stream.finish_box()?;
                    }
                    write_grpl(&mut stream, &meta.grpl)?;
                    if let Some(dinf) = &meta.dinf {
                        stream.start_box("dinf")?;
                        stream.start_full_box("dref", (0, 0))?;
                        stream.write_u32(u32_from_usize(dinf.entries.len())?)?;
                        for (entry_type, self_contained) in &dinf.entries {
                            let flags = if *self_contained { 1 } else { 0 };
                            stream.start_full_box(entry_type, (0, flags))?;
                            stream.finish_box()?;
                        }
                        stream.finish_box()?;
                        stream.finish_box()?;
                    }
                    stream.finish_box()?;
                    wrote_meta = true;
                }
                TopLevelEntry::Mdat => {
                    // Re-emitted after all metadata, with patched offsets.
                }
                TopLevelEntry::Raw {
                    box_type,
                    uuid,
                    data,
                } => {
                    stream.start_box(box_type)?;
                    if let Some(uuid) = uuid {
                        stream.write_slice(uuid)?;
                    }
                    stream.write_slice(data)?;
                    stream.finish_box()?;
                }
            }
        }
        if wrote_meta && !payloads.is_empty() {
            write_mdat(&mut stream, &payloads, &iloc_locations)?;
        }
        Ok(stream.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(item_id: u32) -> ItemLocationEntry {
        ItemLocationEntry {
            item_id,
            ..ItemLocationEntry::default()
        }
    }

    #[test]
    fn iloc_stays_narrow_for_small_payloads() {
        let mut stream = OStream::default();
        let entries = vec![(entry(1), 10u64)];
        let locations = write_iloc(&mut stream, &entries).unwrap();
        // offset_size 4, length_size 4.
        assert_eq!(stream.data[12], 0x44);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].offset_size, 4);
    }

    #[test]
    fn iloc_switches_to_wide_offsets() {
        let mut stream = OStream::default();
        // The first item alone cannot be addressed with 32-bit fields.
        let entries = vec![(entry(1), 6_000_000_000u64), (entry(2), 10u64)];
        let locations = write_iloc(&mut stream, &entries).unwrap();
        // offset_size 8, length_size 8.
        assert_eq!(stream.data[12], 0x88);
        assert_eq!(locations.len(), 2);
        assert!(locations.iter().all(|location| location.offset_size == 8));
        // The declared length of the first item takes 8 bytes, right after
        // the placeholder offset.
        let length_position = locations[0].offset_position + 8;
        assert_eq!(
            stream.data[length_position..length_position + 8],
            6_000_000_000u64.to_be_bytes()
        );
    }

    #[test]
    fn wide_iloc_offsets_are_patched_in_place() {
        let mut stream = OStream::default();
        let entries = vec![(entry(1), 6_000_000_000u64), (entry(2), 10u64)];
        let locations = write_iloc(&mut stream, &entries).unwrap();
        // The declared lengths do not constrain the patching itself, so the
        // chunks can stay small here.
        let payloads = vec![(1u32, vec![0xAA; 4]), (2u32, vec![0xBB; 2])];
        write_mdat(&mut stream, &payloads, &locations).unwrap();
        for (location, marker) in locations.iter().zip([0xAAu8, 0xBB]) {
            let position = location.offset_position;
            let offset = u64::from_be_bytes(
                stream.data[position..position + 8].try_into().unwrap(),
            );
            assert_eq!(stream.data[offset as usize], marker);
        }
    }
}
