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

use crate::parser::mp4box::*;
use crate::utils::*;

use std::fmt::Write;

// Deterministic, stable debug dump of a parsed file. The output is part of
// the test surface, so field order and formatting must not depend on
// anything but the parsed content.

#[derive(Clone, Copy, Default)]
struct Indent(usize);

impl Indent {
    fn deeper(self) -> Indent {
        Indent(self.0 + 1)
    }

    fn prefix(self) -> String {
        "| ".repeat(self.0)
    }
}

fn line(out: &mut String, indent: Indent, text: &str) {
    let _ = writeln!(out, "{}{}", indent.prefix(), text);
}

fn dump_ftyp(out: &mut String, indent: Indent, ftyp: &FileTypeBox) {
    line(out, indent, "Box: ftyp -----");
    let indent = indent.deeper();
    line(out, indent, &format!("major_brand: {}", ftyp.major_brand));
    line(
        out,
        indent,
        &format!("minor_version: {}", ftyp.minor_version),
    );
    line(
        out,
        indent,
        &format!(
            "compatible_brands: [{}]",
            ftyp.compatible_brands.join(", ")
        ),
    );
}

fn dump_nclx(out: &mut String, indent: Indent, nclx: &Nclx) {
    line(
        out,
        indent,
        &format!(
            "nclx: {}/{}/{} full_range: {}",
            nclx.color_primaries as u16,
            nclx.transfer_characteristics as u16,
            nclx.matrix_coefficients as u16,
            (nclx.yuv_range == crate::image::YuvRange::Full) as u8
        ),
    );
}

fn dump_codec_configuration(out: &mut String, indent: Indent, config: &CodecConfiguration) {
    match config {
        CodecConfiguration::Av1(config) => {
            line(out, indent, "Box: av1C -----");
            let indent = indent.deeper();
            line(
                out,
                indent,
                &format!(
                    "seq_profile: {} seq_level_idx_0: {} high_bitdepth: {} twelve_bit: {} \
                     monochrome: {} chroma_subsampling: {}{} chroma_sample_position: {}",
                    config.seq_profile,
                    config.seq_level_idx0,
                    config.high_bitdepth as u8,
                    config.twelve_bit as u8,
                    config.monochrome as u8,
                    config.chroma_subsampling_x,
                    config.chroma_subsampling_y,
                    config.chroma_sample_position as u8
                ),
            );
        }
        CodecConfiguration::Hevc(config) => {
            line(out, indent, "Box: hvcC -----");
            let indent = indent.deeper();
            line(
                out,
                indent,
                &format!(
                    "bit_depth: {} chroma: {:?} nal_length_size: {} vps/sps/pps bytes: {}/{}/{}",
                    config.bitdepth,
                    config.pixel_format,
                    config.nal_length_size,
                    config.vps.len(),
                    config.sps.len(),
                    config.pps.len()
                ),
            );
        }
        CodecConfiguration::Vvc(config) => {
            line(out, indent, "Box: vvcC -----");
            let indent = indent.deeper();
            line(
                out,
                indent,
                &format!(
                    "nal_length_size: {} ptl_present: {}",
                    config.nal_length_size, config.ptl_present as u8
                ),
            );
        }
        CodecConfiguration::Jpeg2000(config) => {
            line(out, indent, "Box: j2kH -----");
            let indent = indent.deeper();
            line(out, indent, &format!("bytes: {}", config.raw_data.len()));
        }
        CodecConfiguration::Uncompressed(config) => {
            line(out, indent, "Box: uncC -----");
            let indent = indent.deeper();
            line(
                out,
                indent,
                &format!("version: {} profile: {:?}", config.version, config.profile),
            );
            for component in &config.components {
                line(
                    out,
                    indent,
                    &format!(
                        "component_index: {} bit_depth: {} format: {} align_size: {}",
                        component.component_index,
                        component.bit_depth,
                        component.format,
                        component.align_size
                    ),
                );
            }
            line(
                out,
                indent,
                &format!(
                    "sampling: {:?} interleave: {:?} block_size: {} little_endian: {}",
                    config.sampling_mode,
                    config.interleave_mode,
                    config.block_size,
                    config.components_little_endian as u8
                ),
            );
            line(
                out,
                indent,
                &format!(
                    "pixel_size: {} row_align_size: {} tile_align_size: {} tiles: {}x{}",
                    config.pixel_size,
                    config.row_align_size,
                    config.tile_align_size,
                    config.num_tile_cols,
                    config.num_tile_rows
                ),
            );
        }
        CodecConfiguration::Mask(config) => {
            line(out, indent, "Box: mskC -----");
            let indent = indent.deeper();
            line(
                out,
                indent,
                &format!("bits_per_pixel: {}", config.bits_per_pixel),
            );
        }
    }
}

fn dump_property(out: &mut String, indent: Indent, index: usize, property: &ItemProperty) {
    match property {
        ItemProperty::ImageSpatialExtents(ispe) => {
            line(out, indent, "Box: ispe -----");
            line(
                out,
                indent.deeper(),
                &format!("width: {} height: {}", ispe.width, ispe.height),
            );
        }
        ItemProperty::PixelInformation(pixi) => {
            line(out, indent, "Box: pixi -----");
            line(
                out,
                indent.deeper(),
                &format!("bits_per_channel: {:?}", pixi.plane_depths),
            );
        }
        ItemProperty::CodecConfiguration(config) => {
            dump_codec_configuration(out, indent, config)
        }
        ItemProperty::ColorInformation(ColorInformation::Icc(icc)) => {
            line(out, indent, "Box: colr -----");
            line(out, indent.deeper(), &format!("icc bytes: {}", icc.len()));
        }
        ItemProperty::ColorInformation(ColorInformation::Nclx(nclx)) => {
            line(out, indent, "Box: colr -----");
            dump_nclx(out, indent.deeper(), nclx);
        }
        ItemProperty::ColorInformation(ColorInformation::Unknown) => {
            line(out, indent, "Box: colr -----");
            line(out, indent.deeper(), "unknown colour type");
        }
        ItemProperty::PixelAspectRatio(pasp) => {
            line(out, indent, "Box: pasp -----");
            line(
                out,
                indent.deeper(),
                &format!("h_spacing: {} v_spacing: {}", pasp.h_spacing, pasp.v_spacing),
            );
        }
        ItemProperty::AuxiliaryType(aux_type) => {
            line(out, indent, "Box: auxC -----");
            line(out, indent.deeper(), &format!("aux_type: {aux_type}"));
        }
        ItemProperty::CleanAperture(clap) => {
            line(out, indent, "Box: clap -----");
            line(
                out,
                indent.deeper(),
                &format!(
                    "width: {}/{} height: {}/{} horiz_off: {}/{} vert_off: {}/{}",
                    clap.width.0,
                    clap.width.1,
                    clap.height.0,
                    clap.height.1,
                    clap.horiz_off.0,
                    clap.horiz_off.1,
                    clap.vert_off.0,
                    clap.vert_off.1
                ),
            );
        }
        ItemProperty::ImageRotation(angle) => {
            line(out, indent, "Box: irot -----");
            line(out, indent.deeper(), &format!("angle: {}", *angle as u32 * 90));
        }
        ItemProperty::ImageMirror(axis) => {
            line(out, indent, "Box: imir -----");
            line(out, indent.deeper(), &format!("axis: {axis}"));
        }
        ItemProperty::ContentLightLevelInformation(clli) => {
            line(out, indent, "Box: clli -----");
            line(
                out,
                indent.deeper(),
                &format!("max_cll: {} max_pall: {}", clli.max_cll, clli.max_pall),
            );
        }
        ItemProperty::MasteringDisplayColourVolume(mdcv) => {
            line(out, indent, "Box: mdcv -----");
            line(
                out,
                indent.deeper(),
                &format!(
                    "primaries: ({},{}) ({},{}) ({},{}) white_point: ({},{}) luminance: {}/{}",
                    mdcv.display_primaries_x[0],
                    mdcv.display_primaries_y[0],
                    mdcv.display_primaries_x[1],
                    mdcv.display_primaries_y[1],
                    mdcv.display_primaries_x[2],
                    mdcv.display_primaries_y[2],
                    mdcv.white_point_x,
                    mdcv.white_point_y,
                    mdcv.max_display_mastering_luminance,
                    mdcv.min_display_mastering_luminance
                ),
            );
        }
        ItemProperty::ComponentDefinitions(cmpd) => {
            line(out, indent, "Box: cmpd -----");
            for component in &cmpd.components {
                line(
                    out,
                    indent.deeper(),
                    &format!(
                        "component_type: {}{}",
                        component.component_type,
                        if component.uri.is_empty() {
                            String::new()
                        } else {
                            format!(" uri: {}", component.uri)
                        }
                    ),
                );
            }
        }
        ItemProperty::Unknown { box_type, data, .. } => {
            line(out, indent, &format!("Box: {box_type} (opaque) -----"));
            line(out, indent.deeper(), &format!("bytes: {}", data.len()));
        }
        ItemProperty::Unused => {
            line(out, indent, &format!("Box: free ----- (entry {index})"));
        }
    }
}

fn dump_meta(out: &mut String, indent: Indent, meta: &MetaBox) {
    line(out, indent, "Box: meta -----");
    let indent = indent.deeper();
    line(out, indent, "Box: hdlr -----");
    line(out, indent.deeper(), "handler_type: pict");
    line(out, indent, "Box: pitm -----");
    line(
        out,
        indent.deeper(),
        &format!("item_ID: {}", meta.primary_item_id),
    );
    line(out, indent, "Box: iinf -----");
    for info in &meta.iinf {
        line(out, indent.deeper(), "Box: infe -----");
        let mut text = format!(
            "item_ID: {} item_type: {:?} item_name: {:?}",
            info.item_id, info.item_type, info.item_name
        );
        if !info.content_type.is_empty() {
            let _ = write!(text, " content_type: {:?}", info.content_type);
        }
        if info.hidden {
            text.push_str(" hidden");
        }
        line(out, indent.deeper().deeper(), &text);
    }
    line(out, indent, "Box: iloc -----");
    for entry in &meta.iloc.items {
        line(
            out,
            indent.deeper(),
            &format!(
                "item_ID: {} construction_method: {} base_offset: {}",
                entry.item_id, entry.construction_method, entry.base_offset
            ),
        );
        for extent in &entry.extents {
            line(
                out,
                indent.deeper().deeper(),
                &format!("extent: offset: {} size: {}", extent.offset, extent.size),
            );
        }
    }
    if !meta.iref.is_empty() {
        line(out, indent, "Box: iref -----");
        for reference in &meta.iref {
            line(
                out,
                indent.deeper(),
                &format!(
                    "{}: from: {} to: {}",
                    reference.reference_type, reference.from_item_id, reference.to_item_id
                ),
            );
        }
    }
    line(out, indent, "Box: iprp -----");
    {
        let indent = indent.deeper();
        line(out, indent, "Box: ipco -----");
        for (index, property) in meta.iprp.properties.iter().enumerate() {
            dump_property(out, indent.deeper(), index + 1, property);
        }
        line(out, indent, "Box: ipma -----");
        for association in &meta.iprp.associations {
            let entries: Vec<String> = association
                .associations
                .iter()
                .map(|(index, essential)| {
                    format!("{}{}", index, if *essential { "*" } else { "" })
                })
                .collect();
            line(
                out,
                indent.deeper(),
                &format!(
                    "item_ID: {} associations: [{}]",
                    association.item_id,
                    entries.join(", ")
                ),
            );
        }
    }
    if !meta.idat.is_empty() {
        line(out, indent, "Box: idat -----");
        line(out, indent.deeper(), &format!("bytes: {}", meta.idat.len()));
    }
    if !meta.grpl.is_empty() {
        line(out, indent, "Box: grpl -----");
        for group in &meta.grpl {
            line(
                out,
                indent.deeper(),
                &format!(
                    "{}: group_id: {} entities: {:?}",
                    group.grouping_type, group.group_id, group.entity_ids
                ),
            );
        }
    }
}

/// Renders the whole parsed box tree as a stable multi-line string.
pub(crate) fn dump_boxes(boxes: &HeifBoxes) -> String {
    let mut out = String::new();
    let indent = Indent::default();
    for entry in &boxes.top_level {
        match entry {
            TopLevelEntry::Ftyp => dump_ftyp(&mut out, indent, &boxes.ftyp),
            TopLevelEntry::Meta => dump_meta(&mut out, indent, &boxes.meta),
            TopLevelEntry::Mini { data } => {
                line(&mut out, indent, "Box: mini -----");
                line(
                    &mut out,
                    indent.deeper(),
                    &format!("bytes: {}", data.len()),
                );
                // The synthesised item table, as exposed to readers.
                dump_meta(&mut out, indent.deeper(), &boxes.meta);
            }
            TopLevelEntry::Mdat => {
                line(&mut out, indent, "Box: mdat -----");
            }
            TopLevelEntry::Raw { box_type, data, .. } => {
                line(&mut out, indent, &format!("Box: {box_type} (opaque) -----"));
                line(
                    &mut out,
                    indent.deeper(),
                    &format!("bytes: {}", data.len()),
                );
            }
        }
    }
    out
}
