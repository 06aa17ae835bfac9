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

pub mod mp4box;

use crate::codecs::uncompressed;
use crate::decoder::tile::Grid;
use crate::image::*;
use crate::internal_utils::stream::OStream;
use crate::internal_utils::*;
use crate::parser::mp4box::*;
use crate::parser::regions;
use crate::parser::regions::RegionGeometry;
use crate::utils::*;
use crate::*;

use std::collections::HashMap;

#[derive(Debug)]
pub struct Settings {
    /// Quality in [0, 100], forwarded to lossy codec plugins. The built-in
    /// uncompressed path ignores it.
    pub quality: u32,
    pub lossless: bool,
    pub max_threads: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quality: 90,
            lossless: false,
            max_threads: crate::decoder::DEFAULT_MAX_THREADS,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Item {
    pub id: u32,
    pub item_type: String,
    pub item_name: String,
    pub content_type: String,
    pub hidden: bool,
    pub payload: Vec<u8>,
    pub properties: Vec<(ItemProperty, bool)>,
    pub dimg_to: Vec<u32>,
    pub auxl_to: Option<u32>,
    pub cdsc_to: Option<u32>,
    pub thmb_to: Option<u32>,
    pub prem_to: Option<u32>,
}

impl Item {
    fn is_metadata(&self) -> bool {
        matches!(self.item_type.as_str(), "Exif" | "mime" | "rgan")
    }
}

/// Builds a file item by item and serialises it with correct iloc offsets.
/// The output buffer is only handed out when every box was written
/// successfully.
#[derive(Default)]
pub struct Encoder {
    pub settings: Settings,
    items: Vec<Item>,
    primary_item_id: u32,
    next_item_id: u32,
}

impl Encoder {
    pub fn create() -> Encoder {
        Encoder {
            next_item_id: 1,
            ..Encoder::default()
        }
    }

    fn next_id(&mut self) -> HeifResult<u32> {
        let id = self.next_item_id;
        if id > u16::MAX as u32 {
            return HeifError::usage("too many items");
        }
        self.next_item_id += 1;
        Ok(id)
    }

    fn item_mut(&mut self, item_id: u32) -> HeifResult<&mut Item> {
        match self.items.iter_mut().find(|item| item.id == item_id) {
            Some(item) => Ok(item),
            None => HeifError::usage(format!("no encoder item with id {item_id}")),
        }
    }

    fn image_descriptive_properties(image: &Image) -> Vec<(ItemProperty, bool)> {
        let mut properties = vec![
            (
                ItemProperty::ImageSpatialExtents(image.spatial_extents()),
                false,
            ),
            (
                ItemProperty::PixelInformation(PixelInformation {
                    plane_depths: vec![
                        image.depth;
                        std::cmp::max(
                            image.yuv_format.plane_count(),
                            image.yuv_format.channel_count()
                        )
                    ],
                }),
                false,
            ),
        ];
        if !image.icc.is_empty() {
            properties.push((
                ItemProperty::ColorInformation(ColorInformation::Icc(image.icc.clone())),
                false,
            ));
        } else if image.color_primaries != ColorPrimaries::Unspecified
            || image.transfer_characteristics != TransferCharacteristics::Unspecified
            || image.matrix_coefficients != MatrixCoefficients::Unspecified
        {
            properties.push((
                ItemProperty::ColorInformation(ColorInformation::Nclx(Nclx {
                    color_primaries: image.color_primaries,
                    transfer_characteristics: image.transfer_characteristics,
                    matrix_coefficients: image.matrix_coefficients,
                    yuv_range: image.yuv_range,
                })),
                false,
            ));
        }
        if let Some(pasp) = image.pasp {
            properties.push((ItemProperty::PixelAspectRatio(pasp), false));
        }
        if let Some(clli) = image.clli {
            properties.push((ItemProperty::ContentLightLevelInformation(clli), false));
        }
        if let Some(mdcv) = image.mdcv {
            properties.push((ItemProperty::MasteringDisplayColourVolume(mdcv), false));
        }
        // Transformative properties come after the descriptive ones and are
        // always essential.
        if let Some(clap) = image.clap {
            properties.push((ItemProperty::CleanAperture(clap), true));
        }
        if let Some(angle) = image.irot_angle {
            properties.push((ItemProperty::ImageRotation(angle), true));
        }
        if let Some(axis) = image.imir_axis {
            properties.push((ItemProperty::ImageMirror(axis), true));
        }
        properties
    }

    /// Adds an image as an uncompressed ('unci') item. The first image item
    /// added becomes the primary item.
    pub fn add_image(&mut self, image: &Image) -> HeifResult<u32> {
        let (payload, uncc, cmpd) = uncompressed::encode(image)?;
        let id = self.next_id()?;
        let mut properties = vec![
            (
                ItemProperty::CodecConfiguration(CodecConfiguration::Uncompressed(uncc)),
                true,
            ),
            (ItemProperty::ComponentDefinitions(cmpd), true),
        ];
        properties.append(&mut Self::image_descriptive_properties(image));
        self.items.push(Item {
            id,
            item_type: "unci".into(),
            payload,
            properties,
            ..Item::default()
        });
        if self.primary_item_id == 0 {
            self.primary_item_id = id;
        }
        Ok(id)
    }

    /// Adds an image item whose payload was produced by an external codec.
    pub fn add_coded_image(
        &mut self,
        item_type: &str,
        config: CodecConfiguration,
        image_properties: &Image,
        payload: Vec<u8>,
    ) -> HeifResult<u32> {
        let id = self.next_id()?;
        let mut properties = vec![(ItemProperty::CodecConfiguration(config), true)];
        properties.append(&mut Self::image_descriptive_properties(image_properties));
        self.items.push(Item {
            id,
            item_type: item_type.into(),
            payload,
            properties,
            ..Item::default()
        });
        if self.primary_item_id == 0 {
            self.primary_item_id = id;
        }
        Ok(id)
    }

    /// Turns an already added image item into an auxiliary image of
    /// `for_item_id` with the given auxC role.
    pub fn set_auxiliary(
        &mut self,
        item_id: u32,
        for_item_id: u32,
        aux_type: &str,
    ) -> HeifResult<()> {
        let aux_type = aux_type.to_owned();
        let item = self.item_mut(item_id)?;
        item.auxl_to = Some(for_item_id);
        item.hidden = true;
        item.properties
            .push((ItemProperty::AuxiliaryType(aux_type), true));
        Ok(())
    }

    pub fn set_thumbnail(&mut self, item_id: u32, for_item_id: u32) -> HeifResult<()> {
        let item = self.item_mut(item_id)?;
        item.thmb_to = Some(for_item_id);
        item.hidden = true;
        Ok(())
    }

    pub fn set_primary_item(&mut self, item_id: u32) -> HeifResult<()> {
        self.item_mut(item_id)?;
        self.primary_item_id = item_id;
        Ok(())
    }

    /// Adds a 'grid' derived item over previously added tiles, in row-major
    /// order. Tile items are hidden; the grid becomes the primary item if
    /// none was chosen yet.
    pub fn add_grid_image(
        &mut self,
        rows: u32,
        columns: u32,
        width: u32,
        height: u32,
        tile_item_ids: &[u32],
    ) -> HeifResult<u32> {
        if rows == 0
            || columns == 0
            || rows > 256
            || columns > 256
            || u64_from_usize(tile_item_ids.len())? != u64::from(rows) * u64::from(columns)
        {
            return HeifError::usage(format!(
                "grid of {rows}x{columns} cannot be built from {} tiles",
                tile_item_ids.len()
            ));
        }
        let grid = Grid {
            rows,
            columns,
            width,
            height,
        };
        let payload = mp4box::write_grid_payload(&grid)?;
        let id = self.next_id()?;
        let properties = vec![(
            ItemProperty::ImageSpatialExtents(ImageSpatialExtents { width, height }),
            false,
        )];
        for tile_item_id in tile_item_ids {
            self.item_mut(*tile_item_id)?.hidden = true;
        }
        self.items.push(Item {
            id,
            item_type: "grid".into(),
            payload,
            properties,
            dimg_to: tile_item_ids.to_vec(),
            ..Item::default()
        });
        if self.primary_item_id == 0 {
            self.primary_item_id = id;
        }
        Ok(id)
    }

    /// Adds an 'iovl' derived item composing previously added inputs onto a
    /// filled canvas. Offsets are per input, in input order.
    pub fn add_overlay_image(
        &mut self,
        width: u32,
        height: u32,
        canvas_fill_value: [u16; 4],
        inputs: &[(u32, i32, i32)],
    ) -> HeifResult<u32> {
        if inputs.is_empty() {
            return HeifError::usage("an overlay needs at least one input");
        }
        let overlay = crate::decoder::tile::Overlay {
            canvas_fill_value,
            width,
            height,
            horizontal_offsets: inputs.iter().map(|(_, x, _)| *x).collect(),
            vertical_offsets: inputs.iter().map(|(_, _, y)| *y).collect(),
        };
        let payload = mp4box::write_overlay_payload(&overlay)?;
        let id = self.next_id()?;
        let properties = vec![(
            ItemProperty::ImageSpatialExtents(ImageSpatialExtents { width, height }),
            false,
        )];
        for (input_id, _, _) in inputs {
            self.item_mut(*input_id)?.hidden = true;
        }
        self.items.push(Item {
            id,
            item_type: "iovl".into(),
            payload,
            properties,
            dimg_to: inputs.iter().map(|(input_id, _, _)| *input_id).collect(),
            ..Item::default()
        });
        if self.primary_item_id == 0 {
            self.primary_item_id = id;
        }
        Ok(id)
    }

    /// Adds an 'iden' derived item: the source image with different
    /// transform properties. The item itself carries no payload.
    pub fn add_identity_image(
        &mut self,
        source_item_id: u32,
        rotation_ccw: Option<u8>,
        mirror_axis: Option<u8>,
    ) -> HeifResult<u32> {
        let source_ispe = self
            .item_mut(source_item_id)?
            .properties
            .iter()
            .find_map(|(property, _)| match property {
                ItemProperty::ImageSpatialExtents(ispe) => Some(*ispe),
                _ => None,
            });
        let id = self.next_id()?;
        let mut properties = Vec::new();
        if let Some(ispe) = source_ispe {
            properties.push((ItemProperty::ImageSpatialExtents(ispe), false));
        }
        if let Some(angle) = rotation_ccw {
            properties.push((ItemProperty::ImageRotation(angle), true));
        }
        if let Some(axis) = mirror_axis {
            properties.push((ItemProperty::ImageMirror(axis), true));
        }
        self.items.push(Item {
            id,
            item_type: "iden".into(),
            properties,
            dimg_to: vec![source_item_id],
            ..Item::default()
        });
        Ok(id)
    }

    /// Attaches an Exif payload to an image item. The bytes are stored and
    /// returned on read without interpretation.
    pub fn add_exif(&mut self, payload: Vec<u8>, for_item_id: u32) -> HeifResult<u32> {
        self.item_mut(for_item_id)?;
        let id = self.next_id()?;
        self.items.push(Item {
            id,
            item_type: "Exif".into(),
            payload,
            cdsc_to: Some(for_item_id),
            ..Item::default()
        });
        Ok(id)
    }

    pub fn add_xmp(&mut self, payload: Vec<u8>, for_item_id: u32) -> HeifResult<u32> {
        self.item_mut(for_item_id)?;
        let id = self.next_id()?;
        self.items.push(Item {
            id,
            item_type: "mime".into(),
            content_type: "application/rdf+xml".into(),
            payload,
            cdsc_to: Some(for_item_id),
            ..Item::default()
        });
        Ok(id)
    }

    /// Attaches region annotations to an image item. The geometries are
    /// written in the order given.
    pub fn add_region_item(
        &mut self,
        reference_width: u32,
        reference_height: u32,
        geometries: Vec<RegionGeometry>,
        for_item_id: u32,
    ) -> HeifResult<u32> {
        self.item_mut(for_item_id)?;
        let id = self.next_id()?;
        let payload = regions::write(&regions::RegionItem {
            item_id: id,
            reference_width,
            reference_height,
            regions: geometries,
        })?;
        self.items.push(Item {
            id,
            item_type: "rgan".into(),
            payload,
            cdsc_to: Some(for_item_id),
            ..Item::default()
        });
        Ok(id)
    }

    fn write_ftyp(&self, stream: &mut OStream) -> HeifResult<()> {
        let mut compatible_brands = vec![String::from("mif1"), String::from("miaf")];
        if self.items.iter().any(|item| item.item_type == "av01") {
            compatible_brands.push("avif".into());
        }
        if self
            .items
            .iter()
            .any(|item| matches!(item.item_type.as_str(), "hvc1" | "hev1"))
        {
            compatible_brands.push("heic".into());
        }
        mp4box::write_ftyp(
            stream,
            &FileTypeBox {
                major_brand: "mif1".into(),
                minor_version: "\0\0\0\0".into(),
                compatible_brands,
            },
        )
    }

    fn build_references(&self) -> Vec<ItemReference> {
        let mut references = Vec::new();
        for item in &self.items {
            for (index, to) in item.dimg_to.iter().enumerate() {
                references.push(ItemReference {
                    from_item_id: item.id,
                    to_item_id: *to,
                    reference_type: "dimg".into(),
                    index: index as u32,
                });
            }
            let typed_edges = [
                (item.auxl_to, "auxl"),
                (item.thmb_to, "thmb"),
                (item.cdsc_to, "cdsc"),
                (item.prem_to, "prem"),
            ];
            for (to, reference_type) in typed_edges {
                if let Some(to) = to {
                    references.push(ItemReference {
                        from_item_id: item.id,
                        to_item_id: to,
                        reference_type: reference_type.into(),
                        index: 0,
                    });
                }
            }
        }
        references
    }

    // Deduplicates identical properties by their serialised bytes and
    // returns the ipco content plus the per-item associations.
    fn build_iprp(&self) -> HeifResult<ItemPropertyBox> {
        let mut iprp = ItemPropertyBox::default();
        let mut index_of_bytes: HashMap<Vec<u8>, u16> = HashMap::new();
        for item in &self.items {
            if item.properties.is_empty() {
                continue;
            }
            let mut association = ItemPropertyAssociation {
                item_id: item.id,
                associations: Vec::new(),
            };
            for (property, essential) in &item.properties {
                let mut scratch = OStream::default();
                mp4box::write_property(&mut scratch, property)?;
                let index = match index_of_bytes.get(&scratch.data) {
                    Some(index) => *index,
                    None => {
                        iprp.properties.push(property.clone());
                        let index = u16_from_usize(iprp.properties.len())?;
                        index_of_bytes.insert(scratch.data, index);
                        index
                    }
                };
                association.associations.push((index, *essential));
            }
            iprp.associations.push(association);
        }
        Ok(iprp)
    }

    /// Serialises the file. The box tree is emitted in the order boxes were
    /// appended; item payloads go into a single mdat whose offsets are
    /// patched into the iloc afterwards.
    pub fn write(&mut self) -> HeifResult<Vec<u8>> {
        if self.items.is_empty() || self.primary_item_id == 0 {
            return HeifError::usage("nothing to write; add an image first");
        }
        let mut stream = OStream::default();
        self.write_ftyp(&mut stream)?;
        stream.start_full_box("meta", (0, 0))?;
        mp4box::write_hdlr(&mut stream, "pict")?;
        mp4box::write_pitm(&mut stream, self.primary_item_id)?;
        let iloc_entries: Vec<(ItemLocationEntry, u64)> = self
            .items
            .iter()
            .map(|item| {
                (
                    ItemLocationEntry {
                        item_id: item.id,
                        ..ItemLocationEntry::default()
                    },
                    u64_from_usize(item.payload.len()).unwrap_or_default(),
                )
            })
            .collect();
        let iloc_locations = mp4box::write_iloc(&mut stream, &iloc_entries)?;
        let infos: Vec<ItemInfo> = self
            .items
            .iter()
            .map(|item| ItemInfo {
                item_id: item.id,
                item_type: item.item_type.clone(),
                item_name: item.item_name.clone(),
                content_type: item.content_type.clone(),
                hidden: item.hidden,
                ..ItemInfo::default()
            })
            .collect();
        mp4box::write_iinf(&mut stream, &infos)?;
        mp4box::write_iref(&mut stream, &self.build_references())?;
        mp4box::write_iprp(&mut stream, &self.build_iprp()?)?;
        stream.finish_box()?;

        // Media data passes: metadata payloads first, then hidden and
        // auxiliary images, then the remaining image payloads.
        let mut payloads: Vec<(u32, Vec<u8>)> = Vec::new();
        for pass in 0..=2 {
            for item in &self.items {
                let wanted = match pass {
                    0 => item.is_metadata(),
                    1 => !item.is_metadata() && item.hidden,
                    _ => !item.is_metadata() && !item.hidden,
                };
                if wanted {
                    payloads.push((item.id, item.payload.clone()));
                }
            }
        }
        mp4box::write_mdat(&mut stream, &payloads, &iloc_locations)?;
        Ok(stream.data)
    }
}
