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

use crate::internal_utils::*;
use crate::parser::mp4box::*;
use crate::*;

use std::collections::BTreeMap;
use std::collections::HashSet;

/// One entry of the item table, combining infe, iloc, ipma and iref
/// information about a single item id.
#[derive(Debug, Default)]
pub struct Item {
    pub id: u32,
    pub item_type: String,
    pub item_name: String,
    pub content_type: String,
    pub content_encoding: String,
    pub uri_type: String,
    pub hidden: bool,
    pub item_protection_index: u16,

    // Resolved picture size from the associated ispe, if any.
    pub width: u32,
    pub height: u32,

    /// Associated properties in ipma order, each with its essential flag.
    pub properties: Vec<(ItemProperty, bool)>,

    pub construction_method: u8,
    pub data_reference_index: u16,
    pub base_offset: u64,
    pub extents: Vec<ItemLocationExtent>,
    /// Total payload size, the sum of all extent lengths.
    pub size: u64,

    pub thumbnail_for_id: u32,
    pub aux_for_id: u32,
    pub desc_for_id: u32,
    pub dimg_for_id: u32,
    pub prem_by_id: u32,
    /// Item ids of the source items of a derived image item, in `dimg`
    /// reference order (grid cells, overlay layers, identity input).
    pub source_item_ids: Vec<u32>,
    /// Targets of 'iloc' typed references, for construction method 2.
    pub iloc_ref_item_ids: Vec<u32>,

    pub has_unsupported_essential_property: bool,
}

macro_rules! find_property {
    ($properties:expr, $property_name:ident) => {
        $properties.iter().find_map(|(p, _essential)| match p {
            ItemProperty::$property_name(value) => Some(value),
            _ => None,
        })
    };
}

pub(crate) use find_property;

impl Item {
    pub(crate) fn codec_config(&self) -> Option<&CodecConfiguration> {
        find_property!(self.properties, CodecConfiguration)
    }

    pub(crate) fn ispe(&self) -> Option<&ImageSpatialExtents> {
        find_property!(self.properties, ImageSpatialExtents)
    }

    pub(crate) fn pixi(&self) -> Option<&PixelInformation> {
        find_property!(self.properties, PixelInformation)
    }

    pub(crate) fn aux_type(&self) -> Option<&String> {
        find_property!(self.properties, AuxiliaryType)
    }

    pub(crate) fn component_definitions(&self) -> Option<&ComponentDefinitions> {
        find_property!(self.properties, ComponentDefinitions)
    }

    pub(crate) fn has_transformative_property(&self) -> bool {
        self.properties.iter().any(|(property, _)| {
            matches!(
                property,
                ItemProperty::CleanAperture(_)
                    | ItemProperty::ImageRotation(_)
                    | ItemProperty::ImageMirror(_)
            )
        })
    }

    pub(crate) fn is_auxiliary_alpha(&self) -> bool {
        matches!(self.aux_type(), Some(aux_type) if is_auxiliary_type_alpha(aux_type))
    }

    pub(crate) fn is_image_codec_item(&self) -> bool {
        ["av01", "hvc1", "hev1", "vvc1", "j2k1", "jpeg", "unci", "mski"]
            .contains(&self.item_type.as_str())
    }

    pub(crate) fn is_grid_item(&self) -> bool {
        self.item_type == "grid"
    }

    pub(crate) fn is_overlay_item(&self) -> bool {
        self.item_type == "iovl"
    }

    pub(crate) fn is_identity_item(&self) -> bool {
        self.item_type == "iden"
    }

    pub(crate) fn is_derived_image_item(&self) -> bool {
        self.is_grid_item() || self.is_overlay_item() || self.is_identity_item()
    }

    pub(crate) fn is_image_item(&self) -> bool {
        self.is_image_codec_item() || self.is_derived_image_item()
    }

    pub(crate) fn compression_format(&self) -> CompressionFormat {
        match self.item_type.as_str() {
            "av01" => CompressionFormat::Av1,
            "hvc1" | "hev1" => CompressionFormat::Hevc,
            "vvc1" => CompressionFormat::Vvc,
            "j2k1" => CompressionFormat::Jpeg2000,
            "jpeg" => CompressionFormat::Jpeg,
            "unci" => CompressionFormat::Uncompressed,
            "mski" => CompressionFormat::Mask,
            _ => CompressionFormat::Undefined,
        }
    }

    pub(crate) fn should_skip(&self) -> bool {
        // The item has no payload, an essential property this library does
        // not understand, or is not an image at all.
        self.size == 0 || self.has_unsupported_essential_property || !self.is_image_item()
    }

    fn is_metadata(&self, item_type: &str, color_id: Option<u32>) -> bool {
        self.size != 0
            && !self.has_unsupported_essential_property
            && (color_id.is_none() || self.desc_for_id == color_id.unwrap())
            && self.item_type == *item_type
    }

    pub(crate) fn is_exif(&self, color_id: Option<u32>) -> bool {
        self.is_metadata("Exif", color_id)
    }

    pub(crate) fn is_xmp(&self, color_id: Option<u32>) -> bool {
        self.is_metadata("mime", color_id) && self.content_type == "application/rdf+xml"
    }

    pub(crate) fn is_region_item(&self, color_id: Option<u32>) -> bool {
        self.is_metadata("rgan", color_id)
    }

    pub(crate) fn harvest_ispe(
        &mut self,
        alpha_ispe_required: bool,
        limits: &Limits,
    ) -> HeifResult<()> {
        if self.should_skip() {
            return Ok(());
        }
        match self.ispe() {
            Some(ispe) => {
                let width = ispe.width;
                let height = ispe.height;
                if !check_limits(
                    width,
                    height,
                    limits.image_size_limit,
                    limits.image_dimension_limit,
                ) {
                    return HeifError::security_limit(format!(
                        "item {} dimensions {width}x{height} are too large",
                        self.id
                    ));
                }
                self.width = width;
                self.height = height;
            }
            None => {
                // No ispe was found.
                if self.is_auxiliary_alpha() {
                    if alpha_ispe_required {
                        return HeifError::invalid_input(
                            SubErrorKind::Unspecified,
                            "alpha auxiliary image item is missing mandatory ispe",
                        );
                    }
                } else if self.is_image_codec_item() {
                    return HeifError::invalid_input(
                        SubErrorKind::Unspecified,
                        format!("item {} is missing mandatory ispe property", self.id),
                    );
                }
            }
        }
        Ok(())
    }
}

pub type Items = BTreeMap<u32, Item>;

fn insert_item_if_not_exists(id: u32, items: &mut Items) {
    if items.contains_key(&id) {
        return;
    }
    items.insert(
        id,
        Item {
            id,
            ..Item::default()
        },
    );
}

pub(crate) fn construct_items(meta: &MetaBox, limits: &Limits) -> HeifResult<Items> {
    let mut items: Items = BTreeMap::new();
    for iinf in &meta.iinf {
        if items.contains_key(&iinf.item_id) {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                format!("duplicate item id {} in iinf", iinf.item_id),
            );
        }
        items.insert(
            iinf.item_id,
            Item {
                id: iinf.item_id,
                item_type: iinf.item_type.clone(),
                item_name: iinf.item_name.clone(),
                content_type: iinf.content_type.clone(),
                content_encoding: iinf.content_encoding.clone(),
                uri_type: iinf.uri_type.clone(),
                hidden: iinf.hidden,
                item_protection_index: iinf.item_protection_index,
                ..Item::default()
            },
        );
    }
    if items.len() as u64 > limits.max_item_count as u64 {
        return HeifError::security_limit(format!("{} items", items.len()));
    }
    for iloc in &meta.iloc.items {
        insert_item_if_not_exists(iloc.item_id, &mut items);
        let item = items.get_mut(&iloc.item_id).unwrap();
        if !item.extents.is_empty() {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                format!("item {} has duplicate iloc entries", iloc.item_id),
            );
        }
        item.construction_method = iloc.construction_method;
        item.data_reference_index = iloc.data_reference_index;
        item.base_offset = iloc.base_offset;
        for extent in &iloc.extents {
            item.extents.push(extent.clone());
            checked_incr!(item.size, extent.size);
        }
    }

    let mut ipma_seen: HashSet<u32> = HashSet::new();
    for association in &meta.iprp.associations {
        if association.associations.is_empty() {
            continue;
        }
        if ipma_seen.contains(&association.item_id) {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                "item has duplicate ipma entry",
            );
        }
        ipma_seen.insert(association.item_id);

        insert_item_if_not_exists(association.item_id, &mut items);
        let item = items.get_mut(&association.item_id).unwrap();
        for (property_index_ref, essential_ref) in &association.associations {
            let property_index: usize = *property_index_ref as usize;
            let essential = *essential_ref;
            if property_index == 0 {
                if essential {
                    return HeifError::invalid_input(
                        SubErrorKind::InvalidPropertyIndex,
                        format!(
                            "item id {} contains an illegal essential property index 0",
                            item.id
                        ),
                    );
                }
                continue;
            }
            // property_index is 1-based.
            if property_index > meta.iprp.properties.len() {
                return HeifError::invalid_input(
                    SubErrorKind::IpmaBoxReferencesNonexistingProperty,
                    format!(
                        "item id {} references property {property_index} but ipco only has {}",
                        item.id,
                        meta.iprp.properties.len()
                    ),
                );
            }

            match (&meta.iprp.properties[property_index - 1], essential) {
                (ItemProperty::Unknown { box_type, .. }, true) => {
                    log::warn!(
                        "item {} has unknown essential property {box_type}; the item will be \
                         refused at decode time",
                        item.id
                    );
                    item.has_unsupported_essential_property = true;
                }
                (
                    // MIAF 2019/Amd. 2:2021, Section 7.3.9: all transformative
                    // properties associated with coded and derived images
                    // shall be marked as essential.
                    ItemProperty::CleanAperture(_)
                    | ItemProperty::ImageRotation(_)
                    | ItemProperty::ImageMirror(_),
                    false,
                ) => {
                    return HeifError::invalid_input(
                        SubErrorKind::InvalidParameterValue,
                        "transformative property is not marked as essential",
                    );
                }
                (ItemProperty::Unused, _) => {}
                (property, _) => item.properties.push((property.clone(), essential)),
            }
        }
        if item.properties.len() as u64 > limits.max_properties_per_item as u64 {
            return HeifError::security_limit(format!(
                "item {} has {} properties",
                item.id,
                item.properties.len()
            ));
        }
    }

    for reference in &meta.iref {
        if !items.contains_key(&reference.to_item_id) {
            // Some files in the wild carry edges whose target does not
            // exist. The edge is kept for re-serialisation but resolving
            // through it will fail.
            log::warn!(
                "iref {} edge from {} references nonexisting item {}",
                reference.reference_type,
                reference.from_item_id,
                reference.to_item_id
            );
        }
        insert_item_if_not_exists(reference.from_item_id, &mut items);
        let item = items.get_mut(&reference.from_item_id).unwrap();
        match reference.reference_type.as_str() {
            "thmb" => item.thumbnail_for_id = reference.to_item_id,
            "auxl" => item.aux_for_id = reference.to_item_id,
            "cdsc" => item.desc_for_id = reference.to_item_id,
            "prem" => item.prem_by_id = reference.to_item_id,
            "iloc" => item.iloc_ref_item_ids.push(reference.to_item_id),
            "dimg" => {
                // Derived images refer in the opposite direction.
                item.source_item_ids.push(reference.to_item_id);
                insert_item_if_not_exists(reference.to_item_id, &mut items);
                let dimg_item = items.get_mut(&reference.to_item_id).unwrap();
                if dimg_item.dimg_for_id == reference.from_item_id {
                    // Section 8.11.12.1 of ISO/IEC 14496-12: within a given
                    // array, a given value shall occur at most once.
                    return HeifError::invalid_input(
                        SubErrorKind::InvalidParameterValue,
                        format!(
                            "multiple dimg references for item id {}",
                            dimg_item.id
                        ),
                    );
                }
                if dimg_item.dimg_for_id == 0 {
                    dimg_item.dimg_for_id = reference.from_item_id;
                }
            }
            _ => {
                // Unknown reference type, ignore.
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with_one_item() -> MetaBox {
        MetaBox {
            iinf: vec![ItemInfo {
                item_id: 1,
                item_type: "av01".into(),
                ..ItemInfo::default()
            }],
            iloc: ItemLocationBox {
                items: vec![ItemLocationEntry {
                    item_id: 1,
                    extents: vec![ItemLocationExtent {
                        index: 0,
                        offset: 100,
                        size: 10,
                    }],
                    ..ItemLocationEntry::default()
                }],
                ..ItemLocationBox::default()
            },
            primary_item_id: 1,
            ..MetaBox::default()
        }
    }

    #[test]
    fn dangling_property_index_is_fatal() {
        let mut meta = meta_with_one_item();
        meta.iprp.properties = vec![ItemProperty::ImageRotation(1)];
        meta.iprp.associations.push(ItemPropertyAssociation {
            item_id: 1,
            associations: vec![(2, false)],
        });
        let err = construct_items(&meta, &Limits::default()).unwrap_err();
        assert_eq!(
            err.sub_kind,
            SubErrorKind::IpmaBoxReferencesNonexistingProperty
        );
    }

    #[test]
    fn unknown_essential_property_poisons_item() {
        let mut meta = meta_with_one_item();
        meta.iprp.properties = vec![ItemProperty::Unknown {
            box_type: "abcd".into(),
            uuid: None,
            data: vec![1, 2, 3],
        }];
        meta.iprp.associations.push(ItemPropertyAssociation {
            item_id: 1,
            associations: vec![(1, true)],
        });
        let items = construct_items(&meta, &Limits::default()).unwrap();
        assert!(items.get(&1).unwrap().has_unsupported_essential_property);
    }

    #[test]
    fn non_essential_transform_is_rejected() {
        let mut meta = meta_with_one_item();
        meta.iprp.properties = vec![ItemProperty::ImageRotation(1)];
        meta.iprp.associations.push(ItemPropertyAssociation {
            item_id: 1,
            associations: vec![(1, false)],
        });
        assert!(construct_items(&meta, &Limits::default()).is_err());
    }

    #[test]
    fn item_size_is_extent_sum() {
        let mut meta = meta_with_one_item();
        meta.iloc.items[0].extents.push(ItemLocationExtent {
            index: 0,
            offset: 200,
            size: 32,
        });
        let items = construct_items(&meta, &Limits::default()).unwrap();
        assert_eq!(items.get(&1).unwrap().size, 42);
    }
}
