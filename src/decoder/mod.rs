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

pub mod item;
pub mod tile;

use crate::codecs;
use crate::codecs::DecoderConfig;
use crate::codecs::DecoderPlugin;
use crate::decoder::item::*;
use crate::decoder::tile::*;
use crate::image::*;
use crate::internal_utils::io::*;
use crate::internal_utils::*;
use crate::parser::dump;
use crate::parser::mp4box;
use crate::parser::mp4box::*;
use crate::parser::regions;
use crate::parser::regions::RegionItem;
use crate::*;

use std::sync::Arc;

/// Byte source feeding the parser and the item resolver.
pub trait IO {
    /// Returns at most `max_read_size` bytes starting at `offset`. Returning
    /// fewer bytes than requested means the end of the source was reached.
    fn read(&mut self, offset: u64, max_read_size: usize) -> HeifResult<&[u8]>;
    fn size_hint(&self) -> u64;
    /// True if the returned slices stay valid across read calls.
    fn persistent(&self) -> bool;
}

impl dyn IO {
    pub(crate) fn read_exact(&mut self, offset: u64, read_size: usize) -> HeifResult<&[u8]> {
        let result = self.read(offset, read_size)?;
        if result.len() < read_size {
            HeifError::end_of_data()
        } else {
            assert!(result.len() == read_size);
            Ok(result)
        }
    }
}

pub type GenericIO = Box<dyn IO>;

/// Outcome of waiting for a growing file to reach a target size.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum GrowStatus {
    SizeReached,
    Timeout,
    SizeBeyondEof,
}

/// Callback table for sources whose size may still grow while parsing.
/// When `wait_for_file_size` answers Timeout, the current parse returns the
/// recoverable WaitingOnIo marker and can be retried once more bytes have
/// arrived.
pub trait StreamReader: Send {
    fn get_position(&self) -> u64;
    /// Number of bytes available so far.
    fn get_position_limit(&self) -> u64;
    fn wait_for_file_size(&mut self, target_size: u64) -> GrowStatus;
    fn seek(&mut self, position: u64) -> HeifResult<()>;
    /// Fills the whole buffer from the current position.
    fn read(&mut self, buffer: &mut [u8]) -> HeifResult<()>;
}

/// Observer of a decode operation. `is_cancelled` is polled before each tile
/// decode and between grid passes; returning true aborts the decode with
/// [ErrorKind::Canceled].
pub trait ProgressObserver: Send + Sync {
    fn start(&self, _total_steps: u32) {}
    fn on_progress(&self, _completed_steps: u32) {}
    fn end(&self) {}
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub enum StrictnessFlag {
    PixiRequired,
    ClapValid,
    AlphaIspeRequired,
}

#[derive(Debug, Default)]
pub enum Strictness {
    None,
    #[default]
    All,
    SpecificInclude(Vec<StrictnessFlag>),
    SpecificExclude(Vec<StrictnessFlag>),
}

impl Strictness {
    pub(crate) fn pixi_required(&self) -> bool {
        match self {
            Strictness::All => true,
            Strictness::SpecificInclude(flags) => flags
                .iter()
                .any(|x| matches!(x, StrictnessFlag::PixiRequired)),
            Strictness::SpecificExclude(flags) => !flags
                .iter()
                .any(|x| matches!(x, StrictnessFlag::PixiRequired)),
            _ => false,
        }
    }

    pub(crate) fn clap_valid(&self) -> bool {
        match self {
            Strictness::All => true,
            Strictness::SpecificInclude(flags) => {
                flags.iter().any(|x| matches!(x, StrictnessFlag::ClapValid))
            }
            Strictness::SpecificExclude(flags) => {
                !flags.iter().any(|x| matches!(x, StrictnessFlag::ClapValid))
            }
            _ => false,
        }
    }

    pub(crate) fn alpha_ispe_required(&self) -> bool {
        match self {
            Strictness::All => true,
            Strictness::SpecificInclude(flags) => flags
                .iter()
                .any(|x| matches!(x, StrictnessFlag::AlphaIspeRequired)),
            Strictness::SpecificExclude(flags) => !flags
                .iter()
                .any(|x| matches!(x, StrictnessFlag::AlphaIspeRequired)),
            _ => false,
        }
    }

    fn is_strict(&self) -> bool {
        !matches!(self, Strictness::None)
    }
}

pub const DEFAULT_MAX_THREADS: u32 = 4;

pub struct Settings {
    pub strictness: Strictness,
    pub limits: Limits,
    /// Worker cap for tile decoding of grid items.
    pub max_threads: u32,
    pub ignore_exif: bool,
    pub ignore_xmp: bool,
    /// Follow data_reference_index entries pointing outside this file.
    /// External references are always refused; this only controls whether
    /// they fail at parse time or at item access time.
    pub allow_external_data_references: bool,
    /// Accept the historical 48-bit big-endian interleaved RGB layout of
    /// uncompressed items.
    pub allow_rrggbb_48bit: bool,
    pub progress: Option<Arc<dyn ProgressObserver>>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("strictness", &self.strictness)
            .field("limits", &self.limits)
            .field("max_threads", &self.max_threads)
            .field("ignore_exif", &self.ignore_exif)
            .field("ignore_xmp", &self.ignore_xmp)
            .field(
                "allow_external_data_references",
                &self.allow_external_data_references,
            )
            .field("allow_rrggbb_48bit", &self.allow_rrggbb_48bit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            limits: Limits::default(),
            max_threads: DEFAULT_MAX_THREADS,
            ignore_exif: false,
            ignore_xmp: false,
            allow_external_data_references: false,
            allow_rrggbb_48bit: true,
            progress: None,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
enum ParseState {
    #[default]
    None,
    Complete,
}

/// Parses a file into its item table and drives codec plugins to turn items
/// into pixel images.
#[derive(Default)]
pub struct Decoder {
    pub settings: Settings,
    io: Option<GenericIO>,
    pub(crate) boxes: HeifBoxes,
    pub(crate) items: Items,
    parse_state: ParseState,
    budget: MemoryBudget,
    plugins: Vec<Arc<dyn DecoderPlugin>>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("settings", &self.settings)
            .field("io", &self.io.is_some())
            .field("boxes", &self.boxes)
            .field("items", &self.items)
            .field("parse_state", &self.parse_state)
            .field("budget", &self.budget)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl Decoder {
    pub fn set_io_file(&mut self, filename: &str) -> HeifResult<()> {
        self.io = Some(Box::new(DecoderFileIO::create(filename)?));
        self.parse_state = ParseState::None;
        Ok(())
    }

    pub fn set_io_vec(&mut self, data: Vec<u8>) {
        self.io = Some(Box::new(DecoderMemoryIO { data }));
        self.parse_state = ParseState::None;
    }

    pub fn set_io_stream(&mut self, reader: Box<dyn StreamReader>) {
        self.io = Some(Box::new(DecoderStreamIO::create(reader)));
        self.parse_state = ParseState::None;
    }

    pub fn set_io(&mut self, io: GenericIO) {
        self.io = Some(io);
        self.parse_state = ParseState::None;
    }

    fn parsing_complete(&self) -> HeifResult<()> {
        if self.parse_state != ParseState::Complete {
            return HeifError::usage("parse() has not completed on this decoder");
        }
        Ok(())
    }

    /// Scans the top-level boxes, validates the mandatory ones and builds
    /// the item table. On sources backed by a growing file this may fail
    /// with the recoverable WaitingOnIo marker; the call can be repeated
    /// once more bytes are available.
    pub fn parse(&mut self) -> HeifResult<()> {
        let io = match self.io.as_mut() {
            Some(io) => io,
            None => return HeifError::usage("no io is set on this decoder"),
        };
        // Late plugin registration must not affect this decoder once
        // parsing has begun.
        self.plugins = codecs::snapshot();
        self.budget.reset();
        let boxes = mp4box::parse(io, &self.settings.limits)?;
        let mut items = construct_items(&boxes.meta, &self.settings.limits)?;
        if !items.contains_key(&boxes.meta.primary_item_id) {
            return HeifError::invalid_input(
                SubErrorKind::NonexistingItemReferenced,
                format!(
                    "pitm references nonexisting item {}",
                    boxes.meta.primary_item_id
                ),
            );
        }
        let alpha_ispe_required = self.settings.strictness.alpha_ispe_required();
        for item_entry in items.values_mut() {
            item_entry.harvest_ispe(alpha_ispe_required, &self.settings.limits)?;
        }
        if let Some(dinf) = &boxes.meta.dinf {
            if !self.settings.allow_external_data_references
                && dinf.entries.iter().any(|(_, self_contained)| !self_contained)
            {
                return HeifError::unsupported_feature(
                    SubErrorKind::ExternalDataReference,
                    "dref entry references data outside this file",
                );
            }
        }
        self.boxes = boxes;
        self.items = items;
        self.parse_state = ParseState::Complete;
        Ok(())
    }

    pub fn primary_item_id(&self) -> HeifResult<u32> {
        self.parsing_complete()?;
        Ok(self.boxes.meta.primary_item_id)
    }

    pub fn item_ids(&self) -> HeifResult<Vec<u32>> {
        self.parsing_complete()?;
        Ok(self.items.keys().copied().collect())
    }

    pub fn item(&self, item_id: u32) -> HeifResult<&Item> {
        self.parsing_complete()?;
        match self.items.get(&item_id) {
            Some(item) => Ok(item),
            None => HeifError::invalid_input(
                SubErrorKind::NonexistingItemReferenced,
                format!("no item with id {item_id}"),
            ),
        }
    }

    /// Ordered (property, essential) associations of an item.
    pub fn properties_of(&self, item_id: u32) -> HeifResult<&[(ItemProperty, bool)]> {
        Ok(&self.item(item_id)?.properties)
    }

    pub fn ispe_of(&self, item_id: u32) -> HeifResult<Option<ImageSpatialExtents>> {
        Ok(self.item(item_id)?.ispe().copied())
    }

    pub fn pixi_of(&self, item_id: u32) -> HeifResult<Option<PixelInformation>> {
        Ok(self.item(item_id)?.pixi().cloned())
    }

    pub fn rotation_of(&self, item_id: u32) -> HeifResult<Option<u8>> {
        let item = self.item(item_id)?;
        Ok(find_property!(item.properties, ImageRotation).copied())
    }

    pub fn mirror_of(&self, item_id: u32) -> HeifResult<Option<u8>> {
        let item = self.item(item_id)?;
        Ok(find_property!(item.properties, ImageMirror).copied())
    }

    pub fn auxiliary_role_of(&self, item_id: u32) -> HeifResult<Option<String>> {
        Ok(self.item(item_id)?.aux_type().cloned())
    }

    pub fn color_profile_of(&self, item_id: u32) -> HeifResult<ColorInformation> {
        let item = self.item(item_id)?;
        match find_property!(item.properties, ColorInformation) {
            Some(color_information) => Ok(color_information.clone()),
            None => HeifError::no_color_profile(),
        }
    }

    /// Deterministic, stable description of the parsed box tree.
    pub fn dump(&self) -> HeifResult<String> {
        self.parsing_complete()?;
        Ok(dump::dump_boxes(&self.boxes))
    }

    fn check_cancel(&self) -> HeifResult<()> {
        if let Some(progress) = &self.settings.progress {
            if progress.is_cancelled() {
                return HeifError::canceled();
            }
        }
        Ok(())
    }

    fn accessible_item(&self, item_id: u32) -> HeifResult<&Item> {
        let item = self.item(item_id)?;
        if item.item_protection_index != 0 {
            return HeifError::unsupported_feature(
                SubErrorKind::ItemIsProtected,
                format!("item {item_id} is protected"),
            );
        }
        Ok(item)
    }

    /// Materialises the bytes of an item by concatenating its iloc extents
    /// according to the construction method.
    pub fn item_data(&mut self, item_id: u32) -> HeifResult<Vec<u8>> {
        self.parsing_complete()?;
        let mut visited = Vec::new();
        self.item_data_inner(item_id, &mut visited)
    }

    fn item_data_inner(&mut self, item_id: u32, visited: &mut Vec<u32>) -> HeifResult<Vec<u8>> {
        if visited.contains(&item_id) {
            return HeifError::invalid_input(
                SubErrorKind::ItemReferenceCycle,
                format!("item {item_id} is part of a construction cycle"),
            );
        }
        let item = self.accessible_item(item_id)?;
        if item.size == 0 {
            return HeifError::invalid_input(
                SubErrorKind::NoItemData,
                format!("item {item_id} has no data"),
            );
        }
        let item_size = item.size;
        let construction_method = item.construction_method;
        let base_offset = item.base_offset;
        let data_reference_index = item.data_reference_index;
        let extents = item.extents.clone();
        let iloc_ref_item_ids = item.iloc_ref_item_ids.clone();
        if data_reference_index != 0 {
            // data_reference_index is a 1-based index into dref. Entry 1 may
            // still flag the data as self-contained in this file.
            let self_contained = self
                .boxes
                .meta
                .dinf
                .as_ref()
                .and_then(|dinf| dinf.entries.get(data_reference_index as usize - 1))
                .map(|(_, self_contained)| *self_contained);
            match self_contained {
                Some(true) => {}
                Some(false) => {
                    return HeifError::unsupported_feature(
                        SubErrorKind::ExternalDataReference,
                        format!("item {item_id} references data outside this file"),
                    )
                }
                None => {
                    return HeifError::invalid_input(
                        SubErrorKind::InvalidParameterValue,
                        format!(
                            "item {item_id} has data_reference_index {data_reference_index} \
                             but no matching dref entry"
                        ),
                    )
                }
            }
        }
        // Fail before any allocation when the accumulated extents would
        // exceed the memory ceiling.
        self.budget
            .charge(item_size, self.settings.limits.max_total_memory)?;
        let mut data: Vec<u8> = create_vec_exact(usize_from_u64(item_size)?)?;
        match construction_method {
            0 => {
                // Extents are absolute file offsets.
                let io = self.io.as_mut().unwrap();
                for extent in &extents {
                    let offset = checked_add!(base_offset, extent.offset)?;
                    data.extend_from_slice(
                        io.as_mut().read_exact(offset, usize_from_u64(extent.size)?)?,
                    );
                }
            }
            1 => {
                // Extents are offsets into the idat box of the meta box.
                let idat = &self.boxes.meta.idat;
                if idat.is_empty() {
                    return HeifError::invalid_input(
                        SubErrorKind::NoIdatBox,
                        format!("item {item_id} uses idat but meta has none"),
                    );
                }
                for extent in &extents {
                    let start = usize_from_u64(checked_add!(base_offset, extent.offset)?)?;
                    let end = checked_add!(start, usize_from_u64(extent.size)?)?;
                    check_slice_range(idat.len(), &(start..end))?;
                    data.extend_from_slice(&idat[start..end]);
                }
            }
            2 => {
                // Extents address the reconstructed data of other items,
                // designated by 'iloc' typed references.
                if iloc_ref_item_ids.is_empty() {
                    return HeifError::invalid_input(
                        SubErrorKind::NoItemData,
                        format!("item {item_id} uses construction method 2 without iloc refs"),
                    );
                }
                visited.push(item_id);
                for extent in &extents {
                    // item_reference_index is 1-based; 0 addresses the first
                    // referenced item.
                    let reference_index = if extent.index == 0 { 0 } else { extent.index - 1 };
                    let source_id = *iloc_ref_item_ids
                        .get(usize_from_u64(reference_index)?)
                        .ok_or(HeifError::new(
                            ErrorKind::InvalidInput,
                            SubErrorKind::NonexistingItemReferenced,
                            format!("invalid iloc reference index {}", extent.index),
                        ))?;
                    let source = self.item_data_inner(source_id, visited)?;
                    let start = usize_from_u64(checked_add!(base_offset, extent.offset)?)?;
                    let end = if extent.size == 0 {
                        source.len()
                    } else {
                        checked_add!(start, usize_from_u64(extent.size)?)?
                    };
                    check_slice_range(source.len(), &(start..end))?;
                    data.extend_from_slice(&source[start..end]);
                }
                visited.pop();
            }
            _ => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedItemConstructionMethod,
                    format!("construction method {construction_method}"),
                )
            }
        }
        Ok(data)
    }

    /// Decodes the primary item.
    pub fn decode(&mut self) -> HeifResult<Image> {
        let primary_item_id = self.primary_item_id()?;
        self.decode_item(primary_item_id)
    }

    /// Decodes any image item, applying its transform properties and
    /// merging its auxiliary alpha item if present.
    pub fn decode_item(&mut self, item_id: u32) -> HeifResult<Image> {
        self.parsing_complete()?;
        let total_steps = match self.items.get(&item_id) {
            Some(item) if item.is_derived_image_item() => {
                u32_from_usize(std::cmp::max(1, item.source_item_ids.len()))?
            }
            _ => 1,
        };
        if let Some(progress) = &self.settings.progress {
            progress.start(total_steps);
        }
        let result = self.decode_item_impl(item_id);
        if let Some(progress) = &self.settings.progress {
            progress.end();
        }
        result
    }

    fn decode_item_impl(&mut self, item_id: u32) -> HeifResult<Image> {
        let mut visited = Vec::new();
        let mut image = self.decode_item_recursive(item_id, &mut visited)?;
        if let Some(alpha_item_id) = self.find_alpha_item(item_id) {
            if !image.yuv_format.is_interleaved() {
                let mut alpha_visited = Vec::new();
                let alpha = self.decode_item_recursive(alpha_item_id, &mut alpha_visited)?;
                image.import_alpha_from(&alpha)?;
                image.alpha_premultiplied =
                    self.items.get(&item_id).unwrap().prem_by_id == alpha_item_id;
            }
        }
        Ok(image)
    }

    fn find_alpha_item(&self, color_item_id: u32) -> Option<u32> {
        self.items
            .iter()
            .find(|(_, item)| {
                !item.should_skip()
                    && item.aux_for_id == color_item_id
                    && item.is_auxiliary_alpha()
            })
            .map(|(id, _)| *id)
    }

    fn decode_item_recursive(
        &mut self,
        item_id: u32,
        visited: &mut Vec<u32>,
    ) -> HeifResult<Image> {
        self.check_cancel()?;
        if visited.contains(&item_id) {
            return HeifError::invalid_input(
                SubErrorKind::ItemReferenceCycle,
                format!("derivation cycle through item {item_id}"),
            );
        }
        let item = self.accessible_item(item_id)?;
        if item.has_unsupported_essential_property {
            return HeifError::unsupported_feature(
                SubErrorKind::Unspecified,
                format!("item {item_id} has an essential property this library does not know"),
            );
        }
        let item_type = item.item_type.clone();
        visited.push(item_id);
        let image = match item_type.as_str() {
            "grid" => self.decode_grid(item_id, visited),
            "iovl" => self.decode_overlay(item_id, visited),
            "iden" => self.decode_identity(item_id, visited),
            _ if self.items.get(&item_id).unwrap().is_image_codec_item() => {
                self.decode_coded(item_id)
            }
            _ => HeifError::unsupported_feature(
                SubErrorKind::UnsupportedCodec,
                format!("item {item_id} of type {item_type:?} is not an image item"),
            ),
        }?;
        visited.pop();
        self.apply_transforms(item_id, image)
    }

    // Transformative properties apply in their ipma order; for MIAF files
    // that order is clap, then irot, then imir.
    fn apply_transforms(&mut self, item_id: u32, mut image: Image) -> HeifResult<Image> {
        let properties = self.items.get(&item_id).unwrap().properties.clone();
        for (property, _essential) in &properties {
            match property {
                ItemProperty::CleanAperture(clap) => {
                    match image.crop(clap) {
                        Ok(cropped) => image = cropped,
                        Err(err) => {
                            if self.settings.strictness.clap_valid() {
                                return Err(err);
                            }
                            log::warn!(
                                "ignoring invalid clap property on item {item_id}: {err}"
                            );
                        }
                    }
                }
                ItemProperty::ImageRotation(angle) => image = image.rotate_ccw(*angle)?,
                ItemProperty::ImageMirror(axis) => image = image.mirror(*axis)?,
                _ => {}
            }
        }
        Ok(image)
    }

    fn decoder_config_for_item(&self, item: &Item) -> DecoderConfig {
        DecoderConfig {
            width: item.width,
            height: item.height,
            depth: item
                .pixi()
                .and_then(|pixi| pixi.plane_depths.first().copied())
                .or(item.codec_config().map(|config| config.depth()))
                .unwrap_or(8),
            codec_config: item.codec_config().cloned(),
            component_definitions: item.component_definitions().cloned(),
            max_threads: self.settings.max_threads,
            image_size_limit: self.settings.limits.image_size_limit,
            image_dimension_limit: self.settings.limits.image_dimension_limit,
            allow_rrggbb_48bit: self.settings.allow_rrggbb_48bit,
        }
    }

    /// For length-prefixed NAL bitstreams, the decoder input is the codec
    /// configuration parameter sets followed by the item payload, each NAL
    /// preceded by its length on hvcC.nal_length_size bytes.
    fn assemble_codec_payload(
        config: Option<&CodecConfiguration>,
        payload: Vec<u8>,
    ) -> HeifResult<Vec<u8>> {
        let hevc = match config {
            Some(CodecConfiguration::Hevc(hevc)) => hevc,
            _ => return Ok(payload),
        };
        let nal_length_size = hevc.nal_length_size;
        if !(1..=8).contains(&nal_length_size) {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                format!("invalid NAL length size {nal_length_size}"),
            );
        }
        let mut data = Vec::new();
        for nal_unit in [&hevc.vps, &hevc.sps, &hevc.pps] {
            if nal_unit.is_empty() {
                continue;
            }
            let length = nal_unit.len() as u64;
            data.extend_from_slice(
                &length.to_be_bytes()[8 - nal_length_size as usize..],
            );
            data.extend_from_slice(nal_unit);
        }
        data.extend_from_slice(&payload);
        Ok(data)
    }

    fn decode_coded(&mut self, item_id: u32) -> HeifResult<Image> {
        let item = self.items.get(&item_id).unwrap();
        let config = match item.codec_config() {
            Some(config) => config.clone(),
            None => {
                return HeifError::invalid_input(
                    SubErrorKind::Unspecified,
                    format!("item {item_id} has no codec configuration property"),
                )
            }
        };
        let decoder_config = self.decoder_config_for_item(item);
        let pixi_missing = item.pixi().is_none();
        let properties = item.properties.clone();
        let declared_width = item.width;
        let declared_height = item.height;
        let plugin = match codecs::select_plugin(&self.plugins, config.compression_format()) {
            Some(plugin) => plugin,
            None => {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedCodec,
                    format!(
                        "no codec plugin is registered for {:?}",
                        config.compression_format()
                    ),
                )
            }
        };
        if pixi_missing && self.settings.strictness.pixi_required() {
            return HeifError::invalid_input(
                SubErrorKind::InvalidPixiBox,
                format!("item {item_id} is missing the mandatory pixi property"),
            );
        }
        let payload = self.item_data(item_id)?;
        let payload = Self::assemble_codec_payload(Some(&config), payload)?;
        let mut codec = plugin.new_decoder(&decoder_config)?;
        codec.set_strict_decoding(self.settings.strictness.is_strict());
        codec.push_data(&payload)?;
        let mut image = codec.decode_image()?;
        self.budget.charge(
            image.allocation_size(image.has_plane(Plane::A))?,
            self.settings.limits.max_total_memory,
        )?;
        if declared_width != 0
            && (image.width != declared_width || image.height != declared_height)
        {
            return HeifError::invalid_input(
                SubErrorKind::InvalidImageSize,
                format!(
                    "item {item_id} decoded to {}x{} but ispe declares {declared_width}x\
                     {declared_height}",
                    image.width, image.height
                ),
            );
        }
        Self::attach_color_properties(&mut image, &properties);
        Ok(image)
    }

    fn attach_color_properties(image: &mut Image, properties: &[(ItemProperty, bool)]) {
        for (property, _essential) in properties {
            match property {
                ItemProperty::ColorInformation(ColorInformation::Nclx(nclx)) => {
                    image.color_primaries = nclx.color_primaries;
                    image.transfer_characteristics = nclx.transfer_characteristics;
                    image.matrix_coefficients = nclx.matrix_coefficients;
                    image.yuv_range = nclx.yuv_range;
                }
                ItemProperty::ColorInformation(ColorInformation::Icc(icc)) => {
                    image.icc = icc.clone();
                }
                ItemProperty::ContentLightLevelInformation(clli) => image.clli = Some(*clli),
                ItemProperty::MasteringDisplayColourVolume(mdcv) => image.mdcv = Some(*mdcv),
                ItemProperty::PixelAspectRatio(pasp) => image.pasp = Some(*pasp),
                _ => {}
            }
        }
    }

    fn grid_sources(&self, item_id: u32) -> HeifResult<Vec<u32>> {
        let item = self.items.get(&item_id).unwrap();
        if item.source_item_ids.is_empty() {
            return HeifError::invalid_input(
                SubErrorKind::InvalidGridData,
                format!("derived item {item_id} has no dimg references"),
            );
        }
        for source_id in &item.source_item_ids {
            match self.items.get(source_id) {
                Some(source) if !source.should_skip() => {}
                _ => {
                    return HeifError::invalid_input(
                        SubErrorKind::NonexistingItemReferenced,
                        format!("derived item {item_id} references unusable item {source_id}"),
                    )
                }
            }
        }
        Ok(item.source_item_ids.clone())
    }

    fn decode_grid(&mut self, item_id: u32, visited: &mut Vec<u32>) -> HeifResult<Image> {
        let payload = self.item_data(item_id)?;
        let grid = parse_grid(&payload, &self.settings.limits)?;
        let sources = self.grid_sources(item_id)?;
        let tile_count = checked_mul!(grid.rows, grid.columns)?;
        if u64_from_usize(sources.len())? != u64::from(tile_count) {
            return HeifError::invalid_input(
                SubErrorKind::InvalidGridData,
                format!(
                    "grid of {}x{} requires {tile_count} dimg references, found {}",
                    grid.rows,
                    grid.columns,
                    sources.len()
                ),
            );
        }
        // Validate the declared tile geometry and configuration before
        // decoding or allocating anything.
        let first_source = self.items.get(&sources[0]).unwrap();
        let tile_width = first_source.width;
        let tile_height = first_source.height;
        let first_config = first_source.codec_config().cloned();
        for source_id in &sources {
            let source = self.items.get(source_id).unwrap();
            if source.width != tile_width || source.height != tile_height {
                return HeifError::invalid_input(
                    SubErrorKind::InvalidGridData,
                    "grid tiles declare mismatching dimensions",
                );
            }
            // ISO/IEC 23000-22:2019 (MIAF), Section 7.3.11.4.1: all input
            // images of a grid image item shall use the same coding format
            // and decoder configuration.
            if source.codec_config().cloned() != first_config {
                return HeifError::invalid_input(
                    SubErrorKind::WrongTileImageConfiguration,
                    "grid tiles have mismatching codec configurations",
                );
            }
        }
        if tile_width != 0 {
            validate_grid_tile_dimensions(tile_width, tile_height, &grid)?;
        }

        // Per-tile transform properties require the sequential path, where
        // every tile goes through the full single-item pipeline.
        let all_coded = sources.iter().all(|id| {
            let source = self.items.get(id).unwrap();
            source.is_image_codec_item() && !source.has_transformative_property()
        });
        let tiles = if all_coded && self.settings.max_threads > 1 && sources.len() > 1 {
            self.decode_tiles_parallel(&sources)?
        } else {
            let mut tiles = Vec::new();
            for source_id in &sources {
                self.check_cancel()?;
                tiles.push(self.decode_item_recursive(*source_id, visited)?);
                if let Some(progress) = &self.settings.progress {
                    progress.on_progress(u32_from_usize(tiles.len())?);
                }
            }
            tiles
        };

        self.check_cancel()?;
        let first_tile = &tiles[0];
        let mut canvas = Image::create(grid.width, grid.height, first_tile.depth, first_tile.yuv_format);
        canvas.copy_properties_from(first_tile);
        self.budget.charge(
            canvas.allocation_size(false)?,
            self.settings.limits.max_total_memory,
        )?;
        canvas.allocate_planes(false)?;
        for (tile_index, tile) in tiles.iter().enumerate() {
            if !tile.has_same_properties_and_cicp(first_tile) {
                return HeifError::invalid_input(
                    SubErrorKind::WrongTileImageConfiguration,
                    "grid tiles decoded to mismatching formats",
                );
            }
            canvas.copy_from_tile(tile, grid.columns, u32_from_usize(tile_index)?, false)?;
        }
        let item = self.items.get(&item_id).unwrap();
        Self::attach_color_properties(&mut canvas, &item.properties.clone());
        Ok(canvas)
    }

    /// Decodes coded grid tiles on a bounded worker pool. Payload resolution
    /// stays on the calling thread because the underlying reader is shared.
    fn decode_tiles_parallel(&mut self, sources: &[u32]) -> HeifResult<Vec<Image>> {
        let mut jobs = Vec::new();
        for source_id in sources {
            self.check_cancel()?;
            let item = self.items.get(source_id).unwrap();
            let config = self.decoder_config_for_item(item);
            let codec_config = item.codec_config().cloned();
            let format = match &codec_config {
                Some(codec_config) => codec_config.compression_format(),
                None => {
                    return HeifError::invalid_input(
                        SubErrorKind::Unspecified,
                        format!("item {source_id} has no codec configuration property"),
                    )
                }
            };
            let plugin = codecs::select_plugin(&self.plugins, format).ok_or(HeifError::new(
                ErrorKind::UnsupportedFeature,
                SubErrorKind::UnsupportedCodec,
                format!("no codec plugin is registered for {format:?}"),
            ))?;
            let payload = self.item_data(*source_id)?;
            let payload = Self::assemble_codec_payload(codec_config.as_ref(), payload)?;
            jobs.push((plugin, config, payload));
        }
        let strict = self.settings.strictness.is_strict();
        let progress = self.settings.progress.clone();
        let thread_count = std::cmp::min(
            self.settings.max_threads as usize,
            std::cmp::max(1, jobs.len()),
        );
        let chunk_size = jobs.len().div_ceil(thread_count);
        let mut tiles: Vec<HeifResult<Image>> = Vec::new();
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for chunk in jobs.chunks(chunk_size) {
                let progress = progress.clone();
                handles.push(scope.spawn(move || {
                    let mut decoded = Vec::new();
                    for (plugin, config, payload) in chunk {
                        if let Some(progress) = &progress {
                            if progress.is_cancelled() {
                                decoded.push(HeifError::canceled());
                                return decoded;
                            }
                        }
                        decoded.push(decode_one_payload(plugin, config, payload, strict));
                    }
                    decoded
                }));
            }
            for handle in handles {
                tiles.append(&mut handle.join().unwrap_or_default());
            }
        });
        let mut images = Vec::new();
        for (index, tile) in tiles.into_iter().enumerate() {
            images.push(tile?);
            if let Some(progress) = &self.settings.progress {
                progress.on_progress(u32_from_usize(index + 1)?);
            }
        }
        if images.len() != sources.len() {
            return HeifError::canceled();
        }
        for image in &images {
            self.budget.charge(
                image.allocation_size(image.has_plane(Plane::A))?,
                self.settings.limits.max_total_memory,
            )?;
        }
        Ok(images)
    }

    fn decode_overlay(&mut self, item_id: u32, visited: &mut Vec<u32>) -> HeifResult<Image> {
        let payload = self.item_data(item_id)?;
        let sources = self.grid_sources(item_id)?;
        let overlay = parse_overlay(&payload, sources.len(), &self.settings.limits)?;
        let mut canvas: Option<Image> = None;
        for (input_index, source_id) in sources.iter().enumerate() {
            self.check_cancel()?;
            let input = self.decode_item_recursive(*source_id, visited)?;
            if canvas.is_none() {
                let mut created = Image::create(
                    overlay.width,
                    overlay.height,
                    input.depth,
                    input.yuv_format,
                );
                created.copy_properties_from(&input);
                self.budget.charge(
                    created.allocation_size(false)?,
                    self.settings.limits.max_total_memory,
                )?;
                created.allocate_planes(false)?;
                created.fill(overlay.canvas_fill_value)?;
                canvas = Some(created);
            }
            let canvas = canvas.as_mut().unwrap();
            let x = i64::from(overlay.horizontal_offsets[input_index]);
            let y = i64::from(overlay.vertical_offsets[input_index]);
            if x >= i64::from(overlay.width)
                || y >= i64::from(overlay.height)
                || x + i64::from(input.width) <= 0
                || y + i64::from(input.height) <= 0
            {
                log::warn!(
                    "overlay input {source_id} at ({x}, {y}) is completely outside the canvas; \
                     skipping"
                );
                continue;
            }
            canvas.overlay(&input, x, y)?;
            if let Some(progress) = &self.settings.progress {
                progress.on_progress(u32_from_usize(input_index + 1)?);
            }
        }
        let mut canvas = canvas.unwrap();
        let item = self.items.get(&item_id).unwrap();
        Self::attach_color_properties(&mut canvas, &item.properties.clone());
        Ok(canvas)
    }

    fn decode_identity(&mut self, item_id: u32, visited: &mut Vec<u32>) -> HeifResult<Image> {
        let sources = self.grid_sources(item_id)?;
        if sources.len() != 1 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                format!("iden item {item_id} must have exactly one dimg reference"),
            );
        }
        // The identity derivation carries only its own transform
        // properties, applied by the caller.
        self.decode_item_recursive(sources[0], visited)
    }

    /// Exif payload attached to the given item (or the primary item).
    pub fn exif(&mut self, item_id: Option<u32>) -> HeifResult<Option<Vec<u8>>> {
        self.parsing_complete()?;
        if self.settings.ignore_exif {
            return Ok(None);
        }
        let color_id = match item_id {
            Some(id) => id,
            None => self.boxes.meta.primary_item_id,
        };
        let exif_item = self
            .items
            .iter()
            .find(|(_, item)| item.is_exif(Some(color_id)))
            .map(|(id, _)| *id);
        match exif_item {
            Some(id) => Ok(Some(self.item_data(id)?)),
            None => Ok(None),
        }
    }

    /// XMP payload attached to the given item (or the primary item).
    pub fn xmp(&mut self, item_id: Option<u32>) -> HeifResult<Option<Vec<u8>>> {
        self.parsing_complete()?;
        if self.settings.ignore_xmp {
            return Ok(None);
        }
        let color_id = match item_id {
            Some(id) => id,
            None => self.boxes.meta.primary_item_id,
        };
        let xmp_item = self
            .items
            .iter()
            .find(|(_, item)| item.is_xmp(Some(color_id)))
            .map(|(id, _)| *id);
        match xmp_item {
            Some(id) => Ok(Some(self.item_data(id)?)),
            None => Ok(None),
        }
    }

    /// Region items describing the given item (or the primary item), in
    /// file order.
    pub fn region_items(&mut self, item_id: Option<u32>) -> HeifResult<Vec<RegionItem>> {
        self.parsing_complete()?;
        let color_id = match item_id {
            Some(id) => id,
            None => self.boxes.meta.primary_item_id,
        };
        let region_item_ids: Vec<u32> = self
            .items
            .iter()
            .filter(|(_, item)| item.is_region_item(Some(color_id)))
            .map(|(id, _)| *id)
            .collect();
        let mut region_items = Vec::new();
        for id in region_item_ids {
            let payload = self.item_data(id)?;
            region_items.push(regions::parse(id, &payload)?);
        }
        Ok(region_items)
    }
}

fn decode_one_payload(
    plugin: &Arc<dyn DecoderPlugin>,
    config: &DecoderConfig,
    payload: &[u8],
    strict: bool,
) -> HeifResult<Image> {
    let mut codec = plugin.new_decoder(config)?;
    codec.set_strict_decoding(strict);
    codec.push_data(payload)?;
    let image = codec.decode_image()?;
    if config.width != 0 && (image.width != config.width || image.height != config.height) {
        return HeifError::invalid_input(
            SubErrorKind::InvalidImageSize,
            format!(
                "tile decoded to {}x{} but ispe declares {}x{}",
                image.width, image.height, config.width, config.height
            ),
        );
    }
    Ok(image)
}
