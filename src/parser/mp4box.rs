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

use crate::decoder::GenericIO;
use crate::internal_utils::stream::*;
use crate::internal_utils::*;
use crate::utils::clap::CleanAperture;
use crate::utils::*;
use crate::*;

use std::collections::HashSet;

#[derive(Debug, PartialEq)]
pub enum BoxSize {
    FixedSize(usize), // In bytes, header exclusive.
    UntilEndOfStream, // The box goes on until the end of the input stream.
}

#[derive(Debug)]
pub(crate) struct BoxHeader {
    pub size: BoxSize,
    pub box_type: String,
    // Extended type, only present when box_type is "uuid".
    pub uuid: Option<[u8; 16]>,
}

impl BoxHeader {
    fn size(&self) -> usize {
        match self.size {
            BoxSize::FixedSize(size) => size,
            BoxSize::UntilEndOfStream => 0,
        }
    }
}

/// Nesting budget threaded through every container box descent.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ParseContext<'a> {
    pub limits: &'a Limits,
    pub depth: u32,
}

impl<'a> ParseContext<'a> {
    pub(crate) fn create(limits: &'a Limits) -> Self {
        Self { limits, depth: 0 }
    }

    pub(crate) fn descend(&self) -> HeifResult<ParseContext<'a>> {
        let depth = self.depth + 1;
        if depth >= self.limits.max_nesting_level {
            return HeifError::security_limit(format!(
                "box nesting deeper than {} levels",
                self.limits.max_nesting_level
            ));
        }
        Ok(ParseContext {
            limits: self.limits,
            depth,
        })
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct FileTypeBox {
    pub major_brand: String,
    pub minor_version: String,
    pub compatible_brands: Vec<String>,
}

impl FileTypeBox {
    pub fn has_brand(&self, brand: &str) -> bool {
        // Section 4.3.1 of ISO/IEC 14496-12 says the major_brand should be
        // repeated in the compatible_brands, but do not rely on that.
        if self.major_brand.as_str() == brand {
            return true;
        }
        self.compatible_brands.iter().any(|x| x.as_str() == brand)
    }

    pub fn has_compatible_brand(&self, brands: &[&str]) -> bool {
        brands.iter().any(|brand| self.has_brand(brand))
    }

    pub(crate) fn is_supported(&self) -> bool {
        if self.needs_mini() {
            return true;
        }
        self.has_compatible_brand(&["mif1", "heic", "heix", "avif"])
    }

    pub(crate) fn needs_mini(&self) -> bool {
        self.major_brand.as_str() == "mif3"
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemLocationExtent {
    // Only used for construction method 2, as a 1-based index into the
    // item's 'iloc' typed references, selecting which referenced item
    // supplies the bytes (0 addresses the first reference). offset and
    // size then address a range within that item's reconstructed data.
    pub index: u64,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Default, PartialEq)]
pub struct ItemLocationEntry {
    pub item_id: u32,
    pub construction_method: u8,
    pub data_reference_index: u16,
    pub base_offset: u64,
    pub extents: Vec<ItemLocationExtent>,
}

#[derive(Debug, Default, PartialEq)]
pub struct ItemLocationBox {
    pub offset_size: u8,
    pub length_size: u8,
    pub base_offset_size: u8,
    pub index_size: u8,
    pub items: Vec<ItemLocationEntry>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImageSpatialExtents {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PixelInformation {
    pub plane_depths: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColorInformation {
    Icc(Vec<u8>),
    Nclx(Nclx),
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Av1CodecConfiguration {
    pub seq_profile: u8,
    pub seq_level_idx0: u8,
    pub seq_tier0: u8,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub monochrome: bool,
    pub chroma_subsampling_x: u8,
    pub chroma_subsampling_y: u8,
    pub chroma_sample_position: ChromaSamplePosition,
    pub raw_data: Vec<u8>,
}

impl Av1CodecConfiguration {
    pub(crate) fn depth(&self) -> u8 {
        match self.twelve_bit {
            true => 12,
            false => match self.high_bitdepth {
                true => 10,
                false => 8,
            },
        }
    }

    pub(crate) fn pixel_format(&self) -> PixelFormat {
        if self.monochrome {
            PixelFormat::Monochrome
        } else if self.chroma_subsampling_x == 1 && self.chroma_subsampling_y == 1 {
            PixelFormat::Yuv420
        } else if self.chroma_subsampling_x == 1 {
            PixelFormat::Yuv422
        } else {
            PixelFormat::Yuv444
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HevcCodecConfiguration {
    pub bitdepth: u8,
    pub pixel_format: PixelFormat,
    pub nal_length_size: u8,
    pub vps: Vec<u8>,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    pub raw_data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VvcCodecConfiguration {
    pub nal_length_size: u8,
    pub ptl_present: bool,
    pub chroma_format_idc: Option<u8>,
    pub bitdepth: Option<u8>,
    pub raw_data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Jpeg2000CodecConfiguration {
    // Child boxes of 'j2kH', captured verbatim for the codec plugin.
    pub raw_data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaskConfiguration {
    pub bits_per_pixel: u8,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum SamplingMode {
    #[default]
    NoSubsampling = 0,
    Sampling422 = 1,
    Sampling420 = 2,
    Sampling411 = 3,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum InterleaveMode {
    #[default]
    Component = 0,
    Pixel = 1,
    Mixed = 2,
    Row = 3,
    TileComponent = 4,
    MultiY = 5,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UncompressedComponent {
    pub component_index: u16,
    pub bit_depth: u8,
    pub format: u8,
    pub align_size: u8,
}

/// Parsed 'uncC' configuration. Version 1 short-form profiles are expanded
/// into their implied component lists at parse time so downstream code only
/// deals with the full form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UncompressedConfiguration {
    pub version: u8,
    pub profile: String,
    pub components: Vec<UncompressedComponent>,
    pub sampling_mode: SamplingMode,
    pub interleave_mode: InterleaveMode,
    pub block_size: u8,
    pub components_little_endian: bool,
    pub block_pad_lsb: bool,
    pub block_little_endian: bool,
    pub block_reversed: bool,
    pub pad_unknown: bool,
    pub pixel_size: u32,
    pub row_align_size: u32,
    pub tile_align_size: u32,
    pub num_tile_cols: u32,
    pub num_tile_rows: u32,
}

impl UncompressedConfiguration {
    pub(crate) fn bit_depth(&self) -> u8 {
        self.components.first().map(|c| c.bit_depth).unwrap_or(0)
    }
}

// Predefined component types of the 'cmpd' box.
pub mod component_type {
    pub const MONOCHROME: u16 = 0;
    pub const Y: u16 = 1;
    pub const CB: u16 = 2;
    pub const CR: u16 = 3;
    pub const RED: u16 = 4;
    pub const GREEN: u16 = 5;
    pub const BLUE: u16 = 6;
    pub const ALPHA: u16 = 7;
    pub const DEPTH: u16 = 8;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComponentDefinition {
    pub component_type: u16,
    // Only present when component_type >= 0x8000.
    pub uri: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComponentDefinitions {
    pub components: Vec<ComponentDefinition>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CodecConfiguration {
    Av1(Av1CodecConfiguration),
    Hevc(HevcCodecConfiguration),
    Vvc(VvcCodecConfiguration),
    Jpeg2000(Jpeg2000CodecConfiguration),
    Uncompressed(UncompressedConfiguration),
    Mask(MaskConfiguration),
}

impl CodecConfiguration {
    pub(crate) fn depth(&self) -> u8 {
        match self {
            Self::Av1(config) => config.depth(),
            Self::Hevc(config) => config.bitdepth,
            Self::Vvc(config) => config.bitdepth.unwrap_or(8),
            Self::Jpeg2000(_) => 8,
            Self::Uncompressed(config) => config.bit_depth(),
            Self::Mask(config) => config.bits_per_pixel,
        }
    }

    pub(crate) fn pixel_format(&self) -> PixelFormat {
        match self {
            Self::Av1(config) => config.pixel_format(),
            Self::Hevc(config) => config.pixel_format,
            Self::Vvc(config) => match config.chroma_format_idc {
                Some(0) => PixelFormat::Monochrome,
                Some(1) => PixelFormat::Yuv420,
                Some(2) => PixelFormat::Yuv422,
                Some(3) => PixelFormat::Yuv444,
                _ => PixelFormat::None,
            },
            Self::Jpeg2000(_) => PixelFormat::None,
            Self::Uncompressed(config) => match config.sampling_mode {
                SamplingMode::Sampling420 => PixelFormat::Yuv420,
                SamplingMode::Sampling422 => PixelFormat::Yuv422,
                _ => PixelFormat::None, // Depends on the component list.
            },
            Self::Mask(_) => PixelFormat::Monochrome,
        }
    }

    pub(crate) fn nal_length_size(&self) -> u8 {
        match self {
            Self::Hevc(config) => config.nal_length_size,
            Self::Vvc(config) => config.nal_length_size,
            _ => 0,
        }
    }

    pub(crate) fn compression_format(&self) -> CompressionFormat {
        match self {
            Self::Av1(_) => CompressionFormat::Av1,
            Self::Hevc(_) => CompressionFormat::Hevc,
            Self::Vvc(_) => CompressionFormat::Vvc,
            Self::Jpeg2000(_) => CompressionFormat::Jpeg2000,
            Self::Uncompressed(_) => CompressionFormat::Uncompressed,
            Self::Mask(_) => CompressionFormat::Mask,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ItemProperty {
    ImageSpatialExtents(ImageSpatialExtents),
    PixelInformation(PixelInformation),
    CodecConfiguration(CodecConfiguration),
    ColorInformation(ColorInformation),
    PixelAspectRatio(PixelAspectRatio),
    AuxiliaryType(String),
    CleanAperture(CleanAperture),
    // Angle in multiples of 90 degrees, counter-clockwise.
    ImageRotation(u8),
    // 0: vertical axis (left-right swap), 1: horizontal axis (top-bottom).
    ImageMirror(u8),
    ContentLightLevelInformation(ContentLightLevelInformation),
    MasteringDisplayColourVolume(MasteringDisplayColourVolume),
    ComponentDefinitions(ComponentDefinitions),
    // Preserved verbatim so unknown properties round-trip bit-exact.
    Unknown {
        box_type: String,
        uuid: Option<[u8; 16]>,
        data: Vec<u8>,
    },
    // A no-op placeholder, such as a FreeSpaceBox 'free'.
    Unused,
}

// Section 8.11.14 of ISO/IEC 14496-12.
#[derive(Debug, Default, PartialEq)]
pub struct ItemPropertyAssociation {
    pub item_id: u32,
    pub associations: Vec<(
        u16,  // 1-based property_index
        bool, // essential
    )>,
}

#[derive(Debug, Default, PartialEq)]
pub struct ItemInfo {
    pub item_id: u32,
    pub item_protection_index: u16,
    pub item_type: String,
    pub item_name: String,
    pub content_type: String,
    pub content_encoding: String,
    pub uri_type: String,
    pub hidden: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct ItemPropertyBox {
    pub properties: Vec<ItemProperty>,
    pub associations: Vec<ItemPropertyAssociation>,
}

#[derive(Debug, PartialEq)]
pub struct ItemReference {
    // Read this reference as "{from_item_id} is a {reference_type} for
    // {to_item_id}" (except for dimg where it is the opposite direction).
    pub from_item_id: u32,
    pub to_item_id: u32,
    pub reference_type: String,
    pub index: u32, // 0-based index of the reference within the iref type.
}

#[derive(Debug, PartialEq)]
pub struct EntityGroup {
    pub grouping_type: String,
    pub group_id: u32,
    pub entity_ids: Vec<u32>,
}

#[derive(Debug, Default, PartialEq)]
pub struct DataReferenceBox {
    // Fourccs of the dref children ('url ', 'urn '), with flags bit 0
    // signalling self-contained data.
    pub entries: Vec<(String, bool)>,
}

#[derive(Debug, Default, PartialEq)]
pub struct MetaBox {
    pub iinf: Vec<ItemInfo>,
    pub iloc: ItemLocationBox,
    pub primary_item_id: u32, // pitm
    pub iprp: ItemPropertyBox,
    pub iref: Vec<ItemReference>,
    pub idat: Vec<u8>,
    pub grpl: Vec<EntityGroup>,
    pub dinf: Option<DataReferenceBox>,
}

/// A top-level box that is not interpreted by this library. Preserved with
/// its payload so that re-serialisation emits it in place, bit-exact.
#[derive(Debug, PartialEq)]
pub enum TopLevelEntry {
    Ftyp,
    Meta,
    Mini { data: Vec<u8> },
    Mdat,
    Raw { box_type: String, uuid: Option<[u8; 16]>, data: Vec<u8> },
}

#[derive(Debug, Default)]
pub struct HeifBoxes {
    pub ftyp: FileTypeBox,
    pub meta: MetaBox,
    // True when meta was synthesised from a MinimizedImageBox.
    pub meta_from_mini: bool,
    pub top_level: Vec<TopLevelEntry>,
}

pub(crate) fn parse_header(stream: &mut IStream, top_level: bool) -> HeifResult<BoxHeader> {
    // Section 4.2.2 of ISO/IEC 14496-12.
    let start_offset = stream.offset;
    // unsigned int(32) size;
    let mut size = stream.read_u32()? as u64;
    // unsigned int(32) type = boxtype;
    let box_type = stream.read_string(4)?;
    if size == 1 {
        // unsigned int(64) largesize;
        size = stream.read_u64()?;
    }
    let uuid = if box_type == "uuid" {
        // unsigned int(8) usertype[16] = extended_type;
        Some(stream.get_slice(16)?.try_into().unwrap())
    } else {
        None
    };
    if size == 0 {
        // Section 4.2.2 of ISO/IEC 14496-12:
        //   if size is 0, then this box shall be in a top-level box, and be
        //   the last box in its 'file', and its payload extends to the end
        //   of that enclosing 'file'.
        if !top_level {
            return HeifError::invalid_input(
                SubErrorKind::InvalidBoxSize,
                "non-top-level box with size 0",
            );
        }
        return Ok(BoxHeader {
            box_type,
            size: BoxSize::UntilEndOfStream,
            uuid,
        });
    }
    checked_decr!(size, u64_from_usize(stream.offset - start_offset)?);
    let size = usize_from_u64(size)?;
    if !top_level && size > stream.bytes_left()? {
        return HeifError::invalid_input(SubErrorKind::InvalidBoxSize, "possibly truncated box");
    }
    Ok(BoxHeader {
        box_type,
        size: BoxSize::FixedSize(size),
        uuid,
    })
}

fn check_box_size(header: &BoxHeader, limits: &Limits) -> HeifResult<()> {
    if let BoxSize::FixedSize(size) = header.size {
        if u64_from_usize(size)? > limits.max_box_size {
            return HeifError::security_limit(format!(
                "box {} of {} bytes exceeds the box size limit",
                header.box_type, size
            ));
        }
    }
    Ok(())
}

fn parse_ftyp(stream: &mut IStream) -> HeifResult<FileTypeBox> {
    // Section 4.3.2 of ISO/IEC 14496-12.
    // unsigned int(32) major_brand;
    let major_brand = stream.read_string(4)?;
    // unsigned int(32) minor_version;
    let minor_version = stream.read_string(4)?;
    if stream.bytes_left()? % 4 != 0 {
        return HeifError::invalid_input(
            SubErrorKind::InvalidBoxSize,
            format!(
                "Box[ftyp] contains a compatible brands section that isn't divisible by 4 {}",
                stream.bytes_left()?
            ),
        );
    }
    let mut compatible_brands: Vec<String> = create_vec_exact(stream.bytes_left()? / 4)?;
    // unsigned int(32) compatible_brands[];  // to end of the box
    while stream.has_bytes_left()? {
        compatible_brands.push(stream.read_string(4)?);
    }
    Ok(FileTypeBox {
        major_brand,
        minor_version,
        compatible_brands,
    })
}

fn parse_hdlr(stream: &mut IStream) -> HeifResult<String> {
    // Section 8.4.3.2 of ISO/IEC 14496-12.
    let (_version, _flags) = stream.read_and_enforce_version_and_flags(0)?;
    // unsigned int(32) pre_defined = 0;
    let predefined = stream.read_u32()?;
    if predefined != 0 {
        return HeifError::invalid_input(
            SubErrorKind::Unspecified,
            "Box[hdlr] contains a pre_defined value that is nonzero",
        );
    }
    // unsigned int(32) handler_type;
    let handler_type = stream.read_string(4)?;
    // const unsigned int(32)[3] reserved = 0;
    stream.skip(4 * 3)?;
    // string name;
    // Verify that a valid string is here, but don't store it: name is only
    // a human-readable label for inspection purposes.
    stream.read_c_string()?;
    Ok(handler_type)
}

fn parse_iloc(stream: &mut IStream, limits: &Limits) -> HeifResult<ItemLocationBox> {
    // Section 8.11.3.2 of ISO/IEC 14496-12.
    let (version, _flags) = stream.read_version_and_flags()?;
    if version > 2 {
        return HeifError::invalid_input(
            SubErrorKind::UnsupportedDataVersion,
            format!("Box[iloc] has an unsupported version: {version}"),
        );
    }
    let mut iloc = ItemLocationBox {
        // unsigned int(4) offset_size;
        offset_size: stream.read_bits(4)? as u8,
        // unsigned int(4) length_size;
        length_size: stream.read_bits(4)? as u8,
        // unsigned int(4) base_offset_size;
        base_offset_size: stream.read_bits(4)? as u8,
        index_size: if version == 1 || version == 2 {
            // unsigned int(4) index_size;
            stream.read_bits(4)? as u8
        } else {
            // unsigned int(4) reserved;
            stream.skip_bits(4)?;
            0
        },
        items: vec![],
    };

    // Section 8.11.3.3 of ISO/IEC 14496-12.
    for size in [
        iloc.offset_size,
        iloc.length_size,
        iloc.base_offset_size,
        iloc.index_size,
    ] {
        if ![0u8, 4, 8].contains(&size) {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                format!("Box[iloc] has invalid size: {size}"),
            );
        }
    }

    let item_count: u32 = if version < 2 {
        // unsigned int(16) item_count;
        stream.read_u16()? as u32
    } else {
        // unsigned int(32) item_count;
        stream.read_u32()?
    };
    if item_count > limits.max_item_count {
        return HeifError::security_limit(format!("Box[iloc] contains {item_count} items"));
    }
    for _i in 0..item_count {
        let mut entry = ItemLocationEntry {
            item_id: if version < 2 {
                // unsigned int(16) item_ID;
                stream.read_u16()? as u32
            } else {
                // unsigned int(32) item_ID;
                stream.read_u32()?
            },
            ..ItemLocationEntry::default()
        };
        if entry.item_id == 0 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                "Box[iloc] has invalid item id 0",
            );
        }
        if version == 1 || version == 2 {
            // unsigned int(12) reserved = 0;
            if stream.read_bits(12)? != 0 {
                return HeifError::invalid_input(
                    SubErrorKind::InvalidParameterValue,
                    "Box[iloc] has invalid reserved bits",
                );
            }
            // unsigned int(4) construction_method;
            entry.construction_method = stream.read_bits(4)? as u8;
            // 0: file offset, 1: idat offset, 2: item offset.
            if entry.construction_method > 2 {
                return HeifError::unsupported_feature(
                    SubErrorKind::UnsupportedItemConstructionMethod,
                    format!(
                        "Box[iloc] has unknown construction_method: {}",
                        entry.construction_method
                    ),
                );
            }
        }
        // unsigned int(16) data_reference_index;
        entry.data_reference_index = stream.read_u16()?;
        // unsigned int(base_offset_size*8) base_offset;
        entry.base_offset = stream.read_uxx(iloc.base_offset_size)?;
        // unsigned int(16) extent_count;
        let extent_count = stream.read_u16()?;
        for _j in 0..extent_count {
            let extent = ItemLocationExtent {
                // unsigned int(index_size*8) item_reference_index;
                index: stream.read_uxx(iloc.index_size)?,
                // unsigned int(offset_size*8) extent_offset;
                offset: stream.read_uxx(iloc.offset_size)?,
                // unsigned int(length_size*8) extent_length;
                size: stream.read_uxx(iloc.length_size)?,
            };
            entry.extents.push(extent);
        }
        iloc.items.push(entry);
    }
    Ok(iloc)
}

// Returns the primary item ID.
fn parse_pitm(stream: &mut IStream) -> HeifResult<u32> {
    // Section 8.11.4.2 of ISO/IEC 14496-12.
    let (version, _flags) = stream.read_version_and_flags()?;
    if version == 0 {
        // unsigned int(16) item_ID;
        Ok(stream.read_u16()? as u32)
    } else {
        // unsigned int(32) item_ID;
        Ok(stream.read_u32()?)
    }
}

fn parse_ispe(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 6.5.3.2 of ISO/IEC 23008-12.
    let (_version, _flags) = stream.read_and_enforce_version_and_flags(0)?;
    let ispe = ImageSpatialExtents {
        // unsigned int(32) image_width;
        width: stream.read_u32()?,
        // unsigned int(32) image_height;
        height: stream.read_u32()?,
    };
    if ispe.width == 0 || ispe.height == 0 {
        return HeifError::invalid_input(SubErrorKind::InvalidImageSize, "zero ispe dimension");
    }
    Ok(ItemProperty::ImageSpatialExtents(ispe))
}

fn parse_pixi(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 6.5.6.2 of ISO/IEC 23008-12.
    let (_version, _flags) = stream.read_and_enforce_version_and_flags(0)?;
    // unsigned int (8) num_channels;
    let num_channels = stream.read_u8()? as usize;
    if num_channels == 0 {
        return HeifError::invalid_input(
            SubErrorKind::InvalidPixiBox,
            "invalid plane count 0 in pixi box",
        );
    }
    let mut pixi = PixelInformation {
        plane_depths: create_vec_exact(num_channels)?,
    };
    for _ in 0..num_channels {
        // unsigned int (8) bits_per_channel;
        pixi.plane_depths.push(stream.read_u8()?);
        let depth = *pixi.plane_depths.last().unwrap();
        if depth == 0 || depth > 16 {
            return HeifError::unsupported_feature(
                SubErrorKind::UnsupportedBitDepth,
                format!("pixi depth {depth}"),
            );
        }
    }
    Ok(ItemProperty::PixelInformation(pixi))
}

#[allow(non_snake_case)]
fn parse_av1C(stream: &mut IStream) -> HeifResult<ItemProperty> {
    Ok(ItemProperty::CodecConfiguration(CodecConfiguration::Av1(
        Av1CodecConfiguration::parse(stream)?,
    )))
}

impl Av1CodecConfiguration {
    #[allow(non_snake_case)]
    pub(crate) fn parse(stream: &mut IStream) -> HeifResult<Av1CodecConfiguration> {
        let raw_data = stream.get_immutable_vec(stream.bytes_left()?)?;
        // See https://aomediacodec.github.io/av1-isobmff/v1.2.0.html#av1codecconfigurationbox-syntax.
        // unsigned int (1) marker = 1;
        let marker = stream.read_bits(1)?;
        if marker != 1 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                format!("Invalid marker ({marker}) in av1C"),
            );
        }
        // unsigned int (7) version = 1;
        let version = stream.read_bits(7)?;
        if version != 1 {
            return HeifError::invalid_input(
                SubErrorKind::UnsupportedDataVersion,
                format!("Invalid version ({version}) in av1C"),
            );
        }
        let av1C = Av1CodecConfiguration {
            // unsigned int(3) seq_profile;
            // unsigned int(5) seq_level_idx_0;
            seq_profile: stream.read_bits(3)? as u8,
            seq_level_idx0: stream.read_bits(5)? as u8,
            // unsigned int(1) seq_tier_0;
            // unsigned int(1) high_bitdepth;
            // unsigned int(1) twelve_bit;
            // unsigned int(1) monochrome;
            // unsigned int(1) chroma_subsampling_x;
            // unsigned int(1) chroma_subsampling_y;
            // unsigned int(2) chroma_sample_position;
            seq_tier0: stream.read_bits(1)? as u8,
            high_bitdepth: stream.read_bool()?,
            twelve_bit: stream.read_bool()?,
            monochrome: stream.read_bool()?,
            chroma_subsampling_x: stream.read_bits(1)? as u8,
            chroma_subsampling_y: stream.read_bits(1)? as u8,
            chroma_sample_position: stream.read_bits(2)?.into(),
            raw_data,
        };
        // unsigned int(3) reserved = 0;
        // unsigned int(1) initial_presentation_delay_present;
        // unsigned int(4) initial_presentation_delay_minus_one / reserved;
        // unsigned int(8) configOBUs[]; (remaining bytes, already captured)
        Ok(av1C)
    }
}

#[allow(non_snake_case)]
fn parse_hvcC(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 8.3.2.1 of ISO/IEC 14496-15.
    let raw_data = stream.get_immutable_vec(stream.bytes_left()?)?;
    // unsigned int(8) configurationVersion;
    let configuration_version = stream.read_u8()?;
    if configuration_version != 0 && configuration_version != 1 {
        return HeifError::invalid_input(
            SubErrorKind::UnsupportedDataVersion,
            format!("Unknown configurationVersion({configuration_version}) in hvcC"),
        );
    }
    // unsigned int(2) general_profile_space;
    // unsigned int(1) general_tier_flag;
    // unsigned int(5) general_profile_idc;
    // unsigned int(32) general_profile_compatibility_flags;
    // unsigned int(48) general_constraint_indicator_flags;
    // unsigned int(8) general_level_idc;
    // bit(4) reserved = '1111'b;
    // unsigned int(12) min_spatial_segmentation_idc;
    // bit(6) reserved = '111111'b;
    // unsigned int(2) parallelismType;
    // bit(6) reserved = '111111'b;
    stream.skip_bits(2 + 1 + 5 + 32 + 48 + 8 + 4 + 12 + 6 + 2 + 6)?;
    // unsigned int(2) chroma_format_idc;
    let pixel_format = match stream.read_bits(2)? {
        // Defined in ISO/IEC 23008-2 Section 6.2.
        0 => PixelFormat::Monochrome,
        1 => PixelFormat::Yuv420,
        2 => PixelFormat::Yuv422,
        // The only other possible value is 3 since we are reading 2 bits.
        _ => PixelFormat::Yuv444,
    };
    // bit(5) reserved = '11111'b;
    stream.skip_bits(5)?;
    // unsigned int(3) bit_depth_luma_minus8;
    let bitdepth = stream.read_bits(3)? as u8 + 8;
    // bit(5) reserved = '11111'b;
    // unsigned int(3) bit_depth_chroma_minus8;
    // unsigned int(16) avgFrameRate;
    // unsigned int(2) constantFrameRate;
    // unsigned int(3) numTemporalLayers;
    // unsigned int(1) temporalIdNested;
    stream.skip_bits(5 + 3 + 16 + 2 + 3 + 1)?;
    // unsigned int(2) lengthSizeMinusOne;
    let nal_length_size = 1 + stream.read_bits(2)? as u8;

    // unsigned int(8) numOfArrays;
    let num_of_arrays = stream.read_u8()?;
    let mut vps: Vec<u8> = Vec::new();
    let mut sps: Vec<u8> = Vec::new();
    let mut pps: Vec<u8> = Vec::new();
    for _i in 0..num_of_arrays {
        // unsigned int(1) array_completeness;
        // bit(1) reserved = 0;
        // unsigned int(6) NAL_unit_type;
        stream.skip(1)?;
        // unsigned int(16) numNalus;
        let num_nalus = stream.read_u16()?;
        for _j in 0..num_nalus {
            // unsigned int(16) nalUnitLength;
            let nal_unit_length = stream.read_u16()?;
            let nal_unit = stream.get_slice(nal_unit_length as usize)?;
            if nal_unit.is_empty() {
                continue;
            }
            let nal_unit_type = (nal_unit[0] >> 1) & 0x3f;
            match nal_unit_type {
                32 => vps = nal_unit.to_vec(),
                33 => sps = nal_unit.to_vec(),
                34 => pps = nal_unit.to_vec(),
                _ => {}
            }
        }
    }
    Ok(ItemProperty::CodecConfiguration(CodecConfiguration::Hevc(
        HevcCodecConfiguration {
            bitdepth,
            pixel_format,
            nal_length_size,
            vps,
            pps,
            sps,
            raw_data,
        },
    )))
}

#[allow(non_snake_case)]
fn parse_vvcC(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 11.2.4.2.2 of ISO/IEC 14496-15.
    let raw_data = stream.get_immutable_vec(stream.bytes_left()?)?;
    // bit(5) reserved = '11111'b;
    stream.skip_bits(5)?;
    // unsigned int(2) LengthSizeMinusOne;
    let nal_length_size = 1 + stream.read_bits(2)? as u8;
    // unsigned int(1) ptl_present_flag;
    let ptl_present = stream.read_bool()?;
    let mut chroma_format_idc = None;
    let mut bitdepth = None;
    if ptl_present {
        // unsigned int(9) ols_idx;
        // unsigned int(3) num_sublayers;
        // unsigned int(2) constant_frame_rate;
        stream.skip_bits(9 + 3 + 2)?;
        // unsigned int(2) chroma_format_idc;
        chroma_format_idc = Some(stream.read_bits(2)? as u8);
        // unsigned int(3) bit_depth_minus8;
        bitdepth = Some(stream.read_bits(3)? as u8 + 8);
        // bit(5) reserved = '11111'b;
        stream.skip_bits(5)?;
        // VvcPTLRecord and the NAL unit arrays follow; they are only needed
        // by the codec and are available through raw_data.
    }
    Ok(ItemProperty::CodecConfiguration(CodecConfiguration::Vvc(
        VvcCodecConfiguration {
            nal_length_size,
            ptl_present,
            chroma_format_idc,
            bitdepth,
            raw_data,
        },
    )))
}

fn parse_j2kH(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Rec. ITU-T T.815 | ISO/IEC 15444-16. The child boxes are handed to the
    // codec verbatim.
    let raw_data = stream.get_immutable_vec(stream.bytes_left()?)?;
    if raw_data.is_empty() {
        return HeifError::invalid_input(SubErrorKind::InvalidBoxSize, "empty j2kH box");
    }
    Ok(ItemProperty::CodecConfiguration(
        CodecConfiguration::Jpeg2000(Jpeg2000CodecConfiguration { raw_data }),
    ))
}

#[allow(non_snake_case)]
fn parse_mskC(stream: &mut IStream) -> HeifResult<ItemProperty> {
    let (_version, _flags) = stream.read_and_enforce_version_and_flags(0)?;
    // unsigned int(8) bits_per_pixel;
    let bits_per_pixel = stream.read_u8()?;
    if bits_per_pixel == 0 || bits_per_pixel > 16 {
        return HeifError::unsupported_feature(
            SubErrorKind::UnsupportedBitDepth,
            format!("mskC bits_per_pixel {bits_per_pixel}"),
        );
    }
    Ok(ItemProperty::CodecConfiguration(CodecConfiguration::Mask(
        MaskConfiguration { bits_per_pixel },
    )))
}

#[allow(non_snake_case)]
fn parse_uncC(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // ISO/IEC 23001-17 section 5.2.
    let (version, _flags) = stream.read_version_and_flags()?;
    // unsigned int(32) profile;
    let profile = stream.read_string(4)?;
    let mut uncc = UncompressedConfiguration {
        version,
        profile: profile.clone(),
        num_tile_cols: 1,
        num_tile_rows: 1,
        ..UncompressedConfiguration::default()
    };
    match version {
        1 => {
            // Short form: the profile implies the component layout.
            let component_count = match profile.as_str() {
                "rgb3" => 3,
                "rgba" | "abgr" => 4,
                _ => {
                    return HeifError::invalid_input(
                        SubErrorKind::InvalidParameterValue,
                        format!("unknown uncC version 1 profile {profile}"),
                    )
                }
            };
            for i in 0..component_count {
                uncc.components.push(UncompressedComponent {
                    component_index: i,
                    bit_depth: 8,
                    format: 0,
                    align_size: 0,
                });
            }
            uncc.interleave_mode = InterleaveMode::Pixel;
        }
        0 => {
            // unsigned int(32) component_count;
            let component_count = stream.read_u32()?;
            let mut components: Vec<UncompressedComponent> =
                create_vec_exact(usize_from_u32(component_count)?)?;
            for _ in 0..component_count {
                let component = UncompressedComponent {
                    // unsigned int(16) component_index;
                    component_index: stream.read_u16()?,
                    // unsigned int(8) component_bit_depth_minus_one;
                    bit_depth: stream.read_u8()? + 1,
                    // unsigned int(8) component_format;
                    format: stream.read_u8()?,
                    // unsigned int(8) component_align_size;
                    align_size: stream.read_u8()?,
                };
                if component.format != 0 {
                    // Only unsigned integer samples are supported. Float and
                    // complex types are not.
                    return HeifError::unsupported_feature(
                        SubErrorKind::InvalidParameterValue,
                        format!("uncC component format {}", component.format),
                    );
                }
                components.push(component);
            }
            uncc.components = components;
            // unsigned int(8) sampling_type;
            uncc.sampling_mode = match stream.read_u8()? {
                0 => SamplingMode::NoSubsampling,
                1 => SamplingMode::Sampling422,
                2 => SamplingMode::Sampling420,
                3 => SamplingMode::Sampling411,
                value => {
                    return HeifError::invalid_input(
                        SubErrorKind::InvalidParameterValue,
                        format!("invalid uncC sampling type {value}"),
                    )
                }
            };
            // unsigned int(8) interleave_type;
            uncc.interleave_mode = match stream.read_u8()? {
                0 => InterleaveMode::Component,
                1 => InterleaveMode::Pixel,
                2 => InterleaveMode::Mixed,
                3 => InterleaveMode::Row,
                4 => InterleaveMode::TileComponent,
                5 => InterleaveMode::MultiY,
                value => {
                    return HeifError::invalid_input(
                        SubErrorKind::InvalidParameterValue,
                        format!("invalid uncC interleave type {value}"),
                    )
                }
            };
            // unsigned int(8) block_size;
            uncc.block_size = stream.read_u8()?;
            // unsigned int(1) components_little_endian;
            // unsigned int(1) block_pad_lsb;
            // unsigned int(1) block_little_endian;
            // unsigned int(1) block_reversed;
            // unsigned int(1) pad_unknown;
            // unsigned int(3) reserved = 0;
            let flags = stream.read_u8()?;
            uncc.components_little_endian = flags & 0x80 != 0;
            uncc.block_pad_lsb = flags & 0x40 != 0;
            uncc.block_little_endian = flags & 0x20 != 0;
            uncc.block_reversed = flags & 0x10 != 0;
            uncc.pad_unknown = flags & 0x08 != 0;
            // unsigned int(32) pixel_size;
            uncc.pixel_size = stream.read_u32()?;
            // unsigned int(32) row_align_size;
            uncc.row_align_size = stream.read_u32()?;
            // unsigned int(32) tile_align_size;
            uncc.tile_align_size = stream.read_u32()?;
            // unsigned int(32) num_tile_cols_minus_one;
            uncc.num_tile_cols = checked_add!(stream.read_u32()?, 1)?;
            // unsigned int(32) num_tile_rows_minus_one;
            uncc.num_tile_rows = checked_add!(stream.read_u32()?, 1)?;
        }
        _ => {
            return HeifError::invalid_input(
                SubErrorKind::UnsupportedDataVersion,
                format!("unsupported uncC version {version}"),
            )
        }
    }
    Ok(ItemProperty::CodecConfiguration(
        CodecConfiguration::Uncompressed(uncc),
    ))
}

fn parse_cmpd(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // ISO/IEC 23001-17 section 5.1.
    // unsigned int(32) component_count;
    let component_count = stream.read_u32()?;
    let mut cmpd = ComponentDefinitions {
        components: create_vec_exact(usize_from_u32(component_count)?)?,
    };
    for _ in 0..component_count {
        // unsigned int(16) component_type;
        let component_type = stream.read_u16()?;
        let uri = if component_type >= 0x8000 {
            // utf8string component_type_uri;
            stream.read_c_string()?
        } else {
            String::new()
        };
        cmpd.components.push(ComponentDefinition {
            component_type,
            uri,
        });
    }
    Ok(ItemProperty::ComponentDefinitions(cmpd))
}

/// The implied component definitions of a version 1 short-form 'uncC'
/// profile, used when the file carries no explicit 'cmpd'.
pub(crate) fn implied_cmpd(profile: &str) -> Option<ComponentDefinitions> {
    let types: &[u16] = match profile {
        "rgb3" => &[
            component_type::RED,
            component_type::GREEN,
            component_type::BLUE,
        ],
        "rgba" => &[
            component_type::RED,
            component_type::GREEN,
            component_type::BLUE,
            component_type::ALPHA,
        ],
        "abgr" => &[
            component_type::ALPHA,
            component_type::BLUE,
            component_type::GREEN,
            component_type::RED,
        ],
        _ => return None,
    };
    Some(ComponentDefinitions {
        components: types
            .iter()
            .map(|&component_type| ComponentDefinition {
                component_type,
                uri: String::new(),
            })
            .collect(),
    })
}

fn parse_colr(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 12.1.5.2 of ISO/IEC 14496-12.
    // unsigned int(32) colour_type;
    let color_type = stream.read_string(4)?;
    if color_type == "rICC" || color_type == "prof" {
        if stream.bytes_left()? == 0 {
            // Section 7.2.1 of ICC.1:2010: the profile header alone is 128
            // bytes, so an empty ICC profile is invalid.
            return HeifError::invalid_input(
                SubErrorKind::InvalidBoxSize,
                format!("colr box contains 0 bytes of {color_type}"),
            );
        }
        // ICC_profile; // restricted ("rICC") or unrestricted ("prof")
        return Ok(ItemProperty::ColorInformation(ColorInformation::Icc(
            stream.get_slice(stream.bytes_left()?)?.to_vec(),
        )));
    }
    if color_type == "nclx" {
        let mut nclx = Nclx {
            // unsigned int(16) colour_primaries;
            color_primaries: stream.read_u16()?.into(),
            // unsigned int(16) transfer_characteristics;
            transfer_characteristics: stream.read_u16()?.into(),
            // unsigned int(16) matrix_coefficients;
            matrix_coefficients: stream.read_u16()?.into(),
            ..Nclx::default()
        };
        // unsigned int(1) full_range_flag;
        nclx.yuv_range = if stream.read_bool()? {
            image::YuvRange::Full
        } else {
            image::YuvRange::Limited
        };
        // unsigned int(7) reserved = 0;
        if stream.read_bits(7)? != 0 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                "colr box contains invalid reserved bits",
            );
        }
        return Ok(ItemProperty::ColorInformation(ColorInformation::Nclx(nclx)));
    }
    Ok(ItemProperty::ColorInformation(ColorInformation::Unknown))
}

fn parse_pasp(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 12.1.4.2 of ISO/IEC 14496-12.
    let pasp = PixelAspectRatio {
        // unsigned int(32) hSpacing;
        h_spacing: stream.read_u32()?,
        // unsigned int(32) vSpacing;
        v_spacing: stream.read_u32()?,
    };
    if pasp.h_spacing == 0 || pasp.v_spacing == 0 {
        return HeifError::invalid_input(
            SubErrorKind::InvalidParameterValue,
            "zero spacing in pasp",
        );
    }
    Ok(ItemProperty::PixelAspectRatio(pasp))
}

#[allow(non_snake_case)]
fn parse_auxC(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 6.5.8.2 of ISO/IEC 23008-12.
    let (_version, _flags) = stream.read_and_enforce_version_and_flags(0)?;
    // string aux_type;
    let auxiliary_type = stream.read_c_string()?;
    // template unsigned int(8) aux_subtype[];
    // until the end of the box, the semantics depend on the aux_type value
    Ok(ItemProperty::AuxiliaryType(auxiliary_type))
}

fn parse_clap(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 12.1.4.2 of ISO/IEC 14496-12.
    let clap = CleanAperture {
        // unsigned int(32) cleanApertureWidthN;
        // unsigned int(32) cleanApertureWidthD;
        width: stream.read_ufraction()?,
        // unsigned int(32) cleanApertureHeightN;
        // unsigned int(32) cleanApertureHeightD;
        height: stream.read_ufraction()?,
        // unsigned int(32) horizOffN;
        // unsigned int(32) horizOffD;
        horiz_off: stream.read_ufraction()?,
        // unsigned int(32) vertOffN;
        // unsigned int(32) vertOffD;
        vert_off: stream.read_ufraction()?,
    };
    Ok(ItemProperty::CleanAperture(clap))
}

fn parse_irot(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 6.5.10.2 of ISO/IEC 23008-12.
    // unsigned int (6) reserved = 0;
    if stream.read_bits(6)? != 0 {
        return HeifError::invalid_input(
            SubErrorKind::InvalidParameterValue,
            "invalid reserved bits in irot",
        );
    }
    // unsigned int (2) angle;
    let angle = stream.read_bits(2)? as u8;
    Ok(ItemProperty::ImageRotation(angle))
}

fn parse_imir(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 6.5.12.1 of ISO/IEC 23008-12.
    // unsigned int(7) reserved = 0;
    if stream.read_bits(7)? != 0 {
        return HeifError::invalid_input(
            SubErrorKind::InvalidParameterValue,
            "invalid reserved bits in imir",
        );
    }
    // unsigned int(1) axis;
    let axis = stream.read_bits(1)? as u8;
    Ok(ItemProperty::ImageMirror(axis))
}

fn parse_clli(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 12.1.6.2 of ISO/IEC 14496-12.
    Ok(ItemProperty::ContentLightLevelInformation(
        ContentLightLevelInformation {
            // unsigned int(16) max_content_light_level;
            max_cll: stream.read_u16()?,
            // unsigned int(16) max_pic_average_light_level;
            max_pall: stream.read_u16()?,
        },
    ))
}

fn parse_mdcv(stream: &mut IStream) -> HeifResult<ItemProperty> {
    // Section 12.1.7.2 of ISO/IEC 14496-12.
    let mut mdcv = MasteringDisplayColourVolume::default();
    for i in 0..3 {
        // unsigned int(16) display_primaries_x;
        mdcv.display_primaries_x[i] = stream.read_u16()?;
        // unsigned int(16) display_primaries_y;
        mdcv.display_primaries_y[i] = stream.read_u16()?;
    }
    // unsigned int(16) white_point_x;
    mdcv.white_point_x = stream.read_u16()?;
    // unsigned int(16) white_point_y;
    mdcv.white_point_y = stream.read_u16()?;
    // unsigned int(32) max_display_mastering_luminance;
    mdcv.max_display_mastering_luminance = stream.read_u32()?;
    // unsigned int(32) min_display_mastering_luminance;
    mdcv.min_display_mastering_luminance = stream.read_u32()?;
    Ok(ItemProperty::MasteringDisplayColourVolume(mdcv))
}

fn parse_ipco(stream: &mut IStream, ctx: &ParseContext) -> HeifResult<Vec<ItemProperty>> {
    // Section 8.11.14.2 of ISO/IEC 14496-12.
    let ctx = ctx.descend()?;
    let mut properties: Vec<ItemProperty> = Vec::new();
    while stream.has_bytes_left()? {
        let header = parse_header(stream, /*top_level=*/ false)?;
        check_box_size(&header, ctx.limits)?;
        let mut sub_stream = stream.sub_stream(&header.size)?;
        let property = match header.box_type.as_str() {
            "ispe" => parse_ispe(&mut sub_stream),
            "pixi" => parse_pixi(&mut sub_stream),
            "av1C" => parse_av1C(&mut sub_stream),
            "hvcC" => parse_hvcC(&mut sub_stream),
            "vvcC" => parse_vvcC(&mut sub_stream),
            "j2kH" => parse_j2kH(&mut sub_stream),
            "mskC" => parse_mskC(&mut sub_stream),
            "uncC" => parse_uncC(&mut sub_stream),
            "cmpd" => parse_cmpd(&mut sub_stream),
            "colr" => parse_colr(&mut sub_stream),
            "pasp" => parse_pasp(&mut sub_stream),
            "auxC" => parse_auxC(&mut sub_stream),
            "clap" => parse_clap(&mut sub_stream),
            "irot" => parse_irot(&mut sub_stream),
            "imir" => parse_imir(&mut sub_stream),
            "clli" => parse_clli(&mut sub_stream),
            "mdcv" => parse_mdcv(&mut sub_stream),
            "free" | "skip" => Ok(ItemProperty::Unused),
            _ => Ok(ItemProperty::Unknown {
                box_type: header.box_type.clone(),
                uuid: header.uuid,
                data: sub_stream.get_immutable_vec(sub_stream.bytes_left()?)?,
            }),
        };
        match property {
            Ok(property) => properties.push(property),
            Err(err)
                if matches!(
                    err.kind,
                    ErrorKind::InvalidInput | ErrorKind::UnsupportedFeature
                ) && err.sub_kind != SubErrorKind::SecurityLimitExceeded =>
            {
                // A malformed property only poisons the items that reference
                // it. Keep its slot so the 1-based ipco indices stay stable.
                log::warn!("dropping malformed property {}: {err}", header.box_type);
                properties.push(ItemProperty::Unknown {
                    box_type: header.box_type.clone(),
                    uuid: header.uuid,
                    data: sub_stream.data.to_vec(),
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(properties)
}

fn parse_ipma(
    stream: &mut IStream,
    limits: &Limits,
) -> HeifResult<Vec<ItemPropertyAssociation>> {
    // Section 8.11.14.2 of ISO/IEC 14496-12.
    let (version, flags) = stream.read_version_and_flags()?;
    // unsigned int(32) entry_count;
    let entry_count = stream.read_u32()?;
    if entry_count > limits.max_item_count {
        return HeifError::security_limit(format!("Box[ipma] contains {entry_count} entries"));
    }
    let mut ipma: Vec<ItemPropertyAssociation> = create_vec_exact(usize_from_u32(entry_count)?)?;
    for _i in 0..entry_count {
        let mut entry = ItemPropertyAssociation::default();
        if version < 1 {
            // unsigned int(16) item_ID;
            entry.item_id = stream.read_u16()? as u32;
        } else {
            // unsigned int(32) item_ID;
            entry.item_id = stream.read_u32()?;
        }
        if entry.item_id == 0 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                "invalid item id 0 in ipma",
            );
        }
        if !ipma.is_empty() {
            // ISO/IEC 23008-12, Section 9.3.1: each ItemPropertyAssociation
            // box shall be ordered by increasing item_ID, and there shall be
            // at most one association box for each item_ID.
            let previous_item_id = ipma.last().unwrap().item_id;
            if entry.item_id <= previous_item_id {
                return HeifError::invalid_input(
                    SubErrorKind::InvalidParameterValue,
                    "ipma item ids are not ordered by increasing id",
                );
            }
        }
        // unsigned int(8) association_count;
        let association_count = stream.read_u8()?;
        if association_count as u32 > limits.max_properties_per_item {
            return HeifError::security_limit(format!(
                "item {} has {association_count} property associations",
                entry.item_id
            ));
        }
        for _j in 0..association_count {
            // bit(1) essential;
            let essential = stream.read_bool()?;
            if flags & 0x1 == 1 {
                // unsigned int(15) property_index;
                entry
                    .associations
                    .push((stream.read_bits(15)? as u16, essential));
            } else {
                // unsigned int(7) property_index;
                entry
                    .associations
                    .push((stream.read_bits(7)? as u16, essential));
            }
        }
        ipma.push(entry);
    }
    Ok(ipma)
}

fn parse_iprp(stream: &mut IStream, ctx: &ParseContext) -> HeifResult<ItemPropertyBox> {
    // Section 8.11.14.2 of ISO/IEC 14496-12.
    let ctx = ctx.descend()?;
    let header = parse_header(stream, /*top_level=*/ false)?;
    if header.box_type != "ipco" {
        return HeifError::invalid_input(SubErrorKind::NoIpcoBox, "first box in iprp is not ipco");
    }
    let mut iprp = ItemPropertyBox::default();
    // Parse the ipco box.
    {
        let mut sub_stream = stream.sub_stream(&header.size)?;
        iprp.properties = parse_ipco(&mut sub_stream, &ctx)?;
    }
    // Parse the ipma boxes.
    let mut ipma_seen = false;
    while stream.has_bytes_left()? {
        let header = parse_header(stream, /*top_level=*/ false)?;
        if header.box_type != "ipma" {
            return HeifError::invalid_input(
                SubErrorKind::NoIpmaBox,
                "found non ipma box in iprp",
            );
        }
        let mut sub_stream = stream.sub_stream(&header.size)?;
        iprp.associations
            .append(&mut parse_ipma(&mut sub_stream, ctx.limits)?);
        ipma_seen = true;
    }
    if !ipma_seen {
        return HeifError::invalid_input(SubErrorKind::NoIpmaBox, "iprp contains no ipma box");
    }
    Ok(iprp)
}

fn parse_infe(stream: &mut IStream) -> HeifResult<ItemInfo> {
    // Section 8.11.6.2 of ISO/IEC 14496-12.
    let (version, flags) = stream.read_version_and_flags()?;
    if version != 2 && version != 3 {
        return HeifError::invalid_input(
            SubErrorKind::UnsupportedDataVersion,
            "infe box version 2 or 3 expected",
        );
    }
    let mut entry = ItemInfo {
        // ISO/IEC 23008-12, Section 6.4.2: (flags & 1) indicates that the
        // item is not intended to be a part of the presentation.
        hidden: (flags & 1) == 1,
        ..ItemInfo::default()
    };
    if version == 2 {
        // unsigned int(16) item_ID;
        entry.item_id = stream.read_u16()? as u32;
    } else {
        // unsigned int(32) item_ID;
        entry.item_id = stream.read_u32()?;
    }
    if entry.item_id == 0 {
        return HeifError::invalid_input(
            SubErrorKind::InvalidParameterValue,
            "invalid item id 0 in infe",
        );
    }
    // unsigned int(16) item_protection_index;
    entry.item_protection_index = stream.read_u16()?;
    // unsigned int(32) item_type;
    entry.item_type = stream.read_string(4)?;
    // utf8string item_name;
    entry.item_name = stream.read_c_string()?;
    if entry.item_type == "mime" {
        // utf8string content_type;
        entry.content_type = stream.read_c_string()?;
        // utf8string content_encoding; // optional
        if stream.has_bytes_left()? {
            entry.content_encoding = stream.read_c_string()?;
        }
    } else if entry.item_type == "uri " {
        // utf8string item_uri_type;
        entry.uri_type = stream.read_c_string()?;
    }
    Ok(entry)
}

fn parse_iinf(stream: &mut IStream, ctx: &ParseContext) -> HeifResult<Vec<ItemInfo>> {
    // Section 8.11.6.2 of ISO/IEC 14496-12.
    let ctx = ctx.descend()?;
    let (version, _flags) = stream.read_version_and_flags()?;
    let entry_count: u32 = if version == 0 {
        // unsigned int(16) entry_count;
        stream.read_u16()? as u32
    } else {
        // unsigned int(32) entry_count;
        stream.read_u32()?
    };
    if entry_count > ctx.limits.max_item_count {
        return HeifError::security_limit(format!("Box[iinf] contains {entry_count} items"));
    }
    let mut iinf: Vec<ItemInfo> = create_vec_exact(usize_from_u32(entry_count)?)?;
    for _i in 0..entry_count {
        let header = parse_header(stream, /*top_level=*/ false)?;
        if header.box_type != "infe" {
            return HeifError::invalid_input(
                SubErrorKind::NoInfeBox,
                "found non infe box in iinf",
            );
        }
        let mut sub_stream = stream.sub_stream(&header.size)?;
        iinf.push(parse_infe(&mut sub_stream)?);
    }
    Ok(iinf)
}

fn parse_iref(stream: &mut IStream) -> HeifResult<Vec<ItemReference>> {
    // Section 8.11.12.2 of ISO/IEC 14496-12.
    let (version, _flags) = stream.read_version_and_flags()?;
    let mut iref: Vec<ItemReference> = Vec::new();
    // versions > 1 are not supported. ignore them.
    if version > 1 {
        return Ok(iref);
    }
    while stream.has_bytes_left()? {
        let header = parse_header(stream, /*top_level=*/ false)?;
        let from_item_id: u32 = if version == 0 {
            // unsigned int(16) from_item_ID;
            stream.read_u16()? as u32
        } else {
            // unsigned int(32) from_item_ID;
            stream.read_u32()?
        };
        if from_item_id == 0 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                "invalid from_item_id 0 in iref",
            );
        }
        // unsigned int(16) reference_count;
        let reference_count = stream.read_u16()?;
        for index in 0..reference_count {
            let to_item_id: u32 = if version == 0 {
                // unsigned int(16) to_item_ID;
                stream.read_u16()? as u32
            } else {
                // unsigned int(32) to_item_ID;
                stream.read_u32()?
            };
            if to_item_id == 0 {
                return HeifError::invalid_input(
                    SubErrorKind::InvalidParameterValue,
                    "invalid to_item_id 0 in iref",
                );
            }
            iref.push(ItemReference {
                from_item_id,
                to_item_id,
                reference_type: header.box_type.clone(),
                index: index as u32,
            });
        }
    }
    Ok(iref)
}

fn parse_idat(stream: &mut IStream) -> HeifResult<Vec<u8>> {
    // Section 8.11.11.2 of ISO/IEC 14496-12.
    if !stream.has_bytes_left()? {
        return HeifError::invalid_input(SubErrorKind::InvalidBoxSize, "empty idat box");
    }
    let mut idat: Vec<u8> = create_vec_exact(stream.bytes_left()?)?;
    idat.extend_from_slice(stream.get_slice(stream.bytes_left()?)?);
    Ok(idat)
}

fn parse_grpl(stream: &mut IStream, ctx: &ParseContext) -> HeifResult<Vec<EntityGroup>> {
    // Section 8.18.3 of ISO/IEC 14496-12.
    let ctx = ctx.descend()?;
    let mut grpl: Vec<EntityGroup> = Vec::new();
    while stream.has_bytes_left()? {
        let header = parse_header(stream, /*top_level=*/ false)?;
        let mut sub_stream = stream.sub_stream(&header.size)?;
        let (_version, _flags) = sub_stream.read_version_and_flags()?;
        // unsigned int(32) group_id;
        let group_id = sub_stream.read_u32()?;
        // unsigned int(32) num_entities_in_group;
        let num_entities_in_group = sub_stream.read_u32()?;
        if num_entities_in_group > ctx.limits.max_item_count {
            return HeifError::security_limit(format!(
                "entity group with {num_entities_in_group} entries"
            ));
        }
        let mut entity_ids: Vec<u32> = create_vec_exact(usize_from_u32(num_entities_in_group)?)?;
        for _ in 0..num_entities_in_group {
            entity_ids.push(sub_stream.read_u32()?);
        }
        grpl.push(EntityGroup {
            grouping_type: header.box_type.clone(),
            group_id,
            entity_ids,
        })
    }
    Ok(grpl)
}

fn parse_dinf(stream: &mut IStream, ctx: &ParseContext) -> HeifResult<DataReferenceBox> {
    // Section 8.7.1.2 of ISO/IEC 14496-12.
    let ctx = ctx.descend()?;
    let header = parse_header(stream, /*top_level=*/ false)?;
    if header.box_type != "dref" {
        return HeifError::invalid_input(
            SubErrorKind::Unspecified,
            "dinf does not contain a dref box",
        );
    }
    let _ = ctx.descend()?;
    let mut sub_stream = stream.sub_stream(&header.size)?;
    let (_version, _flags) = sub_stream.read_and_enforce_version_and_flags(0)?;
    // unsigned int(32) entry_count;
    let entry_count = sub_stream.read_u32()?;
    let mut dref = DataReferenceBox::default();
    for _ in 0..entry_count {
        let entry_header = parse_header(&mut sub_stream, /*top_level=*/ false)?;
        let mut entry_stream = sub_stream.sub_stream(&entry_header.size)?;
        let (_version, entry_flags) = entry_stream.read_version_and_flags()?;
        // flags bit 0: media data is in the same file as this box.
        dref.entries
            .push((entry_header.box_type.clone(), (entry_flags & 1) == 1));
    }
    Ok(dref)
}

fn parse_meta(stream: &mut IStream, ctx: &ParseContext) -> HeifResult<MetaBox> {
    // Section 8.11.1.2 of ISO/IEC 14496-12.
    let ctx = ctx.descend()?;
    let (_version, _flags) = stream.read_and_enforce_version_and_flags(0)?;
    let mut meta = MetaBox::default();

    // Parse the first hdlr box.
    {
        let header = parse_header(stream, /*top_level=*/ false)?;
        if header.box_type != "hdlr" {
            return HeifError::invalid_input(
                SubErrorKind::NoHdlrBox,
                "first box in meta is not hdlr",
            );
        }
        let handler_type = parse_hdlr(&mut stream.sub_stream(&header.size)?)?;
        if handler_type != "pict" {
            // Section 6.2 of ISO/IEC 23008-12:
            //   The handler type for the MetaBox shall be 'pict'.
            return HeifError::invalid_input(
                SubErrorKind::NoPictHandler,
                "Box[hdlr] handler_type is not 'pict'",
            );
        }
    }

    let mut boxes_seen: HashSet<String> = HashSet::new();
    boxes_seen.insert(String::from("hdlr"));
    let mut pitm_seen = false;
    while stream.has_bytes_left()? {
        let header = parse_header(stream, /*top_level=*/ false)?;
        check_box_size(&header, ctx.limits)?;
        match header.box_type.as_str() {
            "hdlr" | "iloc" | "pitm" | "iprp" | "iinf" | "iref" | "idat" | "grpl" | "dinf" => {
                if boxes_seen.contains(&header.box_type) {
                    return HeifError::invalid_input(
                        SubErrorKind::DuplicateBox,
                        format!("duplicate {} box in meta", header.box_type),
                    );
                }
                boxes_seen.insert(header.box_type.clone());
            }
            _ => {}
        }
        let mut sub_stream = stream.sub_stream(&header.size)?;
        match header.box_type.as_str() {
            "iloc" => meta.iloc = parse_iloc(&mut sub_stream, ctx.limits)?,
            "pitm" => {
                meta.primary_item_id = parse_pitm(&mut sub_stream)?;
                pitm_seen = true;
            }
            "iprp" => meta.iprp = parse_iprp(&mut sub_stream, &ctx)?,
            "iinf" => meta.iinf = parse_iinf(&mut sub_stream, &ctx)?,
            "iref" => meta.iref = parse_iref(&mut sub_stream)?,
            "idat" => meta.idat = parse_idat(&mut sub_stream)?,
            "grpl" => meta.grpl = parse_grpl(&mut sub_stream, &ctx)?,
            "dinf" => meta.dinf = Some(parse_dinf(&mut sub_stream, &ctx)?),
            _ => {
                // Unrecognised child boxes consume their declared size.
            }
        }
    }
    if !pitm_seen {
        return HeifError::invalid_input(SubErrorKind::NoPitmBox, "no pitm box in meta");
    }
    if !boxes_seen.contains("iloc") {
        return HeifError::invalid_input(SubErrorKind::NoIlocBox, "no iloc box in meta");
    }
    if !boxes_seen.contains("iinf") {
        return HeifError::invalid_input(SubErrorKind::NoIinfBox, "no iinf box in meta");
    }
    if !boxes_seen.contains("iprp") {
        return HeifError::invalid_input(SubErrorKind::NoIprpBox, "no iprp box in meta");
    }
    Ok(meta)
}

pub(crate) fn parse(io: &mut GenericIO, limits: &Limits) -> HeifResult<HeifBoxes> {
    let ctx = ParseContext::create(limits);
    let mut ftyp: Option<FileTypeBox> = None;
    let mut meta: Option<MetaBox> = None;
    let mut meta_from_mini = false;
    let mut top_level: Vec<TopLevelEntry> = Vec::new();
    let mut parse_offset: u64 = 0;
    loop {
        // Read just enough to get the longest possible valid box header
        // (4+4+8+16 bytes).
        let header_data = io.read(parse_offset, 32)?;
        if header_data.is_empty() {
            // No error and size is 0. We have reached the end of the stream.
            break;
        }
        let mut header_stream = IStream::create(header_data);
        let header = parse_header(&mut header_stream, /*top_level=*/ true)?;
        check_box_size(&header, limits)?;
        parse_offset = checked_add!(parse_offset, header_stream.offset as u64)?;

        if ftyp.is_none() && header.box_type != "ftyp" {
            // Section 6.3.4 of ISO/IEC 14496-12: the FileTypeBox shall occur
            // before any variable-length box.
            return HeifError::invalid_input(
                SubErrorKind::NoFtypBox,
                format!("expected ftyp box, found {}", header.box_type),
            );
        }
        match header.box_type.as_str() {
            "ftyp" | "meta" | "mini" => {
                let box_data = match header.size {
                    BoxSize::UntilEndOfStream => io.read(parse_offset, usize::MAX)?,
                    BoxSize::FixedSize(size) => io.read_exact(parse_offset, size)?,
                };
                let mut box_stream = IStream::create(box_data);
                match header.box_type.as_str() {
                    "ftyp" => {
                        if ftyp.is_some() {
                            return HeifError::invalid_input(
                                SubErrorKind::DuplicateBox,
                                "duplicate ftyp box",
                            );
                        }
                        top_level.push(TopLevelEntry::Ftyp);
                        let parsed = parse_ftyp(&mut box_stream)?;
                        if !parsed.is_supported() {
                            return HeifError::unsupported_filetype(format!(
                                "no compatible brand in {:?}",
                                parsed.compatible_brands
                            ));
                        }
                        ftyp = Some(parsed);
                    }
                    "meta" => {
                        if meta.is_some() {
                            return HeifError::invalid_input(
                                SubErrorKind::DuplicateBox,
                                "duplicate meta box",
                            );
                        }
                        top_level.push(TopLevelEntry::Meta);
                        meta = Some(parse_meta(&mut box_stream, &ctx)?);
                    }
                    _ => {
                        if meta.is_some() {
                            return HeifError::invalid_input(
                                SubErrorKind::DuplicateBox,
                                "mini box next to a meta box",
                            );
                        }
                        // The MinimizedImageBox is mapped to a virtually
                        // reconstructed MetaBox whose iloc offsets point into
                        // the mini payload region of the file.
                        let data = box_stream.get_immutable_vec(box_stream.bytes_left()?)?;
                        meta = Some(parser::mini::parse_mini(
                            &mut box_stream,
                            usize_from_u64(parse_offset)?,
                        )?);
                        meta_from_mini = true;
                        top_level.push(TopLevelEntry::Mini { data });
                    }
                }
            }
            "mdat" => {
                // Media data is reached through iloc offsets; its payload is
                // not copied here.
                top_level.push(TopLevelEntry::Mdat);
            }
            _ => {
                // Unknown top-level boxes are preserved and re-emitted in
                // place on write.
                let box_data = match header.size {
                    BoxSize::UntilEndOfStream => io.read(parse_offset, usize::MAX)?,
                    BoxSize::FixedSize(size) => io.read_exact(parse_offset, size)?,
                };
                top_level.push(TopLevelEntry::Raw {
                    box_type: header.box_type.clone(),
                    uuid: header.uuid,
                    data: box_data.to_vec(),
                });
            }
        }
        if header.size == BoxSize::UntilEndOfStream {
            // There is no other box after this one.
            break;
        }
        parse_offset = checked_add!(parse_offset, header.size() as u64)?;
    }
    let ftyp = match ftyp {
        Some(ftyp) => ftyp,
        None => return HeifError::invalid_input(SubErrorKind::NoFtypBox, "no ftyp box"),
    };
    if ftyp.needs_mini() != meta_from_mini {
        return HeifError::unsupported_filetype("brand does not match the mini box presence");
    }
    let meta = match meta {
        Some(meta) => meta,
        None => return HeifError::invalid_input(SubErrorKind::NoMetaBox, "no meta box"),
    };
    Ok(HeifBoxes {
        ftyp,
        meta,
        meta_from_mini,
        top_level,
    })
}

/// Returns true if the first bytes of `data` look like a file this library
/// can parse. Intended for content sniffing; false negatives are possible
/// when fewer than 12 bytes are supplied.
pub fn peek_compatible_file_type(data: &[u8]) -> HeifResult<bool> {
    let mut stream = IStream::create(data);
    let header = parse_header(&mut stream, /*top_level=*/ true)?;
    if header.box_type != "ftyp" {
        return Ok(false);
    }
    let header_size = match header.size {
        BoxSize::FixedSize(size) => size,
        BoxSize::UntilEndOfStream => return Ok(false),
    };
    let mut sub_stream = if header_size > stream.bytes_left()? {
        // Truncated ftyp. Judge from the brands that are present.
        stream.sub_stream(&BoxSize::FixedSize(stream.bytes_left()?))?
    } else {
        stream.sub_stream(&header.size)?
    };
    let major_brand = match sub_stream.read_string(4) {
        Ok(major_brand) => major_brand,
        Err(_) => return Ok(false),
    };
    let mut ftyp = FileTypeBox {
        major_brand,
        minor_version: sub_stream.read_string(4).unwrap_or_default(),
        compatible_brands: Vec::new(),
    };
    while sub_stream.has_bytes_left().unwrap_or_default() {
        match sub_stream.read_string(4) {
            Ok(brand) => ftyp.compatible_brands.push(brand),
            Err(_) => break,
        }
    }
    Ok(ftyp.is_supported())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_compatible_file_type() -> HeifResult<()> {
        let buf = [
            0x00, 0x00, 0x00, 0x20, 0x66, 0x74, 0x79, 0x70, //
            0x61, 0x76, 0x69, 0x66, 0x00, 0x00, 0x00, 0x00, //
            0x61, 0x76, 0x69, 0x66, 0x6d, 0x69, 0x66, 0x31, //
            0x6d, 0x69, 0x61, 0x66, 0x4d, 0x41, 0x31, 0x41, //
            0x00, 0x00, 0x00, 0xf2, 0x6d, 0x65, 0x74, 0x61, //
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x28, //
        ];
        // Peeking should succeed starting from byte length 12, the end
        // offset of the major brand.
        let min_required_bytes = 12;
        for i in 0..buf.len() {
            let res = super::peek_compatible_file_type(&buf[..i]);
            if i < min_required_bytes {
                // Not enough bytes. The return should either be an error or
                // false.
                assert!(res.is_err() || !res.unwrap());
            } else {
                assert!(res?);
            }
        }
        Ok(())
    }

    #[test]
    fn header_largesize() {
        // size == 1 switches to a 64-bit largesize.
        let buf = [
            0x00, 0x00, 0x00, 0x01, b'm', b'd', b'a', b't', //
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, //
        ];
        let mut stream = IStream::create(&buf);
        let header = parse_header(&mut stream, true).unwrap();
        assert_eq!(header.box_type, "mdat");
        // 0x18 total minus 16 header bytes.
        assert_eq!(header.size, BoxSize::FixedSize(8));
    }

    #[test]
    fn header_size_zero_top_level_only() {
        let buf = [
            0x00, 0x00, 0x00, 0x00, b'm', b'd', b'a', b't', //
            0xde, 0xad, 0xbe, 0xef,
        ];
        let mut stream = IStream::create(&buf);
        let header = parse_header(&mut stream, true).unwrap();
        assert_eq!(header.size, BoxSize::UntilEndOfStream);
        let mut stream = IStream::create(&buf);
        assert!(parse_header(&mut stream, false).is_err());
    }

    #[test]
    fn nesting_limit() {
        let limits = Limits {
            max_nesting_level: 3,
            ..Limits::default()
        };
        let ctx = ParseContext::create(&limits);
        let ctx1 = ctx.descend().unwrap();
        let ctx2 = ctx1.descend().unwrap();
        let err = ctx2.descend().unwrap_err();
        assert_eq!(err.sub_kind, SubErrorKind::SecurityLimitExceeded);
    }
}
