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

#![deny(unsafe_op_in_unsafe_fn)]

pub mod codecs;
pub mod decoder;
pub mod encoder;
pub mod image;
pub mod parser;
pub mod utils;

mod internal_utils;

use std::fmt;

#[derive(Debug, Default, PartialEq, Copy, Clone)]
pub enum ColorSpace {
    YCbCr,
    Rgb,
    Monochrome,
    #[default]
    Undefined,
}

/// Chroma layout of a pixel image. The Yuv* variants are planar; the
/// Interleaved* variants store all channels in plane 0.
#[derive(Debug, Default, PartialEq, Copy, Clone)]
pub enum PixelFormat {
    #[default]
    None,
    Yuv444,
    Yuv422,
    Yuv420,
    Monochrome,
    InterleavedRgb,
    InterleavedRgba,
    // 16 bits per channel with explicit endianness.
    InterleavedRrggbbBe,
    InterleavedRrggbbLe,
    InterleavedRrggbbaaBe,
    InterleavedRrggbbaaLe,
}

impl PixelFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::None => 0,
            PixelFormat::Monochrome => 1,
            PixelFormat::Yuv420 | PixelFormat::Yuv422 | PixelFormat::Yuv444 => 3,
            _ => 1,
        }
    }

    pub fn is_interleaved(&self) -> bool {
        matches!(
            self,
            PixelFormat::InterleavedRgb
                | PixelFormat::InterleavedRgba
                | PixelFormat::InterleavedRrggbbBe
                | PixelFormat::InterleavedRrggbbLe
                | PixelFormat::InterleavedRrggbbaaBe
                | PixelFormat::InterleavedRrggbbaaLe
        )
    }

    // Number of channels packed into one pixel of plane 0.
    pub fn channel_count(&self) -> usize {
        match self {
            PixelFormat::InterleavedRgb
            | PixelFormat::InterleavedRrggbbBe
            | PixelFormat::InterleavedRrggbbLe => 3,
            PixelFormat::InterleavedRgba
            | PixelFormat::InterleavedRrggbbaaBe
            | PixelFormat::InterleavedRrggbbaaLe => 4,
            _ => 1,
        }
    }

    pub fn has_alpha_channel(&self) -> bool {
        matches!(
            self,
            PixelFormat::InterleavedRgba
                | PixelFormat::InterleavedRrggbbaaBe
                | PixelFormat::InterleavedRrggbbaaLe
        )
    }

    pub fn color_space(&self) -> ColorSpace {
        match self {
            PixelFormat::None => ColorSpace::Undefined,
            PixelFormat::Monochrome => ColorSpace::Monochrome,
            PixelFormat::Yuv420 | PixelFormat::Yuv422 | PixelFormat::Yuv444 => ColorSpace::YCbCr,
            _ => ColorSpace::Rgb,
        }
    }

    pub(crate) fn chroma_shift_x(&self) -> u32 {
        match self {
            PixelFormat::Yuv420 | PixelFormat::Yuv422 => 1,
            _ => 0,
        }
    }

    pub(crate) fn chroma_shift_y(&self) -> u32 {
        match self {
            PixelFormat::Yuv420 => 1,
            _ => 0,
        }
    }
}

macro_rules! impl_from_primitive {
    ($from:ty, $to: ident, $default: ident, $($value:literal => $variant:ident),+) => {
        impl From<$from> for $to {
            fn from(value: $from) -> Self {
                match value {
                    $($value => $to::$variant,)+
                    _ => $to::$default,
                }
            }
        }
    };
}

#[repr(C)]
#[derive(Debug, Default, PartialEq, Copy, Clone)]
pub enum ChromaSamplePosition {
    #[default]
    Unknown = 0,
    Vertical = 1,
    Colocated = 2,
}

impl_from_primitive!(u32, ChromaSamplePosition, Unknown,
    1 => Vertical, 2 => Colocated);

#[repr(C)]
#[derive(Debug, Default, PartialEq, Copy, Clone)]
pub enum ColorPrimaries {
    Unknown = 0,
    Srgb = 1,
    #[default]
    Unspecified = 2,
    Bt470m = 4,
    Bt470bg = 5,
    Bt601 = 6,
    Smpte240 = 7,
    GenericFilm = 8,
    Bt2020 = 9,
    Xyz = 10,
    Smpte431 = 11,
    Smpte432 = 12,
    Ebu3213 = 22,
}

impl_from_primitive!(u16, ColorPrimaries, Unspecified,
    0 => Unknown, 1 => Srgb, 4 => Bt470m, 5 => Bt470bg, 6 => Bt601, 7 => Smpte240,
    8 => GenericFilm, 9 => Bt2020, 10 => Xyz, 11 => Smpte431, 12 => Smpte432,
    22 => Ebu3213);

#[allow(non_upper_case_globals)]
impl ColorPrimaries {
    pub const Bt709: Self = Self::Srgb;
}

#[repr(C)]
#[derive(Debug, Default, PartialEq, Copy, Clone)]
pub enum TransferCharacteristics {
    Unknown = 0,
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Bt470m = 4,  // 2.2 gamma
    Bt470bg = 5, // 2.8 gamma
    Bt601 = 6,
    Smpte240 = 7,
    Linear = 8,
    Log100 = 9,
    Log100Sqrt10 = 10,
    Iec61966 = 11,
    Bt1361 = 12,
    Srgb = 13,
    Bt2020_10bit = 14,
    Bt2020_12bit = 15,
    Pq = 16, // Perceptual Quantizer (HDR); BT.2100 PQ
    Smpte428 = 17,
    Hlg = 18, // Hybrid Log-Gamma (HDR); ARIB STD-B67; BT.2100 HLG
}

impl_from_primitive!(u16, TransferCharacteristics, Unspecified,
    0 => Unknown, 1 => Bt709, 4 => Bt470m, 5 => Bt470bg, 6 => Bt601, 7 => Smpte240,
    8 => Linear, 9 => Log100, 10 => Log100Sqrt10, 11 => Iec61966, 12 => Bt1361,
    13 => Srgb, 14 => Bt2020_10bit, 15 => Bt2020_12bit, 16 => Pq, 17 => Smpte428,
    18 => Hlg);

#[repr(C)]
#[derive(Debug, Default, PartialEq, Copy, Clone)]
pub enum MatrixCoefficients {
    Identity = 0,
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Fcc = 4,
    Bt470bg = 5,
    Bt601 = 6,
    Smpte240 = 7,
    Ycgco = 8,
    Bt2020Ncl = 9,
    Bt2020Cl = 10,
    Smpte2085 = 11,
    ChromaDerivedNcl = 12,
    ChromaDerivedCl = 13,
    Ictcp = 14,
}

impl_from_primitive!(u16, MatrixCoefficients, Unspecified,
    0 => Identity, 1 => Bt709, 4 => Fcc, 5 => Bt470bg, 6 => Bt601, 7 => Smpte240,
    8 => Ycgco, 9 => Bt2020Ncl, 10 => Bt2020Cl, 11 => Smpte2085,
    12 => ChromaDerivedNcl, 13 => ChromaDerivedCl, 14 => Ictcp);

/// Coded format of an image item, used to select a codec plugin.
#[repr(C)]
#[derive(Debug, Default, PartialEq, Eq, Hash, Copy, Clone)]
pub enum CompressionFormat {
    #[default]
    Undefined = 0,
    Hevc = 1,
    Av1 = 2,
    Vvc = 3,
    Jpeg = 4,
    Jpeg2000 = 5,
    Uncompressed = 6,
    Mask = 7,
}

/// Top-level error category. The values mirror the error codes of the C API
/// family this library models.
#[repr(C)]
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub enum ErrorKind {
    #[default]
    Ok = 0,
    InputDoesNotExist = 1,
    InvalidInput = 2,
    UnsupportedFiletype = 3,
    UnsupportedFeature = 4,
    UsageError = 5,
    MemoryAllocationError = 6,
    DecoderPluginError = 7,
    EncoderPluginError = 8,
    ColorProfileDoesNotExist = 9,
    PluginLoadingError = 10,
    Canceled = 11,
}

/// Refinement of [ErrorKind] naming the concrete cause.
#[repr(C)]
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub enum SubErrorKind {
    #[default]
    Unspecified,
    EndOfData,
    InvalidBoxSize,
    NoFtypBox,
    NoMetaBox,
    NoHdlrBox,
    NoPictHandler,
    NoPitmBox,
    NoIlocBox,
    NoIinfBox,
    NoInfeBox,
    NoIprpBox,
    NoIpcoBox,
    NoIpmaBox,
    NoIdatBox,
    NoItemData,
    DuplicateBox,
    SecurityLimitExceeded,
    NonexistingItemReferenced,
    IpmaBoxReferencesNonexistingProperty,
    InvalidPropertyIndex,
    ItemIsProtected,
    ExternalDataReference,
    UnsupportedItemConstructionMethod,
    ItemReferenceCycle,
    InvalidGridData,
    InvalidOverlayData,
    InvalidRegionData,
    InvalidImageSize,
    InvalidPixiBox,
    InvalidCleanAperture,
    InvalidFractionalNumber,
    InvalidParameterValue,
    WrongTileImageConfiguration,
    UnsupportedCodec,
    UnsupportedDataVersion,
    UnsupportedBitDepth,
    UnsupportedColorConversion,
    WaitingOnIo,
}

pub const DEFAULT_IMAGE_SIZE_LIMIT: u32 = 16384 * 16384;
pub const DEFAULT_IMAGE_DIMENSION_LIMIT: u32 = 32768;
pub const DEFAULT_NESTING_LEVEL_LIMIT: u32 = 100;
pub const DEFAULT_ITEM_COUNT_LIMIT: u32 = 4096;
pub const DEFAULT_PROPERTIES_PER_ITEM_LIMIT: u32 = 255;
pub const DEFAULT_BOX_SIZE_LIMIT: u64 = 1 << 32;
pub const DEFAULT_TOTAL_MEMORY_LIMIT: u64 = 4 << 30;

/// Security ceilings enforced while parsing and decoding. Every parse that
/// would exceed one of these fails fast instead of allocating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max_box_size: u64,
    pub max_nesting_level: u32,
    pub max_item_count: u32,
    pub max_total_memory: u64,
    pub max_properties_per_item: u32,
    pub image_size_limit: Option<std::num::NonZero<u32>>,
    pub image_dimension_limit: Option<std::num::NonZero<u32>>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_box_size: DEFAULT_BOX_SIZE_LIMIT,
            max_nesting_level: DEFAULT_NESTING_LEVEL_LIMIT,
            max_item_count: DEFAULT_ITEM_COUNT_LIMIT,
            max_total_memory: DEFAULT_TOTAL_MEMORY_LIMIT,
            max_properties_per_item: DEFAULT_PROPERTIES_PER_ITEM_LIMIT,
            image_size_limit: std::num::NonZero::new(DEFAULT_IMAGE_SIZE_LIMIT),
            image_dimension_limit: std::num::NonZero::new(DEFAULT_IMAGE_DIMENSION_LIMIT),
        }
    }
}

/// Structured error value: category + concrete cause + human readable
/// message. Every fallible API of this crate returns one of these.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HeifError {
    pub kind: ErrorKind,
    pub sub_kind: SubErrorKind,
    pub message: String,
}

impl fmt::Display for HeifError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}/{:?}", self.kind, self.sub_kind)
        } else {
            write!(f, "{:?}/{:?}: {}", self.kind, self.sub_kind, self.message)
        }
    }
}

impl std::error::Error for HeifError {}

pub type HeifResult<T> = Result<T, HeifError>;

/// Registers the built-in codec plugins. Must be called before the first
/// [decoder::Decoder::parse]; calling it again is a no-op. Plugin
/// registration is only allowed between [init] and the first parse.
pub fn init() {
    codecs::init_default_plugins();
}

/// Releases all registered codec plugins. Only meaningful for tests and
/// embedders that want to re-run [init] with a different plugin set.
pub fn deinit() {
    codecs::clear_plugins();
}
