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

pub mod clap;
pub mod error;

#[cfg(feature = "cli")]
pub mod reader;
#[cfg(feature = "cli")]
pub mod writer;

/// Unsigned fraction. Used as-is from the bitstream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UFraction(pub u32, pub u32);

/// Signed fraction. Used as-is from the bitstream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Fraction(pub i32, pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PixelAspectRatio {
    pub h_spacing: u32,
    pub v_spacing: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContentLightLevelInformation {
    pub max_cll: u16,
    pub max_pall: u16,
}

/// Mastering display colour volume, as signalled by the 'mdcv' property.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MasteringDisplayColourVolume {
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Nclx {
    pub color_primaries: crate::ColorPrimaries,
    pub transfer_characteristics: crate::TransferCharacteristics,
    pub matrix_coefficients: crate::MatrixCoefficients,
    pub yuv_range: crate::image::YuvRange,
}
