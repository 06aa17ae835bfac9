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
use crate::utils::UFraction;
use crate::*;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CleanAperture {
    pub width: UFraction,
    pub height: UFraction,
    pub horiz_off: UFraction,
    pub vert_off: UFraction,
}

/// Crop rectangle in pixels, derived from a 'clap' property. The offsets in
/// the property are relative to the image center.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    fn is_integer_over_zero(fraction: &IFraction) -> bool {
        fraction.1 != 0 && fraction.is_integer() && fraction.get_i32() > 0
    }

    pub fn create_from(
        clap: &CleanAperture,
        image_width: u32,
        image_height: u32,
        pixel_format: PixelFormat,
    ) -> HeifResult<Self> {
        let width: IFraction = clap.width.try_into()?;
        let height: IFraction = clap.height.try_into()?;
        let horiz_off: IFraction = clap.horiz_off.try_into()?;
        let vert_off: IFraction = clap.vert_off.try_into()?;
        if !Self::is_integer_over_zero(&width) || !Self::is_integer_over_zero(&height) {
            return HeifError::invalid_input(
                SubErrorKind::InvalidCleanAperture,
                "clap width or height is not a positive integer",
            );
        }
        // The clean aperture offsets are relative to the image center.
        let mut crop_x = IFraction::simplified(i32_from_u32(image_width)?, 2);
        crop_x.add(&horiz_off)?;
        crop_x.sub(&IFraction(width.get_i32(), 2))?;
        let mut crop_y = IFraction::simplified(i32_from_u32(image_height)?, 2);
        crop_y.add(&vert_off)?;
        crop_y.sub(&IFraction(height.get_i32(), 2))?;
        if !crop_x.is_integer() || !crop_y.is_integer() {
            return HeifError::invalid_input(
                SubErrorKind::InvalidCleanAperture,
                "derived crop offset is not an integer",
            );
        }
        if crop_x.get_i32() < 0 || crop_y.get_i32() < 0 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidCleanAperture,
                "derived crop offset is negative",
            );
        }
        let rect = CropRect {
            x: crop_x.get_u32()?,
            y: crop_y.get_u32()?,
            width: width.get_u32()?,
            height: height.get_u32()?,
        };
        if checked_add!(rect.x, rect.width)? > image_width
            || checked_add!(rect.y, rect.height)? > image_height
        {
            return HeifError::invalid_input(
                SubErrorKind::InvalidCleanAperture,
                "crop rect is out of the image bounds",
            );
        }
        if (pixel_format.chroma_shift_x() == 1 && (rect.x % 2 != 0 || rect.width % 2 != 0))
            || (pixel_format.chroma_shift_y() == 1 && (rect.y % 2 != 0 || rect.height % 2 != 0))
        {
            return HeifError::invalid_input(
                SubErrorKind::InvalidCleanAperture,
                "crop rect is not aligned to the chroma subsampling",
            );
        }
        Ok(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(UFraction(96, 1), UFraction(132, 1), UFraction(0, 1), UFraction(0, 1), 120, 160,
                Some(CropRect { x: 12, y: 14, width: 96, height: 132 }); "centered")]
    #[test_case(UFraction(96, 1), UFraction(132, 1), UFraction(4294967283, 1), UFraction(0, 1),
                120, 160, None; "negative offset")]
    #[test_case(UFraction(100, 0), UFraction(80, 1), UFraction(0, 1), UFraction(0, 1), 120, 160,
                None; "zero denominator")]
    #[test_case(UFraction(121, 1), UFraction(160, 1), UFraction(0, 1), UFraction(0, 1), 120, 160,
                None; "larger than image")]
    fn crop_rect(
        width: UFraction,
        height: UFraction,
        horiz_off: UFraction,
        vert_off: UFraction,
        image_width: u32,
        image_height: u32,
        expected: Option<CropRect>,
    ) {
        let clap = CleanAperture {
            width,
            height,
            horiz_off,
            vert_off,
        };
        let rect = CropRect::create_from(&clap, image_width, image_height, PixelFormat::Yuv444);
        match expected {
            Some(expected) => assert_eq!(rect.unwrap(), expected),
            None => assert!(rect.is_err()),
        }
    }
}
