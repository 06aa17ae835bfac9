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

use crate::internal_utils::stream::*;
use crate::internal_utils::*;
use crate::*;

use std::num::NonZero;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Grid {
    pub rows: u32,
    pub columns: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub canvas_fill_value: [u16; 4],
    pub width: u32,
    pub height: u32,
    pub horizontal_offsets: Vec<i32>,
    pub vertical_offsets: Vec<i32>,
}

fn validate_derived_image_dimensions(
    width: u32,
    height: u32,
    size_limit: Option<NonZero<u32>>,
    dimension_limit: Option<NonZero<u32>>,
) -> HeifResult<()> {
    if width == 0 || height == 0 || !check_limits(width, height, size_limit, dimension_limit) {
        return HeifError::security_limit(format!(
            "derived image dimensions {width}x{height}"
        ));
    }
    Ok(())
}

/// Parses the payload of a 'grid' derived image item.
pub(crate) fn parse_grid(data: &[u8], limits: &Limits) -> HeifResult<Grid> {
    // ISO/IEC 23008-12 Section 6.6.2.3.2.
    let mut stream = IStream::create(data);
    // unsigned int(8) version = 0;
    let version = stream.read_u8()?;
    if version != 0 {
        return HeifError::invalid_input(
            SubErrorKind::InvalidGridData,
            format!("unsupported grid version {version}"),
        );
    }
    // unsigned int(8) flags;
    let flags = stream.read_u8()?;
    let grid = Grid {
        // unsigned int(8) rows_minus_one;
        rows: stream.read_u8()? as u32 + 1,
        // unsigned int(8) columns_minus_one;
        columns: stream.read_u8()? as u32 + 1,
        // FieldLength = ((flags & 1) + 1) * 16;
        // unsigned int(FieldLength) output_width;
        // unsigned int(FieldLength) output_height;
        width: if (flags & 1) == 1 { stream.read_u32()? } else { stream.read_u16()? as u32 },
        height: if (flags & 1) == 1 { stream.read_u32()? } else { stream.read_u16()? as u32 },
    };
    validate_derived_image_dimensions(
        grid.width,
        grid.height,
        limits.image_size_limit,
        limits.image_dimension_limit,
    )?;
    if stream.has_bytes_left()? {
        return HeifError::invalid_input(
            SubErrorKind::InvalidGridData,
            "unknown extra bytes in the grid payload",
        );
    }
    Ok(grid)
}

/// Checks that rows x columns tiles of the given size tile the declared
/// output, before any plane is allocated.
pub(crate) fn validate_grid_tile_dimensions(
    tile_width: u32,
    tile_height: u32,
    grid: &Grid,
) -> HeifResult<()> {
    if checked_mul!(tile_width, grid.columns)? < grid.width
        || checked_mul!(tile_height, grid.rows)? < grid.height
    {
        return HeifError::invalid_input(
            SubErrorKind::InvalidGridData,
            "grid tiles do not completely cover the output image \
             (ISO/IEC 23008-12:2017, Section 6.6.2.3.1)",
        );
    }
    if checked_mul!(tile_width, grid.columns - 1)? >= grid.width
        || checked_mul!(tile_height, grid.rows - 1)? >= grid.height
    {
        return HeifError::invalid_input(
            SubErrorKind::InvalidGridData,
            "grid tiles in the rightmost column and bottommost row do not overlap the output \
             image (MIAF ISO/IEC 23000-22:2019, Section 7.3.11.4.2, Figure 2)",
        );
    }
    Ok(())
}

/// Parses the payload of an 'iovl' derived image item. `reference_count` is
/// the number of `dimg` inputs.
pub(crate) fn parse_overlay(
    data: &[u8],
    reference_count: usize,
    limits: &Limits,
) -> HeifResult<Overlay> {
    // ISO/IEC 23008-12 Section 6.6.2.4.2.
    let mut stream = IStream::create(data);
    // unsigned int(8) version = 0;
    let version = stream.read_u8()?;
    if version != 0 {
        return HeifError::invalid_input(
            SubErrorKind::InvalidOverlayData,
            format!("unsupported iovl version {version}"),
        );
    }
    // unsigned int(8) flags;
    let flags = stream.read_u8()?;
    let mut overlay = Overlay::default();
    for value in &mut overlay.canvas_fill_value {
        // unsigned int(16) canvas_fill_value;
        *value = stream.read_u16()?;
    }
    // FieldLength = ((flags & 1) + 1) * 16;
    // unsigned int(FieldLength) output_width;
    // unsigned int(FieldLength) output_height;
    overlay.width = if (flags & 1) == 1 { stream.read_u32()? } else { stream.read_u16()? as u32 };
    overlay.height = if (flags & 1) == 1 { stream.read_u32()? } else { stream.read_u16()? as u32 };
    validate_derived_image_dimensions(
        overlay.width,
        overlay.height,
        limits.image_size_limit,
        limits.image_dimension_limit,
    )?;
    for _ in 0..reference_count {
        if (flags & 1) == 1 {
            // unsigned int(32) horizontal_offset;
            overlay.horizontal_offsets.push(stream.read_i32()?);
            // unsigned int(32) vertical_offset;
            overlay.vertical_offsets.push(stream.read_i32()?);
        } else {
            // unsigned int(16) horizontal_offset;
            overlay.horizontal_offsets.push(stream.read_i16()? as i32);
            // unsigned int(16) vertical_offset;
            overlay.vertical_offsets.push(stream.read_i16()? as i32);
        }
    }
    if stream.has_bytes_left()? {
        return HeifError::invalid_input(
            SubErrorKind::InvalidOverlayData,
            "unknown extra bytes in the iovl payload",
        );
    }
    Ok(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_narrow_fields() {
        // version 0, flags 0, 2x2 tiles, 1024x1024 output.
        let data = [0, 0, 1, 1, 0x04, 0x00, 0x04, 0x00];
        let grid = parse_grid(&data, &Limits::default()).unwrap();
        assert_eq!(
            grid,
            Grid {
                rows: 2,
                columns: 2,
                width: 1024,
                height: 1024
            }
        );
        validate_grid_tile_dimensions(512, 512, &grid).unwrap();
        // Tiles that do not cover the canvas.
        assert!(validate_grid_tile_dimensions(256, 512, &grid).is_err());
        // Tiles so large that the last column would not overlap the canvas.
        assert!(validate_grid_tile_dimensions(1024, 1024, &grid).is_err());
    }

    #[test]
    fn grid_trailing_bytes_rejected() {
        let data = [0, 0, 1, 1, 0x04, 0x00, 0x04, 0x00, 0xff];
        let err = parse_grid(&data, &Limits::default()).unwrap_err();
        assert_eq!(err.sub_kind, SubErrorKind::InvalidGridData);
    }

    #[test]
    fn overlay_offsets() {
        let data = [
            0, 0, // version, flags
            0, 10, 0, 20, 0, 30, 0, 40, // fill RGBA
            0, 100, 0, 50, // canvas 100x50
            0, 5, 0xff, 0xfb, // input 0 at (5, -5)
        ];
        let overlay = parse_overlay(&data, 1, &Limits::default()).unwrap();
        assert_eq!(overlay.canvas_fill_value, [10, 20, 30, 40]);
        assert_eq!(overlay.width, 100);
        assert_eq!(overlay.height, 50);
        assert_eq!(overlay.horizontal_offsets, vec![5]);
        assert_eq!(overlay.vertical_offsets, vec![-5]);
    }
}
