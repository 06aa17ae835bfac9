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

// Region items, ISO/IEC 23008-12:2022 section 6.10. A region item ('rgan')
// carries geometries on a reference coordinate space and is attached to an
// image item with a 'cdsc' reference.

#[derive(Clone, Debug, PartialEq)]
pub enum RegionGeometry {
    Point {
        x: i32,
        y: i32,
    },
    Rectangle {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Ellipse {
        x: i32,
        y: i32,
        radius_x: u32,
        radius_y: u32,
    },
    Polygon {
        points: Vec<(i32, i32)>,
    },
    Polyline {
        points: Vec<(i32, i32)>,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionItem {
    pub item_id: u32,
    pub reference_width: u32,
    pub reference_height: u32,
    pub regions: Vec<RegionGeometry>,
}

fn read_unsigned(stream: &mut IStream, field_size: u8) -> HeifResult<u32> {
    if field_size == 32 {
        stream.read_u32()
    } else {
        Ok(stream.read_u16()? as u32)
    }
}

fn read_signed(stream: &mut IStream, field_size: u8) -> HeifResult<i32> {
    if field_size == 32 {
        stream.read_i32()
    } else {
        Ok(stream.read_i16()? as i32)
    }
}

fn read_point(stream: &mut IStream, field_size: u8) -> HeifResult<(i32, i32)> {
    Ok((
        read_signed(stream, field_size)?,
        read_signed(stream, field_size)?,
    ))
}

/// Parses the payload of a region item.
pub(crate) fn parse(item_id: u32, data: &[u8]) -> HeifResult<RegionItem> {
    let mut stream = IStream::create(data);
    // unsigned int(8) version = 0;
    let version = stream.read_u8()?;
    if version != 0 {
        return HeifError::invalid_input(
            SubErrorKind::UnsupportedDataVersion,
            format!("region item version {version}"),
        );
    }
    // unsigned int(8) flags;
    let flags = stream.read_u8()?;
    let field_size: u8 = if (flags & 1) == 1 { 32 } else { 16 };
    let mut region_item = RegionItem {
        item_id,
        // unsigned int(field_size) reference_width;
        reference_width: read_unsigned(&mut stream, field_size)?,
        // unsigned int(field_size) reference_height;
        reference_height: read_unsigned(&mut stream, field_size)?,
        ..RegionItem::default()
    };
    // unsigned int(8) region_count;
    let region_count = stream.read_u8()?;
    for _ in 0..region_count {
        // unsigned int(8) geometry_type;
        let geometry_type = stream.read_u8()?;
        let geometry = match geometry_type {
            0 => {
                let (x, y) = read_point(&mut stream, field_size)?;
                RegionGeometry::Point { x, y }
            }
            1 => {
                let (x, y) = read_point(&mut stream, field_size)?;
                RegionGeometry::Rectangle {
                    x,
                    y,
                    // unsigned int(field_size) width, height;
                    width: read_unsigned(&mut stream, field_size)?,
                    height: read_unsigned(&mut stream, field_size)?,
                }
            }
            2 => {
                let (x, y) = read_point(&mut stream, field_size)?;
                RegionGeometry::Ellipse {
                    x,
                    y,
                    // unsigned int(field_size) radius_x, radius_y;
                    radius_x: read_unsigned(&mut stream, field_size)?,
                    radius_y: read_unsigned(&mut stream, field_size)?,
                }
            }
            3 | 6 => {
                // unsigned int(field_size) point_count;
                let point_count = read_unsigned(&mut stream, field_size)?;
                let mut points: Vec<(i32, i32)> =
                    create_vec_exact(usize_from_u32(point_count)?)?;
                for _ in 0..point_count {
                    points.push(read_point(&mut stream, field_size)?);
                }
                if geometry_type == 3 {
                    RegionGeometry::Polygon { points }
                } else {
                    RegionGeometry::Polyline { points }
                }
            }
            _ => {
                // Mask geometries and future types cannot be skipped without
                // knowing their size.
                return HeifError::unsupported_feature(
                    SubErrorKind::InvalidRegionData,
                    format!("region geometry type {geometry_type}"),
                );
            }
        };
        region_item.regions.push(geometry);
    }
    Ok(region_item)
}

/// Serialises a region item payload. The field width is chosen from the
/// values actually present.
pub(crate) fn write(region_item: &RegionItem) -> HeifResult<Vec<u8>> {
    let mut needs_wide = region_item.reference_width > u16::MAX as u32
        || region_item.reference_height > u16::MAX as u32;
    let unsigned_fits = |v: u32| v <= u16::MAX as u32;
    let signed_fits = |v: i32| v >= i16::MIN as i32 && v <= i16::MAX as i32;
    for region in &region_item.regions {
        needs_wide |= match region {
            RegionGeometry::Point { x, y } => !signed_fits(*x) || !signed_fits(*y),
            RegionGeometry::Rectangle {
                x,
                y,
                width,
                height,
            } => {
                !signed_fits(*x)
                    || !signed_fits(*y)
                    || !unsigned_fits(*width)
                    || !unsigned_fits(*height)
            }
            RegionGeometry::Ellipse {
                x,
                y,
                radius_x,
                radius_y,
            } => {
                !signed_fits(*x)
                    || !signed_fits(*y)
                    || !unsigned_fits(*radius_x)
                    || !unsigned_fits(*radius_y)
            }
            RegionGeometry::Polygon { points } | RegionGeometry::Polyline { points } => points
                .iter()
                .any(|(x, y)| !signed_fits(*x) || !signed_fits(*y)),
        };
    }
    let mut stream = OStream::default();
    let write_unsigned = |stream: &mut OStream, value: u32| {
        if needs_wide {
            stream.write_u32(value)
        } else {
            stream.write_u16(value as u16)
        }
    };
    let write_signed = |stream: &mut OStream, value: i32| {
        if needs_wide {
            stream.write_i32(value)
        } else {
            stream.write_i16(value as i16)
        }
    };
    // unsigned int(8) version = 0;
    stream.write_u8(0)?;
    // unsigned int(8) flags;
    stream.write_u8(if needs_wide { 1 } else { 0 })?;
    write_unsigned(&mut stream, region_item.reference_width)?;
    write_unsigned(&mut stream, region_item.reference_height)?;
    // unsigned int(8) region_count;
    stream.write_u8(u8_from_usize(region_item.regions.len())?)?;
    for region in &region_item.regions {
        match region {
            RegionGeometry::Point { x, y } => {
                stream.write_u8(0)?;
                write_signed(&mut stream, *x)?;
                write_signed(&mut stream, *y)?;
            }
            RegionGeometry::Rectangle {
                x,
                y,
                width,
                height,
            } => {
                stream.write_u8(1)?;
                write_signed(&mut stream, *x)?;
                write_signed(&mut stream, *y)?;
                write_unsigned(&mut stream, *width)?;
                write_unsigned(&mut stream, *height)?;
            }
            RegionGeometry::Ellipse {
                x,
                y,
                radius_x,
                radius_y,
            } => {
                stream.write_u8(2)?;
                write_signed(&mut stream, *x)?;
                write_signed(&mut stream, *y)?;
                write_unsigned(&mut stream, *radius_x)?;
                write_unsigned(&mut stream, *radius_y)?;
            }
            RegionGeometry::Polygon { points } | RegionGeometry::Polyline { points } => {
                stream.write_u8(if matches!(region, RegionGeometry::Polygon { .. }) {
                    3
                } else {
                    6
                })?;
                write_unsigned(&mut stream, u32_from_usize(points.len())?)?;
                for (x, y) in points {
                    write_signed(&mut stream, *x)?;
                    write_signed(&mut stream, *y)?;
                }
            }
        }
    }
    Ok(stream.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_narrow_fields() {
        let item = RegionItem {
            item_id: 42,
            reference_width: 1280,
            reference_height: 1024,
            regions: vec![
                RegionGeometry::Point { x: 100, y: 200 },
                RegionGeometry::Rectangle {
                    x: 150,
                    y: 250,
                    width: 30,
                    height: 50,
                },
            ],
        };
        let payload = write(&item).unwrap();
        // Narrow field size: version + flags + 2*2 reference + count +
        // (1 + 2*2) point + (1 + 4*2) rectangle.
        assert_eq!(payload.len(), 2 + 4 + 1 + 5 + 9);
        assert_eq!(parse(42, &payload).unwrap(), item);
    }

    #[test]
    fn wide_fields_when_needed() {
        let item = RegionItem {
            item_id: 1,
            reference_width: 100_000,
            reference_height: 80_000,
            regions: vec![RegionGeometry::Polygon {
                points: vec![(0, 0), (70_000, 0), (0, 70_000)],
            }],
        };
        let payload = write(&item).unwrap();
        assert_eq!(payload[1], 1); // flags bit 0: 32-bit fields.
        assert_eq!(parse(1, &payload).unwrap(), item);
    }

    #[test]
    fn unknown_geometry_is_rejected() {
        // version 0, flags 0, 16-bit reference 10x10, one region of type 4
        // (referenced mask).
        let payload = [0, 0, 0, 10, 0, 10, 1, 4];
        let err = parse(1, &payload).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedFeature);
    }
}
