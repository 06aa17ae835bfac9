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

use crate::internal_utils::pixels::*;
use crate::internal_utils::*;
use crate::parser::mp4box::ImageSpatialExtents;
use crate::utils::clap::CleanAperture;
use crate::utils::clap::CropRect;
use crate::utils::*;
use crate::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Plane {
    Y = 0,
    U = 1,
    V = 2,
    A = 3,
}

impl From<usize> for Plane {
    fn from(plane: usize) -> Self {
        match plane {
            1 => Plane::U,
            2 => Plane::V,
            3 => Plane::A,
            _ => Plane::Y,
        }
    }
}

impl Plane {
    pub(crate) fn as_usize(&self) -> usize {
        *self as usize
    }
}

pub const MAX_PLANE_COUNT: usize = 4;
pub const YUV_PLANES: [Plane; 3] = [Plane::Y, Plane::U, Plane::V];
pub const ALL_PLANES: [Plane; MAX_PLANE_COUNT] = [Plane::Y, Plane::U, Plane::V, Plane::A];

// Plane rows are padded to a multiple of this many bytes.
pub(crate) const STRIDE_ALIGNMENT: u32 = 16;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
// VideoFullRangeFlag as specified in ISO/IEC 23091-2/ITU-T H.273.
pub enum YuvRange {
    Limited = 0,
    #[default]
    Full = 1,
}

/// A decoded pixel image. Planes are owned by the image; the channel set is
/// fixed once the planes are allocated.
#[derive(Default, Debug)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub depth: u8,

    pub yuv_format: PixelFormat,
    pub yuv_range: YuvRange,
    pub chroma_sample_position: ChromaSamplePosition,

    pub alpha_present: bool,
    pub alpha_premultiplied: bool,

    pub row_bytes: [u32; MAX_PLANE_COUNT],
    pub planes: [Option<Pixels>; MAX_PLANE_COUNT],

    pub color_primaries: ColorPrimaries,
    pub transfer_characteristics: TransferCharacteristics,
    pub matrix_coefficients: MatrixCoefficients,

    pub clli: Option<ContentLightLevelInformation>,
    pub mdcv: Option<MasteringDisplayColourVolume>,
    pub pasp: Option<PixelAspectRatio>,
    pub clap: Option<CleanAperture>,
    pub irot_angle: Option<u8>,
    pub imir_axis: Option<u8>,

    pub icc: Vec<u8>,
    pub exif: Vec<u8>,
    pub xmp: Vec<u8>,
}

pub struct PlaneData {
    pub width: u32,
    pub height: u32,
    pub row_bytes: u32,
    pub pixel_size: u32,
}

impl Image {
    pub fn create(width: u32, height: u32, depth: u8, yuv_format: PixelFormat) -> Image {
        Image {
            width,
            height,
            depth,
            yuv_format,
            ..Image::default()
        }
    }

    pub(crate) fn shallow_clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            depth: self.depth,
            yuv_format: self.yuv_format,
            yuv_range: self.yuv_range,
            chroma_sample_position: self.chroma_sample_position,
            alpha_present: self.alpha_present,
            alpha_premultiplied: self.alpha_premultiplied,
            color_primaries: self.color_primaries,
            transfer_characteristics: self.transfer_characteristics,
            matrix_coefficients: self.matrix_coefficients,
            clli: self.clli,
            mdcv: self.mdcv,
            pasp: self.pasp,
            clap: self.clap,
            irot_angle: self.irot_angle,
            imir_axis: self.imir_axis,
            icc: self.icc.clone(),
            exif: self.exif.clone(),
            xmp: self.xmp.clone(),
            ..Default::default()
        }
    }

    pub(crate) fn try_clone(&self) -> HeifResult<Self> {
        let mut copy = self.shallow_clone();
        copy.row_bytes = self.row_bytes;
        for plane in ALL_PLANES {
            let plane = plane.as_usize();
            copy.planes[plane] = match &self.planes[plane] {
                Some(pixels) => Some(pixels.try_clone()?),
                None => None,
            };
        }
        Ok(copy)
    }

    pub(crate) fn is_supported_depth(depth: u8) -> bool {
        (1..=16).contains(&depth)
    }

    pub fn max_channel(&self) -> u16 {
        if Self::is_supported_depth(self.depth) {
            ((1u32 << self.depth) - 1) as u16
        } else {
            0
        }
    }

    pub fn has_plane(&self, plane: Plane) -> bool {
        let plane_index = plane.as_usize();
        match &self.planes[plane_index] {
            Some(pixels) => self.row_bytes[plane_index] != 0 && pixels.has_data(),
            None => false,
        }
    }

    pub fn has_alpha(&self) -> bool {
        self.has_plane(Plane::A) || self.yuv_format.has_alpha_channel()
    }

    pub(crate) fn has_same_properties(&self, other: &Image) -> bool {
        self.width == other.width && self.height == other.height && self.depth == other.depth
    }

    pub(crate) fn has_same_cicp(&self, other: &Image) -> bool {
        self.depth == other.depth
            && self.yuv_format == other.yuv_format
            && self.yuv_range == other.yuv_range
            && self.chroma_sample_position == other.chroma_sample_position
            && self.color_primaries == other.color_primaries
            && self.transfer_characteristics == other.transfer_characteristics
            && self.matrix_coefficients == other.matrix_coefficients
    }

    pub fn has_same_properties_and_cicp(&self, other: &Image) -> bool {
        self.has_same_properties(other) && self.has_same_cicp(other)
    }

    /// Number of samples in one row of the plane (channel count included for
    /// interleaved formats).
    pub fn width(&self, plane: Plane) -> usize {
        let interleaved_samples = self.yuv_format.channel_count();
        match plane {
            Plane::Y => self.width as usize * interleaved_samples,
            Plane::A => {
                if self.yuv_format.is_interleaved() {
                    0
                } else {
                    self.width as usize
                }
            }
            Plane::U | Plane::V => match self.yuv_format {
                PixelFormat::Yuv444 => self.width as usize,
                PixelFormat::Yuv420 | PixelFormat::Yuv422 => (self.width as usize).div_ceil(2),
                _ => 0,
            },
        }
    }

    pub fn height(&self, plane: Plane) -> usize {
        match plane {
            Plane::Y | Plane::A => self.height as usize,
            Plane::U | Plane::V => match self.yuv_format {
                PixelFormat::Yuv444 | PixelFormat::Yuv422 => self.height as usize,
                PixelFormat::Yuv420 => (self.height as usize).div_ceil(2),
                _ => 0,
            },
        }
    }

    fn bytes_per_sample(&self) -> u32 {
        if self.depth > 8 {
            2
        } else {
            1
        }
    }

    pub fn plane_data(&self, plane: Plane) -> Option<PlaneData> {
        if !self.has_plane(plane) {
            return None;
        }
        Some(PlaneData {
            width: self.width(plane) as u32,
            height: self.height(plane) as u32,
            row_bytes: self.row_bytes[plane.as_usize()],
            pixel_size: self.bytes_per_sample(),
        })
    }

    pub fn row(&self, plane: Plane, row: u32) -> HeifResult<&[u8]> {
        let plane_data = self.plane_data(plane).ok_or(HeifError::new(
            ErrorKind::InvalidInput,
            SubErrorKind::Unspecified,
            "no plane".into(),
        ))?;
        let start = checked_mul!(row, plane_data.row_bytes)?;
        self.planes[plane.as_usize()]
            .as_ref()
            .unwrap()
            .slice(start, plane_data.width)
    }

    pub fn row_mut(&mut self, plane: Plane, row: u32) -> HeifResult<&mut [u8]> {
        let plane_data = self.plane_data(plane).ok_or(HeifError::new(
            ErrorKind::InvalidInput,
            SubErrorKind::Unspecified,
            "no plane".into(),
        ))?;
        let start = checked_mul!(row, plane_data.row_bytes)?;
        self.planes[plane.as_usize()]
            .as_mut()
            .unwrap()
            .slice_mut(start, plane_data.width)
    }

    pub fn row16(&self, plane: Plane, row: u32) -> HeifResult<&[u16]> {
        let plane_data = self.plane_data(plane).ok_or(HeifError::new(
            ErrorKind::InvalidInput,
            SubErrorKind::Unspecified,
            "no plane".into(),
        ))?;
        let start = checked_mul!(row, plane_data.row_bytes / 2)?;
        self.planes[plane.as_usize()]
            .as_ref()
            .unwrap()
            .slice16(start, plane_data.width)
    }

    pub fn row16_mut(&mut self, plane: Plane, row: u32) -> HeifResult<&mut [u16]> {
        let plane_data = self.plane_data(plane).ok_or(HeifError::new(
            ErrorKind::InvalidInput,
            SubErrorKind::Unspecified,
            "no plane".into(),
        ))?;
        let start = checked_mul!(row, plane_data.row_bytes / 2)?;
        self.planes[plane.as_usize()]
            .as_mut()
            .unwrap()
            .slice16_mut(start, plane_data.width)
    }

    pub(crate) fn plane_byte_size(&self, plane: Plane) -> HeifResult<u64> {
        let row_samples = u32_from_usize(self.width(plane))?;
        let row_bytes = checked_mul!(row_samples, self.bytes_per_sample())?;
        let row_bytes = row_bytes.div_ceil(STRIDE_ALIGNMENT) * STRIDE_ALIGNMENT;
        Ok(checked_mul!(
            u64::from(row_bytes),
            u64_from_usize(self.height(plane))?
        )?)
    }

    /// Total bytes that allocate_planes will request, for memory accounting.
    pub(crate) fn allocation_size(&self, include_alpha: bool) -> HeifResult<u64> {
        let mut total = 0u64;
        for plane in self.plane_set(include_alpha) {
            checked_incr!(total, self.plane_byte_size(plane)?);
        }
        Ok(total)
    }

    fn plane_set(&self, include_alpha: bool) -> Vec<Plane> {
        let mut planes = match self.yuv_format.plane_count() {
            3 => YUV_PLANES.to_vec(),
            _ => vec![Plane::Y],
        };
        if include_alpha && !self.yuv_format.is_interleaved() {
            planes.push(Plane::A);
        }
        planes
    }

    pub fn allocate_planes(&mut self, include_alpha: bool) -> HeifResult<()> {
        if self.width == 0 || self.height == 0 || !Self::is_supported_depth(self.depth) {
            return HeifError::invalid_input(
                SubErrorKind::InvalidImageSize,
                format!("cannot allocate {}x{}/{}", self.width, self.height, self.depth),
            );
        }
        for plane in self.plane_set(include_alpha) {
            let plane_index = plane.as_usize();
            let row_samples = u32_from_usize(self.width(plane))?;
            let row_bytes = checked_mul!(row_samples, self.bytes_per_sample())?
                .div_ceil(STRIDE_ALIGNMENT)
                * STRIDE_ALIGNMENT;
            let sample_count =
                usize_from_u64(checked_mul!(
                    u64::from(row_bytes / self.bytes_per_sample()),
                    u64_from_usize(self.height(plane))?
                )?)?;
            let default_value = if plane == Plane::A { self.max_channel() } else { 0 };
            let mut pixels = Pixels::create(self.depth);
            pixels.resize(sample_count, default_value)?;
            self.planes[plane_index] = Some(pixels);
            self.row_bytes[plane_index] = row_bytes;
            if plane == Plane::A {
                self.alpha_present = true;
            }
        }
        Ok(())
    }

    pub(crate) fn copy_properties_from(&mut self, other: &Image) {
        self.depth = other.depth;
        self.yuv_format = other.yuv_format;
        self.yuv_range = other.yuv_range;
        self.chroma_sample_position = other.chroma_sample_position;
        self.color_primaries = other.color_primaries;
        self.transfer_characteristics = other.transfer_characteristics;
        self.matrix_coefficients = other.matrix_coefficients;
    }

    fn copy_plane_rows(
        &mut self,
        source: &Image,
        plane: Plane,
        dst_x: usize,
        dst_y: usize,
        src_width: usize,
        src_height: usize,
    ) -> HeifResult<()> {
        for y in 0..src_height {
            if self.depth > 8 {
                let src_row = &source.row16(plane, y as u32)?[..src_width];
                let src_row = src_row.to_vec();
                let dst_row = self.row16_mut(plane, (dst_y + y) as u32)?;
                dst_row[dst_x..dst_x + src_width].copy_from_slice(&src_row);
            } else {
                let src_row = &source.row(plane, y as u32)?[..src_width];
                let src_row = src_row.to_vec();
                let dst_row = self.row_mut(plane, (dst_y + y) as u32)?;
                dst_row[dst_x..dst_x + src_width].copy_from_slice(&src_row);
            }
        }
        Ok(())
    }

    /// Pastes a grid tile into this image. Tiles are indexed in row-major
    /// order; the right and bottom edges are trimmed to the image size.
    pub(crate) fn copy_from_tile(
        &mut self,
        tile: &Image,
        columns: u32,
        tile_index: u32,
        include_alpha: bool,
    ) -> HeifResult<()> {
        let row_index = tile_index / columns;
        let column_index = tile_index % columns;
        for plane in self.plane_set(include_alpha) {
            if !tile.has_plane(plane) {
                continue;
            }
            let chroma_div_x = if matches!(plane, Plane::U | Plane::V) {
                1 << self.yuv_format.chroma_shift_x()
            } else {
                1
            };
            let chroma_div_y = if matches!(plane, Plane::U | Plane::V) {
                1 << self.yuv_format.chroma_shift_y()
            } else {
                1
            };
            let samples_per_pixel = if plane == Plane::Y { self.yuv_format.channel_count() } else { 1 };
            let tile_pixel_width = tile.width as usize / chroma_div_x as usize;
            let tile_pixel_height = tile.height as usize / chroma_div_y as usize;
            let dst_x = column_index as usize * tile_pixel_width * samples_per_pixel;
            let dst_y = row_index as usize * tile_pixel_height;
            // Trim the tile on the right and bottom edges of the canvas.
            let plane_width = self.width(plane);
            let plane_height = self.height(plane);
            if dst_y >= plane_height || dst_x >= plane_width {
                continue;
            }
            let src_width = std::cmp::min(tile.width(plane), plane_width - dst_x);
            let src_height = std::cmp::min(tile.height(plane), plane_height - dst_y);
            self.copy_plane_rows(tile, plane, dst_x, dst_y, src_width, src_height)?;
        }
        Ok(())
    }

    /// Imports a monochrome auxiliary image as this image's alpha plane.
    pub(crate) fn import_alpha_from(&mut self, alpha: &Image) -> HeifResult<()> {
        if alpha.width != self.width || alpha.height != self.height || alpha.depth != self.depth {
            return HeifError::invalid_input(
                SubErrorKind::InvalidImageSize,
                "alpha auxiliary image does not match the color image",
            );
        }
        if self.yuv_format.is_interleaved() {
            return HeifError::unsupported_feature(
                SubErrorKind::UnsupportedColorConversion,
                "alpha plane import into an interleaved image",
            );
        }
        let row_samples = u32_from_usize(self.width(Plane::A))?;
        let row_bytes =
            checked_mul!(row_samples, self.bytes_per_sample())?.div_ceil(STRIDE_ALIGNMENT)
                * STRIDE_ALIGNMENT;
        let sample_count = usize_from_u64(checked_mul!(
            u64::from(row_bytes / self.bytes_per_sample()),
            u64::from(self.height)
        )?)?;
        let mut pixels = Pixels::create(self.depth);
        pixels.resize(sample_count, self.max_channel())?;
        self.planes[Plane::A.as_usize()] = Some(pixels);
        self.row_bytes[Plane::A.as_usize()] = row_bytes;
        self.alpha_present = true;
        // The auxiliary image carries the alpha samples in its luma plane.
        for y in 0..alpha.height {
            if self.depth > 8 {
                let source = alpha.row16(Plane::Y, y)?[..alpha.width as usize].to_vec();
                self.row16_mut(Plane::A, y)?.copy_from_slice(&source);
            } else {
                let source = alpha.row(Plane::Y, y)?[..alpha.width as usize].to_vec();
                self.row_mut(Plane::A, y)?.copy_from_slice(&source);
            }
        }
        Ok(())
    }

    fn assert_transformable(&self) -> HeifResult<()> {
        // Subsampled chroma cannot be transformed sample-wise without
        // resampling.
        match self.yuv_format {
            PixelFormat::Yuv420 | PixelFormat::Yuv422 => HeifError::unsupported_feature(
                SubErrorKind::UnsupportedColorConversion,
                "transform of a chroma subsampled image",
            ),
            PixelFormat::None => {
                HeifError::invalid_input(SubErrorKind::InvalidImageSize, "empty image")
            }
            _ => Ok(()),
        }
    }

    fn sample_at(&self, plane: Plane, x: usize, y: usize) -> HeifResult<u16> {
        if self.depth > 8 {
            Ok(self.row16(plane, y as u32)?[x])
        } else {
            Ok(self.row(plane, y as u32)?[x] as u16)
        }
    }

    fn set_sample_at(&mut self, plane: Plane, x: usize, y: usize, value: u16) -> HeifResult<()> {
        if self.depth > 8 {
            self.row16_mut(plane, y as u32)?[x] = value;
        } else {
            self.row_mut(plane, y as u32)?[x] = value as u8;
        }
        Ok(())
    }

    fn transformed_into<F>(&self, width: u32, height: u32, map: F) -> HeifResult<Image>
    where
        F: Fn(u32, u32) -> (u32, u32),
    {
        self.assert_transformable()?;
        let mut out = self.shallow_clone();
        out.width = width;
        out.height = height;
        out.allocate_planes(self.has_plane(Plane::A))?;
        let channels = self.yuv_format.channel_count();
        for plane in self.plane_set(self.has_plane(Plane::A)) {
            if !self.has_plane(plane) {
                continue;
            }
            for y in 0..height as usize {
                for x in 0..width as usize {
                    let (src_x, src_y) = map(x as u32, y as u32);
                    for channel in 0..channels {
                        let value = self.sample_at(
                            plane,
                            src_x as usize * channels + channel,
                            src_y as usize,
                        )?;
                        out.set_sample_at(plane, x * channels + channel, y, value)?;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Rotates the image counter-clockwise by angle_count * 90 degrees.
    pub fn rotate_ccw(&self, angle_count: u8) -> HeifResult<Image> {
        let width = self.width;
        let height = self.height;
        match angle_count % 4 {
            0 => self.try_clone(),
            // (x, y) of the output maps to the source pixel given below.
            1 => self.transformed_into(height, width, |x, y| (width - 1 - y, x)),
            2 => self.transformed_into(width, height, |x, y| (width - 1 - x, height - 1 - y)),
            _ => self.transformed_into(height, width, |x, y| (y, height - 1 - x)),
        }
    }

    /// Mirrors the image. Axis 0 reflects about a vertical axis (left-right
    /// swap), axis 1 about a horizontal axis (top-bottom swap), matching the
    /// 'imir' axis semantics of ISO/IEC 23008-12 Section 6.5.12.
    pub fn mirror(&self, axis: u8) -> HeifResult<Image> {
        let width = self.width;
        let height = self.height;
        match axis {
            0 => self.transformed_into(width, height, |x, y| (width - 1 - x, y)),
            _ => self.transformed_into(width, height, |x, y| (x, height - 1 - y)),
        }
    }

    /// Crops to the given clean aperture.
    pub fn crop(&self, clap: &CleanAperture) -> HeifResult<Image> {
        let rect = CropRect::create_from(clap, self.width, self.height, self.yuv_format)?;
        self.assert_transformable()?;
        self.transformed_into(rect.width, rect.height, |x, y| (rect.x + x, rect.y + y))
    }

    /// Nearest-neighbour scaling. Identity when the output size matches the
    /// input size.
    pub fn scale_nearest(&self, width: u32, height: u32) -> HeifResult<Image> {
        if width == 0 || height == 0 {
            return HeifError::invalid_input(SubErrorKind::InvalidImageSize, "scale to zero");
        }
        if width == self.width && height == self.height {
            return self.try_clone();
        }
        let src_width = self.width as u64;
        let src_height = self.height as u64;
        let out_width = width as u64;
        let out_height = height as u64;
        self.transformed_into(width, height, move |x, y| {
            (
                ((x as u64 * src_width) / out_width) as u32,
                ((y as u64 * src_height) / out_height) as u32,
            )
        })
    }

    /// Alpha-blends `other` onto this image with its top-left corner at
    /// (x, y). Inputs partially outside the canvas are clipped.
    pub(crate) fn overlay(&mut self, other: &Image, x: i64, y: i64) -> HeifResult<()> {
        if self.yuv_format.color_space() != other.yuv_format.color_space()
            || self.depth != other.depth
        {
            return HeifError::unsupported_feature(
                SubErrorKind::UnsupportedColorConversion,
                "overlay input does not match the canvas format",
            );
        }
        self.assert_transformable()?;
        let canvas_width = self.width as i64;
        let canvas_height = self.height as i64;
        let src_x0 = std::cmp::max(0, -x) as usize;
        let src_y0 = std::cmp::max(0, -y) as usize;
        let dst_x0 = std::cmp::max(0, x);
        let dst_y0 = std::cmp::max(0, y);
        let copy_width = std::cmp::min(other.width as i64 - src_x0 as i64, canvas_width - dst_x0);
        let copy_height =
            std::cmp::min(other.height as i64 - src_y0 as i64, canvas_height - dst_y0);
        if copy_width <= 0 || copy_height <= 0 {
            return Ok(()); // Fully outside the canvas; the caller warns.
        }
        let channels = self.yuv_format.channel_count();
        let src_has_alpha = other.yuv_format.has_alpha_channel();
        let max_channel = self.max_channel() as u32;
        for row in 0..copy_height as usize {
            for column in 0..copy_width as usize {
                let src_x = (src_x0 + column) * other.yuv_format.channel_count();
                let dst_x = (dst_x0 as usize + column) * channels;
                let src_y = src_y0 + row;
                let dst_y = dst_y0 as usize + row;
                let alpha = if src_has_alpha {
                    other.sample_at(
                        Plane::Y,
                        src_x + other.yuv_format.channel_count() - 1,
                        src_y,
                    )? as u32
                } else {
                    max_channel
                };
                for channel in 0..std::cmp::min(channels, 3) {
                    let src = other.sample_at(Plane::Y, src_x + channel, src_y)? as u32;
                    let value = if alpha == max_channel {
                        src
                    } else {
                        let dst = self.sample_at(Plane::Y, dst_x + channel, dst_y)? as u32;
                        (src * alpha + dst * (max_channel - alpha)) / max_channel
                    };
                    self.set_sample_at(Plane::Y, dst_x + channel, dst_y, value as u16)?;
                }
                if channels == 4 {
                    // The canvas becomes opaque wherever an input lands.
                    let dst_alpha = self.sample_at(Plane::Y, dst_x + 3, dst_y)? as u32;
                    let out_alpha = alpha + dst_alpha * (max_channel - alpha) / max_channel;
                    self.set_sample_at(
                        Plane::Y,
                        dst_x + 3,
                        dst_y,
                        std::cmp::min(out_alpha, max_channel) as u16,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Fills every pixel with the given 16-bit RGBA value, scaled down to
    /// the image depth.
    pub(crate) fn fill(&mut self, rgba: [u16; 4]) -> HeifResult<()> {
        self.assert_transformable()?;
        let channels = self.yuv_format.channel_count();
        let shift = 16 - self.depth as u32;
        for y in 0..self.height as usize {
            for x in 0..self.width as usize {
                for channel in 0..channels {
                    let value = (rgba[std::cmp::min(channel, 3)] as u32) >> shift;
                    self.set_sample_at(Plane::Y, x * channels + channel, y, value as u16)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn spatial_extents(&self) -> ImageSpatialExtents {
        ImageSpatialExtents {
            width: self.width,
            height: self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image() -> Image {
        let mut image = Image::create(4, 3, 8, PixelFormat::InterleavedRgb);
        image.allocate_planes(false).unwrap();
        for y in 0..3u32 {
            let row = image.row_mut(Plane::Y, y).unwrap();
            for x in 0..12 {
                row[x] = (y as usize * 12 + x) as u8;
            }
        }
        image
    }

    #[test]
    fn rotate_four_times_is_identity() {
        let image = test_image();
        let mut rotated = image.try_clone().unwrap();
        for _ in 0..4 {
            rotated = rotated.rotate_ccw(1).unwrap();
        }
        for y in 0..3 {
            assert_eq!(
                image.row(Plane::Y, y).unwrap(),
                rotated.row(Plane::Y, y).unwrap()
            );
        }
    }

    #[test]
    fn mirror_twice_is_identity() {
        let image = test_image();
        for axis in [0, 1] {
            let mirrored = image.mirror(axis).unwrap().mirror(axis).unwrap();
            for y in 0..3 {
                assert_eq!(
                    image.row(Plane::Y, y).unwrap(),
                    mirrored.row(Plane::Y, y).unwrap()
                );
            }
        }
    }

    #[test]
    fn scale_nearest_identity() {
        let image = test_image();
        let scaled = image.scale_nearest(4, 3).unwrap();
        for y in 0..3 {
            assert_eq!(
                image.row(Plane::Y, y).unwrap(),
                scaled.row(Plane::Y, y).unwrap()
            );
        }
    }

    #[test]
    fn rotate_90_moves_corner() {
        let image = test_image();
        let rotated = image.rotate_ccw(1).unwrap();
        assert_eq!(rotated.width, 3);
        assert_eq!(rotated.height, 4);
        // The top-right pixel of the source becomes the top-left pixel.
        let source_top_right = &image.row(Plane::Y, 0).unwrap()[9..12];
        assert_eq!(&rotated.row(Plane::Y, 0).unwrap()[0..3], source_top_right);
    }
}
