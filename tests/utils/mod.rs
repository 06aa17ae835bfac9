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

#![allow(dead_code)]

use crabby_heif::decoder::Decoder;
use crabby_heif::image::*;
use crabby_heif::*;

/// Writes an ISOBMFF box around a payload.
pub fn bmff_box(box_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(box_type.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Writes a FullBox around a payload.
pub fn full_box(box_type: &str, version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut inner = vec![version];
    inner.extend_from_slice(&flags.to_be_bytes()[1..]);
    inner.extend_from_slice(payload);
    bmff_box(box_type, &inner)
}

pub fn ftyp(major: &str, minor: &str, compatible: &[&str]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(major.as_bytes());
    payload.extend_from_slice(minor.as_bytes());
    for brand in compatible {
        payload.extend_from_slice(brand.as_bytes());
    }
    bmff_box("ftyp", &payload)
}

pub fn hdlr(handler_type: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(handler_type.as_bytes());
    payload.extend_from_slice(&[0; 12]);
    payload.push(0); // empty name
    full_box("hdlr", 0, 0, &payload)
}

pub fn pitm(item_id: u16) -> Vec<u8> {
    full_box("pitm", 0, 0, &item_id.to_be_bytes())
}

pub fn infe(item_id: u16, item_type: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&item_id.to_be_bytes());
    payload.extend_from_slice(&0u16.to_be_bytes()); // item_protection_index
    payload.extend_from_slice(item_type.as_bytes());
    payload.push(0); // empty item_name
    full_box("infe", 2, 0, &payload)
}

pub fn iinf(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    for entry in entries {
        payload.extend_from_slice(entry);
    }
    full_box("iinf", 0, 0, &payload)
}

/// One iloc version 1 entry: (item_id, construction_method, extents) with
/// extents as (index, offset, length), all fields 4 bytes wide.
pub struct IlocEntry {
    pub item_id: u16,
    pub construction_method: u8,
    pub extents: Vec<(u32, u32, u32)>,
}

pub fn iloc(entries: &[IlocEntry]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.push(0x44); // offset_size 4, length_size 4
    payload.push(0x04); // base_offset_size 0, index_size 4
    payload.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    for entry in entries {
        payload.extend_from_slice(&entry.item_id.to_be_bytes());
        payload.extend_from_slice(&(entry.construction_method as u16).to_be_bytes());
        payload.extend_from_slice(&0u16.to_be_bytes()); // data_reference_index
        payload.extend_from_slice(&(entry.extents.len() as u16).to_be_bytes());
        for (index, offset, length) in &entry.extents {
            payload.extend_from_slice(&index.to_be_bytes());
            payload.extend_from_slice(&offset.to_be_bytes());
            payload.extend_from_slice(&length.to_be_bytes());
        }
    }
    full_box("iloc", 1, 0, &payload)
}

/// An iloc whose length fields are 8 bytes wide, to express extents larger
/// than 4 GiB.
pub fn iloc_wide_length(item_id: u16, offset: u32, length: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.push(0x48); // offset_size 4, length_size 8
    payload.push(0x00); // base_offset_size 0, index_size 0
    payload.extend_from_slice(&1u16.to_be_bytes()); // item_count
    payload.extend_from_slice(&item_id.to_be_bytes());
    payload.extend_from_slice(&0u16.to_be_bytes()); // reserved + construction_method 0
    payload.extend_from_slice(&0u16.to_be_bytes()); // data_reference_index
    payload.extend_from_slice(&1u16.to_be_bytes()); // extent_count
    payload.extend_from_slice(&offset.to_be_bytes());
    payload.extend_from_slice(&length.to_be_bytes());
    full_box("iloc", 1, 0, &payload)
}

pub fn iref(edges: &[(&str, u16, &[u16])]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (reference_type, from, tos) in edges {
        let mut inner = Vec::new();
        inner.extend_from_slice(&from.to_be_bytes());
        inner.extend_from_slice(&(tos.len() as u16).to_be_bytes());
        for to in *tos {
            inner.extend_from_slice(&to.to_be_bytes());
        }
        payload.extend_from_slice(&bmff_box(reference_type, &inner));
    }
    full_box("iref", 0, 0, &payload)
}

/// An iprp with an empty ipco and one empty ipma entry per item.
pub fn iprp_empty(item_ids: &[u16]) -> Vec<u8> {
    let ipco = bmff_box("ipco", &[]);
    let mut ipma_payload = Vec::new();
    ipma_payload.extend_from_slice(&(item_ids.len() as u32).to_be_bytes());
    for item_id in item_ids {
        ipma_payload.extend_from_slice(&item_id.to_be_bytes());
        ipma_payload.push(0); // association_count
    }
    let ipma = full_box("ipma", 0, 0, &ipma_payload);
    let mut payload = ipco;
    payload.extend_from_slice(&ipma);
    bmff_box("iprp", &payload)
}

pub fn meta(children: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for child in children {
        payload.extend_from_slice(child);
    }
    full_box("meta", 0, 0, &payload)
}

pub fn parse_bytes(data: Vec<u8>) -> HeifResult<Decoder> {
    crabby_heif::init();
    let mut decoder = Decoder::default();
    decoder.set_io_vec(data);
    decoder.parse()?;
    Ok(decoder)
}

/// MSB-first bit packer for hand-built bit-packed payloads.
#[derive(Default)]
pub struct BitWriter {
    pub data: Vec<u8>,
    bits_in_last_byte: u8,
}

impl BitWriter {
    pub fn push_bits(&mut self, value: u32, count: u8) {
        for bit_index in (0..count).rev() {
            if self.bits_in_last_byte == 0 {
                self.data.push(0);
            }
            let bit = ((value >> bit_index) & 1) as u8;
            let last = self.data.last_mut().unwrap();
            *last |= bit << (7 - self.bits_in_last_byte);
            self.bits_in_last_byte = (self.bits_in_last_byte + 1) % 8;
        }
    }

    pub fn pad(&mut self) {
        self.bits_in_last_byte = 0;
    }
}

/// Deterministic interleaved RGB test image.
pub fn rgb_image(width: u32, height: u32) -> Image {
    let mut image = Image::create(width, height, 8, PixelFormat::InterleavedRgb);
    image.allocate_planes(false).unwrap();
    for y in 0..height {
        let samples = image.width(Plane::Y);
        let row = image.row_mut(Plane::Y, y).unwrap();
        for x in 0..samples {
            row[x] = ((x as u32 + y * 7) % 251) as u8;
        }
    }
    image
}

/// Interleaved RGB image filled with a single value.
pub fn solid_rgb_image(width: u32, height: u32, value: u8) -> Image {
    let mut image = Image::create(width, height, 8, PixelFormat::InterleavedRgb);
    image.allocate_planes(false).unwrap();
    for y in 0..height {
        let samples = image.width(Plane::Y);
        let row = image.row_mut(Plane::Y, y).unwrap();
        row[..samples].fill(value);
    }
    image
}

pub fn monochrome_image(width: u32, height: u32, value: u8) -> Image {
    let mut image = Image::create(width, height, 8, PixelFormat::Monochrome);
    image.allocate_planes(false).unwrap();
    for y in 0..height {
        let row = image.row_mut(Plane::Y, y).unwrap();
        row[..width as usize].fill(value);
    }
    image
}

pub fn yuv444_image(width: u32, height: u32) -> Image {
    let mut image = Image::create(width, height, 8, PixelFormat::Yuv444);
    image.allocate_planes(false).unwrap();
    for plane in [Plane::Y, Plane::U, Plane::V] {
        for y in 0..height {
            let row = image.row_mut(plane, y).unwrap();
            for x in 0..width as usize {
                row[x] = ((x as u32 + y * 3) % 199) as u8 + plane as u8;
            }
        }
    }
    image
}

pub fn images_equal(a: &Image, b: &Image) -> bool {
    if a.width != b.width || a.height != b.height || a.yuv_format != b.yuv_format {
        return false;
    }
    let planes: Vec<Plane> = match a.yuv_format.plane_count() {
        3 => vec![Plane::Y, Plane::U, Plane::V],
        _ => vec![Plane::Y],
    };
    for plane in planes {
        for y in 0..a.height(plane) {
            if a.row(plane, y as u32).unwrap() != b.row(plane, y as u32).unwrap() {
                return false;
            }
        }
    }
    true
}
