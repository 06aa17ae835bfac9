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

mod utils;

use crabby_heif::decoder::*;
use crabby_heif::*;
use utils::*;

fn exif_file_with_payload(payload: &[u8]) -> Vec<u8> {
    // A minimal valid file whose only item is an Exif block stored in mdat.
    let meta_children = |offset: u32| {
        vec![
            hdlr("pict"),
            pitm(1),
            iloc(&[IlocEntry {
                item_id: 1,
                construction_method: 0,
                extents: vec![(0, offset, payload.len() as u32)],
            }]),
            iinf(&[infe(1, "Exif")]),
            iprp_empty(&[1]),
        ]
    };
    let ftyp_box = ftyp("mif1", "\0\0\0\0", &["mif1", "miaf"]);
    let probe = meta(&meta_children(0));
    let payload_offset = (ftyp_box.len() + probe.len() + 8) as u32;
    let mut file = ftyp_box;
    file.extend_from_slice(&meta(&meta_children(payload_offset)));
    file.extend_from_slice(&bmff_box("mdat", payload));
    file
}

#[test]
fn minimal_file_parses() {
    let mut decoder = parse_bytes(exif_file_with_payload(b"HELLOWORLD")).unwrap();
    assert_eq!(decoder.primary_item_id().unwrap(), 1);
    assert_eq!(decoder.item_data(1).unwrap(), b"HELLOWORLD");
}

#[test]
fn missing_compatible_brand_is_rejected() {
    let mut file = ftyp("isom", "\0\0\0\0", &["isom", "mp41"]);
    file.extend_from_slice(&meta(&[hdlr("pict")]));
    let err = parse_bytes(file).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedFiletype);
}

#[test]
fn meta_box_requirements() {
    let cases: Vec<(Vec<Vec<u8>>, SubErrorKind)> = vec![
        // hdlr must come first.
        (vec![pitm(1)], SubErrorKind::NoHdlrBox),
        // The handler must be pict.
        (vec![hdlr("vide")], SubErrorKind::NoPictHandler),
        (
            vec![
                hdlr("pict"),
                iloc(&[]),
                iinf(&[infe(1, "Exif")]),
                iprp_empty(&[1]),
            ],
            SubErrorKind::NoPitmBox,
        ),
        (
            vec![
                hdlr("pict"),
                pitm(1),
                iinf(&[infe(1, "Exif")]),
                iprp_empty(&[1]),
            ],
            SubErrorKind::NoIlocBox,
        ),
        (
            vec![hdlr("pict"), pitm(1), iloc(&[]), iprp_empty(&[1])],
            SubErrorKind::NoIinfBox,
        ),
        (
            vec![hdlr("pict"), pitm(1), iloc(&[]), iinf(&[infe(1, "Exif")])],
            SubErrorKind::NoIprpBox,
        ),
    ];
    for (children, expected) in cases {
        let mut file = ftyp("mif1", "\0\0\0\0", &["mif1"]);
        file.extend_from_slice(&meta(&children));
        let err = parse_bytes(file).unwrap_err();
        assert_eq!(err.sub_kind, expected);
    }
}

#[test]
fn duplicate_meta_child_is_rejected() {
    let mut file = ftyp("mif1", "\0\0\0\0", &["mif1"]);
    file.extend_from_slice(&meta(&[
        hdlr("pict"),
        pitm(1),
        pitm(1),
        iloc(&[]),
        iinf(&[infe(1, "Exif")]),
        iprp_empty(&[1]),
    ]));
    let err = parse_bytes(file).unwrap_err();
    assert_eq!(err.sub_kind, SubErrorKind::DuplicateBox);
}

#[test]
fn ipma_with_dangling_property_index_is_rejected() {
    // ipco is empty but the ipma references property 1.
    let ipco = bmff_box("ipco", &[]);
    let mut ipma_payload = Vec::new();
    ipma_payload.extend_from_slice(&1u32.to_be_bytes()); // entry_count
    ipma_payload.extend_from_slice(&1u16.to_be_bytes()); // item_id
    ipma_payload.push(1); // association_count
    ipma_payload.push(0x01); // non essential, property index 1
    let ipma = full_box("ipma", 0, 0, &ipma_payload);
    let mut iprp_payload = ipco;
    iprp_payload.extend_from_slice(&ipma);
    let iprp = bmff_box("iprp", &iprp_payload);

    let mut file = ftyp("mif1", "\0\0\0\0", &["mif1"]);
    file.extend_from_slice(&meta(&[
        hdlr("pict"),
        pitm(1),
        iloc(&[]),
        iinf(&[infe(1, "Exif")]),
        iprp,
    ]));
    let err = parse_bytes(file).unwrap_err();
    assert_eq!(
        err.sub_kind,
        SubErrorKind::IpmaBoxReferencesNonexistingProperty
    );
}

#[test]
fn nesting_deeper_than_the_limit_is_rejected() {
    crabby_heif::init();
    let mut decoder = Decoder::default();
    decoder.settings.limits.max_nesting_level = 2;
    decoder.set_io_vec(exif_file_with_payload(b"x"));
    let err = decoder.parse().unwrap_err();
    assert_eq!(err.sub_kind, SubErrorKind::SecurityLimitExceeded);
}

#[test]
fn item_count_limit_is_enforced() {
    crabby_heif::init();
    let mut decoder = Decoder::default();
    decoder.settings.limits.max_item_count = 0;
    decoder.set_io_vec(exif_file_with_payload(b"x"));
    let err = decoder.parse().unwrap_err();
    assert_eq!(err.sub_kind, SubErrorKind::SecurityLimitExceeded);
}

#[test]
fn giant_extent_fails_before_allocation() {
    // An iloc extent declaring a length of 2^63 - 1 bytes must be refused
    // by the memory ceiling, not attempted.
    let mut meta_box = meta(&[
        hdlr("pict"),
        pitm(1),
        iloc_wide_length(1, 0, i64::MAX as u64),
        iinf(&[infe(1, "Exif")]),
        iprp_empty(&[1]),
    ]);
    let mut file = ftyp("mif1", "\0\0\0\0", &["mif1"]);
    file.append(&mut meta_box);
    file.extend_from_slice(&bmff_box("mdat", b"tiny"));
    let mut decoder = parse_bytes(file).unwrap();
    let err = decoder.item_data(1).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MemoryAllocationError);
    assert_eq!(err.sub_kind, SubErrorKind::SecurityLimitExceeded);
}

#[test]
fn construction_method_2_concatenates_and_slices() {
    let payload = b"HELLOWORLD";
    let meta_children = |offset: u32| {
        vec![
            hdlr("pict"),
            pitm(1),
            iloc(&[
                IlocEntry {
                    item_id: 1,
                    construction_method: 0,
                    extents: vec![(0, offset, payload.len() as u32)],
                },
                IlocEntry {
                    item_id: 2,
                    construction_method: 2,
                    extents: vec![(1, 2, 5)],
                },
            ]),
            iinf(&[infe(1, "Exif"), infe(2, "Exif")]),
            iref(&[("iloc", 2, &[1])]),
            iprp_empty(&[1]),
        ]
    };
    let ftyp_box = ftyp("mif1", "\0\0\0\0", &["mif1"]);
    let probe = meta(&meta_children(0));
    let payload_offset = (ftyp_box.len() + probe.len() + 8) as u32;
    let mut file = ftyp_box;
    file.extend_from_slice(&meta(&meta_children(payload_offset)));
    file.extend_from_slice(&bmff_box("mdat", payload));
    let mut decoder = parse_bytes(file).unwrap();
    assert_eq!(decoder.item_data(2).unwrap(), b"LLOWO");
    // The resolved length equals the sum of the extent lengths.
    assert_eq!(decoder.item(2).unwrap().size, 5);
}

#[test]
fn construction_method_2_cycle_is_rejected() {
    let mut file = ftyp("mif1", "\0\0\0\0", &["mif1"]);
    file.extend_from_slice(&meta(&[
        hdlr("pict"),
        pitm(1),
        iloc(&[IlocEntry {
            item_id: 1,
            construction_method: 2,
            extents: vec![(1, 0, 1)],
        }]),
        iinf(&[infe(1, "Exif")]),
        iref(&[("iloc", 1, &[1])]),
        iprp_empty(&[1]),
    ]));
    let mut decoder = parse_bytes(file).unwrap();
    let err = decoder.item_data(1).unwrap_err();
    assert_eq!(err.sub_kind, SubErrorKind::ItemReferenceCycle);
}

#[test]
fn dangling_iref_edge_is_preserved() {
    let mut file = ftyp("mif1", "\0\0\0\0", &["mif1"]);
    let payload = b"x";
    let meta_children = |offset: u32| {
        vec![
            hdlr("pict"),
            pitm(1),
            iloc(&[IlocEntry {
                item_id: 1,
                construction_method: 0,
                extents: vec![(0, offset, payload.len() as u32)],
            }]),
            iinf(&[infe(1, "Exif")]),
            iref(&[("thmb", 1, &[99])]),
            iprp_empty(&[1]),
        ]
    };
    let probe = meta(&meta_children(0));
    let payload_offset = (file.len() + probe.len() + 8) as u32;
    file.extend_from_slice(&meta(&meta_children(payload_offset)));
    file.extend_from_slice(&bmff_box("mdat", payload));
    let mut decoder = parse_bytes(file).unwrap();
    assert!(decoder.dump().unwrap().contains("thmb: from: 1 to: 99"));
    // The edge survives a serialise/reparse round trip.
    let rewritten = decoder.serialize().unwrap();
    let reparsed = parse_bytes(rewritten).unwrap();
    assert!(reparsed.dump().unwrap().contains("thmb: from: 1 to: 99"));
}

#[test]
fn unknown_top_level_boxes_round_trip() {
    let mut file = exif_file_with_payload(b"payload");
    let free_payload = b"opaque bytes that must survive";
    file.extend_from_slice(&bmff_box("free", free_payload));
    let mut decoder = parse_bytes(file).unwrap();
    let rewritten = decoder.serialize().unwrap();
    let mut reparsed = parse_bytes(rewritten).unwrap();
    assert!(reparsed.dump().unwrap().contains("Box: free (opaque)"));
    assert_eq!(reparsed.item_data(1).unwrap(), b"payload");
}

struct SlowReader {
    data: Vec<u8>,
    available: usize,
    position: u64,
}

impl StreamReader for SlowReader {
    fn get_position(&self) -> u64 {
        self.position
    }
    fn get_position_limit(&self) -> u64 {
        self.available as u64
    }
    fn wait_for_file_size(&mut self, target_size: u64) -> GrowStatus {
        if target_size <= self.available as u64 {
            GrowStatus::SizeReached
        } else if (self.available as u64) < self.data.len() as u64 {
            // More bytes will arrive later.
            GrowStatus::Timeout
        } else {
            GrowStatus::SizeBeyondEof
        }
    }
    fn seek(&mut self, position: u64) -> HeifResult<()> {
        self.position = position;
        Ok(())
    }
    fn read(&mut self, buffer: &mut [u8]) -> HeifResult<()> {
        let start = self.position as usize;
        buffer.copy_from_slice(&self.data[start..start + buffer.len()]);
        self.position += buffer.len() as u64;
        Ok(())
    }
}

#[test]
fn growing_file_parse_suspends_and_resumes() {
    crabby_heif::init();
    let file = exif_file_with_payload(b"HELLOWORLD");
    let total = file.len();
    let reader = SlowReader {
        data: file,
        available: 24, // the ftyp box and a partial meta header
        position: 0,
    };
    let mut decoder = Decoder::default();
    decoder.set_io_stream(Box::new(reader));
    let err = decoder.parse().unwrap_err();
    assert_eq!(err.sub_kind, SubErrorKind::WaitingOnIo);
    // Feed the rest of the file and retry.
    let reader = SlowReader {
        data: exif_file_with_payload(b"HELLOWORLD"),
        available: total,
        position: 0,
    };
    decoder.set_io_stream(Box::new(reader));
    decoder.parse().unwrap();
    assert_eq!(decoder.item_data(1).unwrap(), b"HELLOWORLD");
}
