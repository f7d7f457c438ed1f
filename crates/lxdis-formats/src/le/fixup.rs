//! LE fixup section parsing.
//!
//! The fixup page table maps each memory page to a byte range of the
//! fixup record table; records are variable length. Only internal
//! 32-bit offset fixups become entries in the per-object maps the
//! analyser consumes; every other record kind is still walked so the
//! cursor stays in sync, and counted.

use std::collections::{BTreeMap, BTreeSet};

use crate::le::{read_u16, read_u32, LeHeader, ObjectHeader};
use crate::ParseError;

/// Source nibble: 16-bit selector fixup.
const SRC_SELECTOR16: u8 = 0x02;
/// Source nibble: 32-bit offset fixup.
const SRC_OFFSET32: u8 = 0x07;
/// Source flag: a list of source offsets follows the target data.
const SRC_LIST: u8 = 0x20;

/// Target kind mask within the flags byte.
const TARGET_KIND: u8 = 0x03;
const TARGET_INTERNAL: u8 = 0x00;
const TARGET_IMPORT_ORDINAL: u8 = 0x01;
const TARGET_IMPORT_NAME: u8 = 0x02;
const TARGET_ENTRY: u8 = 0x03;
/// Flag: an additive value follows the target data.
const TARGET_ADDITIVE: u8 = 0x04;
/// Flag: target offset is 32-bit rather than 16-bit.
const TARGET_OFFSET32: u8 = 0x10;
/// Flag: additive value is 32-bit rather than 16-bit.
const TARGET_ADDITIVE32: u8 = 0x20;
/// Flag: object / module number is 16-bit rather than 8-bit.
const TARGET_OBJECT16: u8 = 0x40;
/// Flag: import ordinal is 8-bit.
const TARGET_ORDINAL8: u8 = 0x80;

/// One applied fixup: patch the 32-bit word at `offset` (relative to
/// the object base) to the absolute address `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub offset: u32,
    pub address: u32,
}

/// All fixup views the analyser consumes.
#[derive(Debug, Default)]
pub(crate) struct FixupTables {
    /// Per object: object-relative source offset -> fixup.
    pub per_object: Vec<BTreeMap<u32, Fixup>>,
    /// Global ordered set of absolute target addresses.
    pub targets: BTreeSet<u32>,
    /// Records recognized but not materialized (imports, selector
    /// fixups, entry-table references).
    pub skipped: usize,
}

/// Walks every page's fixup records.
pub(crate) fn parse_fixups(
    data: &[u8],
    base: usize,
    header: &LeHeader,
    objects: &[ObjectHeader],
) -> Result<FixupTables, ParseError> {
    let page_count = header.page_count as usize;
    let table_off = base + header.fixup_page_table_offset as usize;
    let record_base = base + header.fixup_record_table_offset as usize;

    // Map each global page to its owning object and that page's byte
    // offset within the object.
    let mut page_owner: Vec<Option<(usize, u32)>> = vec![None; page_count];
    for (oi, object) in objects.iter().enumerate() {
        let first = object.first_page_index();
        for k in 0..object.page_count as usize {
            let page = first + k;
            if page >= page_count {
                break;
            }
            page_owner[page] = Some((oi, k as u32 * header.page_size));
        }
    }

    let mut tables = FixupTables {
        per_object: vec![BTreeMap::new(); objects.len()],
        ..Default::default()
    };

    for page in 0..page_count {
        let start = read_u32(data, table_off + page * 4)? as usize;
        let end = read_u32(data, table_off + (page + 1) * 4)? as usize;
        if end < start {
            return Err(ParseError::invalid_structure(
                "fixup page table",
                (table_off + page * 4) as u64,
                "record range runs backwards",
            ));
        }

        let Some((oi, page_off)) = page_owner[page] else {
            continue;
        };

        let mut pos = record_base + start;
        let page_end = record_base + end;
        while pos < page_end {
            pos = parse_record(data, pos, objects, oi, page_off, &mut tables)?;
        }
    }

    Ok(tables)
}

/// Parses one fixup record at `pos`, returning the position of the next.
fn parse_record(
    data: &[u8],
    pos: usize,
    objects: &[ObjectHeader],
    object_index: usize,
    page_off: u32,
    tables: &mut FixupTables,
) -> Result<usize, ParseError> {
    let record_start = pos as u64;
    let src = *data
        .get(pos)
        .ok_or_else(|| ParseError::too_short(pos + 1, data.len()))?;
    let flags = *data
        .get(pos + 1)
        .ok_or_else(|| ParseError::too_short(pos + 2, data.len()))?;
    let mut pos = pos + 2;

    let src_type = src & 0x0f;

    // Either a single source offset here, or a count of offsets that
    // trail the target data.
    let mut source_offsets: Vec<i16> = Vec::new();
    let list_len = if src & SRC_LIST != 0 {
        let n = *data
            .get(pos)
            .ok_or_else(|| ParseError::too_short(pos + 1, data.len()))?;
        pos += 1;
        n as usize
    } else {
        source_offsets.push(read_u16(data, pos)? as i16);
        pos += 2;
        0
    };

    let mut target: Option<(usize, u32)> = None;
    match flags & TARGET_KIND {
        TARGET_INTERNAL => {
            let object_number = if flags & TARGET_OBJECT16 != 0 {
                let n = read_u16(data, pos)? as u32;
                pos += 2;
                n
            } else {
                let n = *data
                    .get(pos)
                    .ok_or_else(|| ParseError::too_short(pos + 1, data.len()))?
                    as u32;
                pos += 1;
                n
            };
            let offset = if src_type == SRC_SELECTOR16 {
                0
            } else if flags & TARGET_OFFSET32 != 0 {
                let v = read_u32(data, pos)?;
                pos += 4;
                v
            } else {
                let v = read_u16(data, pos)? as u32;
                pos += 2;
                v
            };
            if object_number == 0 || object_number as usize > objects.len() {
                return Err(ParseError::invalid_structure(
                    "fixup record",
                    record_start,
                    format!("object number {} out of range", object_number),
                ));
            }
            target = Some((object_number as usize - 1, offset));
        }
        TARGET_IMPORT_ORDINAL => {
            pos += if flags & TARGET_OBJECT16 != 0 { 2 } else { 1 };
            pos += if flags & TARGET_ORDINAL8 != 0 {
                1
            } else if flags & TARGET_OFFSET32 != 0 {
                4
            } else {
                2
            };
        }
        TARGET_IMPORT_NAME => {
            pos += if flags & TARGET_OBJECT16 != 0 { 2 } else { 1 };
            pos += if flags & TARGET_OFFSET32 != 0 { 4 } else { 2 };
        }
        TARGET_ENTRY => {
            pos += if flags & TARGET_OBJECT16 != 0 { 2 } else { 1 };
        }
        _ => unreachable!("two-bit target kind"),
    }

    let additive = if flags & TARGET_ADDITIVE != 0 {
        if flags & TARGET_ADDITIVE32 != 0 {
            let v = read_u32(data, pos)?;
            pos += 4;
            v
        } else {
            let v = read_u16(data, pos)? as u32;
            pos += 2;
            v
        }
    } else {
        0
    };

    for _ in 0..list_len {
        source_offsets.push(read_u16(data, pos)? as i16);
        pos += 2;
    }

    if pos > data.len() {
        return Err(ParseError::TruncatedData {
            expected: pos,
            actual: data.len(),
            context: "fixup record",
        });
    }

    let (target_object, target_offset) = match (src_type, target) {
        (SRC_OFFSET32, Some(t)) => t,
        _ => {
            tables.skipped += 1;
            return Ok(pos);
        }
    };

    let object = &objects[object_index];
    let address = objects[target_object]
        .base_address
        .wrapping_add(target_offset)
        .wrapping_add(additive);

    for src_off in source_offsets {
        // A fixup whose source straddles the previous page boundary is
        // listed again under this page with a negative offset; the
        // object-relative key makes the two listings collide and dedupe.
        let object_off = page_off as i64 + src_off as i64;
        if object_off < 0 || object_off >= object.virtual_size as i64 {
            continue;
        }
        let offset = object_off as u32;
        tables.per_object[object_index].insert(offset, Fixup { offset, address });
        tables.targets.insert(address);
    }

    Ok(pos)
}
