//! Linear Executable (LE) parser.
//!
//! LE is the 32-bit segmented container used by DOS-extender and
//! OS/2-era programs: an optional MZ stub, an LE header, an object
//! table, an object page map locating each object's pages in the file,
//! and a fixup section telling the loader which 32-bit words to patch
//! with absolute addresses.

mod fixup;
mod header;
mod object;
mod pages;

pub use fixup::Fixup;
pub use header::{LeHeader, LE_MAGIC, LX_MAGIC};
pub use object::{ObjectHeader, OBJECT_EXECUTABLE, OBJECT_READABLE, OBJECT_WRITABLE};
pub use pages::PageMapEntry;

use std::collections::{BTreeMap, BTreeSet};

use crate::ParseError;
use fixup::FixupTables;
use object::OBJECT_ENTRY_SIZE;
use pages::PAGE_ENTRY_SIZE;

/// File offset of the pointer to the LE header inside an MZ stub.
const MZ_LE_OFFSET_FIELD: usize = 0x3c;

pub(crate) fn read_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = data
        .get(offset..offset + 2)
        .ok_or_else(|| ParseError::too_short(offset + 2, data.len()))?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| ParseError::too_short(offset + 4, data.len()))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// A parsed LE module.
#[derive(Debug)]
pub struct LinearExecutable<'a> {
    /// Raw bytes of the whole file.
    data: &'a [u8],
    /// Parsed LE header.
    pub header: LeHeader,
    objects: Vec<ObjectHeader>,
    page_map: Vec<PageMapEntry>,
    fixups: FixupTables,
    empty_fixups: BTreeMap<u32, Fixup>,
}

impl<'a> LinearExecutable<'a> {
    /// Parses an LE file from raw bytes.
    ///
    /// The file may start with an MZ stub pointing at the LE header, or
    /// with the LE header itself.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        let base = Self::locate_header(data)?;
        let header = LeHeader::parse(data, base)?;

        let mut objects = Vec::with_capacity(header.object_count as usize);
        let table = base + header.object_table_offset as usize;
        for i in 0..header.object_count as usize {
            objects.push(ObjectHeader::parse(data, table + i * OBJECT_ENTRY_SIZE)?);
        }

        let mut page_map = Vec::with_capacity(header.page_count as usize);
        let table = base + header.object_page_table_offset as usize;
        for i in 0..header.page_count as usize {
            page_map.push(PageMapEntry::parse(data, table + i * PAGE_ENTRY_SIZE)?);
        }

        let fixups = fixup::parse_fixups(data, base, &header, &objects)?;

        Ok(Self {
            data,
            header,
            objects,
            page_map,
            fixups,
            empty_fixups: BTreeMap::new(),
        })
    }

    fn locate_header(data: &[u8]) -> Result<usize, ParseError> {
        let magic = data.get(..2).ok_or_else(|| ParseError::too_short(2, data.len()))?;
        match magic {
            m if m == LE_MAGIC || m == LX_MAGIC => Ok(0),
            b"MZ" => {
                let off = read_u32(data, MZ_LE_OFFSET_FIELD)? as usize;
                if off == 0 {
                    return Err(ParseError::InvalidValue(
                        "MZ stub carries no extended-header offset",
                    ));
                }
                Ok(off)
            }
            other => Err(ParseError::invalid_magic("MZ or LE", other)),
        }
    }

    /// Raw bytes of the backing file.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Number of objects in the object table.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// The object table, in order.
    pub fn objects(&self) -> &[ObjectHeader] {
        &self.objects
    }

    /// One object table entry.
    pub fn object_header(&self, index: usize) -> Option<&ObjectHeader> {
        self.objects.get(index)
    }

    /// File offset of a page's data, by zero-based global page index.
    pub fn page_file_offset(&self, page_index: usize) -> Option<usize> {
        let entry = self.page_map.get(page_index)?;
        let number = entry.page_number.checked_sub(1)?;
        Some(self.header.data_pages_offset as usize + number as usize * self.header.page_size as usize)
    }

    /// Fixups whose source lies in object `index`, keyed by the
    /// object-relative offset of the patched word.
    pub fn fixups_for_object(&self, index: usize) -> &BTreeMap<u32, Fixup> {
        self.fixups
            .per_object
            .get(index)
            .unwrap_or(&self.empty_fixups)
    }

    /// Every fixup target address across all objects, ordered.
    pub fn fixup_target_addresses(&self) -> &BTreeSet<u32> {
        &self.fixups.targets
    }

    /// Number of fixup records that were recognized but not
    /// materialized (imports, selectors, entry-table references).
    pub fn skipped_fixup_count(&self) -> usize {
        self.fixups.skipped
    }

    /// Absolute address of the entry point, when the header names a
    /// valid object.
    pub fn entry_point(&self) -> Option<u32> {
        let object = self.objects.get(self.header.eip_object_index())?;
        Some(object.base_address.wrapping_add(self.header.eip_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SynthFixup, SynthLe, SynthObject};

    fn sample() -> SynthLe {
        SynthLe {
            page_size: 0x1000,
            eip_object: 1,
            eip_offset: 0x20,
            objects: vec![
                SynthObject {
                    base_address: 0x10000,
                    virtual_size: 0x1800,
                    flags: OBJECT_READABLE | OBJECT_EXECUTABLE,
                    data: vec![0xc3; 0x1200],
                },
                SynthObject {
                    base_address: 0x20000,
                    virtual_size: 0x400,
                    flags: OBJECT_READABLE | OBJECT_WRITABLE,
                    data: vec![0x11; 0x400],
                },
            ],
            fixups: vec![
                SynthFixup {
                    object: 0,
                    offset: 0x10,
                    target_object: 1,
                    target_offset: 0x30,
                },
                SynthFixup {
                    object: 1,
                    offset: 0x100,
                    target_object: 0,
                    target_offset: 0x20,
                },
            ],
        }
    }

    #[test]
    fn parses_header_and_object_table() {
        let file = sample().build();
        let le = LinearExecutable::parse(&file).unwrap();

        assert_eq!(le.header.page_size, 0x1000);
        assert_eq!(le.object_count(), 2);

        let code = le.object_header(0).unwrap();
        assert_eq!(code.base_address, 0x10000);
        assert_eq!(code.virtual_size, 0x1800);
        assert!(code.is_executable());

        let data = le.object_header(1).unwrap();
        assert_eq!(data.base_address, 0x20000);
        assert!(!data.is_executable());

        assert_eq!(le.entry_point(), Some(0x10020));
    }

    #[test]
    fn page_offsets_follow_the_page_map() {
        let spec = sample();
        let file = spec.build();
        let le = LinearExecutable::parse(&file).unwrap();

        // Pages are laid out sequentially by the builder.
        let first = le.page_file_offset(0).unwrap();
        assert_eq!(le.page_file_offset(1).unwrap(), first + 0x1000);
        assert_eq!(le.page_file_offset(2).unwrap(), first + 0x2000);
        assert!(le.page_file_offset(99).is_none());
    }

    #[test]
    fn fixups_resolve_to_absolute_targets() {
        let file = sample().build();
        let le = LinearExecutable::parse(&file).unwrap();

        let code_fixups = le.fixups_for_object(0);
        assert_eq!(code_fixups.len(), 1);
        let fixup = code_fixups.get(&0x10).unwrap();
        assert_eq!(fixup.address, 0x20030);

        let data_fixups = le.fixups_for_object(1);
        assert_eq!(data_fixups.get(&0x100).unwrap().address, 0x10020);

        let targets: Vec<u32> = le.fixup_target_addresses().iter().copied().collect();
        assert_eq!(targets, vec![0x10020, 0x20030]);
    }

    #[test]
    fn rejects_non_le_input() {
        assert!(matches!(
            LinearExecutable::parse(b"__garbage__"),
            Err(ParseError::InvalidMagic { .. })
        ));

        let mut lx = sample().build();
        let base = u32::from_le_bytes(lx[0x3c..0x40].try_into().unwrap()) as usize;
        lx[base..base + 2].copy_from_slice(b"LX");
        assert!(matches!(
            LinearExecutable::parse(&lx),
            Err(ParseError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let file = sample().build();
        assert!(LinearExecutable::parse(&file[..0x60]).is_err());
    }
}
