//! Text listing generation.
//!
//! Renders the final region and label maps over the image as an
//! assembler-style listing: decoded instructions for code regions,
//! `.long` words for vtables, and byte rows for data, with fixup-backed
//! words printed as `.long` references to their targets.

use std::io::{self, Write};

use lxdis_core::{Image, ImageObject, LabelKind, LabelMap, Region, RegionKind, RegionMap};
use lxdis_disasm::Classifier;
use lxdis_formats::LinearExecutable;

pub struct ListingWriter<'a> {
    le: &'a LinearExecutable<'a>,
    image: &'a Image,
    regions: &'a RegionMap,
    labels: &'a LabelMap,
    classifier: Classifier,
}

impl<'a> ListingWriter<'a> {
    pub fn new(
        le: &'a LinearExecutable<'a>,
        image: &'a Image,
        regions: &'a RegionMap,
        labels: &'a LabelMap,
    ) -> Self {
        Self {
            le,
            image,
            regions,
            labels,
            classifier: Classifier::new(),
        }
    }

    /// Writes the whole listing.
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for region in self.regions.iter() {
            let Some(object) = self.image.object_at(region.address) else {
                continue;
            };

            writeln!(
                out,
                "\n; region {:#010x}..{:#010x} ({:#x} bytes) {}",
                region.address,
                region.end_address(),
                region.size,
                kind_name(region.kind),
            )?;

            match region.kind {
                RegionKind::Code => self.write_code(out, region, object)?,
                RegionKind::Vtable => self.write_vtable(out, region, object)?,
                RegionKind::Data | RegionKind::Unknown => {
                    self.write_data(out, region, object)?
                }
            }
        }
        Ok(())
    }

    fn write_code(&self, out: &mut impl Write, region: &Region, object: &ImageObject) -> io::Result<()> {
        let end = region.end_address();
        let mut addr = region.address;

        while addr < end {
            self.write_label_line(out, addr)?;

            let window = &object.data_at(addr).unwrap_or(&[])[..(end - addr) as usize];
            match self.classifier.decode(addr, window) {
                Ok(insn) => {
                    write!(out, "\t{}", insn.text)?;
                    if insn.target != 0 {
                        if let Some(name) = self.label_name(insn.target) {
                            write!(out, "\t; -> {}", name)?;
                        }
                    }
                    writeln!(out)?;
                    addr += insn.size as u32;
                }
                Err(_) => {
                    writeln!(out, "\t.byte {:#04x}", window.first().copied().unwrap_or(0))?;
                    addr += 1;
                }
            }
        }
        Ok(())
    }

    fn write_vtable(&self, out: &mut impl Write, region: &Region, object: &ImageObject) -> io::Result<()> {
        let end = region.end_address();
        let mut addr = region.address;

        while addr + 4 <= end {
            self.write_label_line(out, addr)?;
            let word = self.read_word(object, addr);
            match self.label_name(word) {
                Some(name) => writeln!(out, "\t.long {}", name)?,
                None => writeln!(out, "\t.long {:#010x}", word)?,
            }
            addr += 4;
        }
        self.write_byte_tail(out, object, addr, end)
    }

    fn write_data(&self, out: &mut impl Write, region: &Region, object: &ImageObject) -> io::Result<()> {
        let fixups = self.le.fixups_for_object(object.index());
        let end = region.end_address();
        let mut addr = region.address;

        while addr < end {
            self.write_label_line(out, addr)?;

            let offset = addr - object.base_address();
            if addr + 4 <= end && fixups.contains_key(&offset) {
                let word = self.read_word(object, addr);
                match self.label_name(word) {
                    Some(name) => writeln!(out, "\t.long {}", name)?,
                    None => writeln!(out, "\t.long {:#010x}", word)?,
                }
                addr += 4;
                continue;
            }

            // Plain bytes up to the next label, fixup word, or full row.
            let mut stop = end.min(addr + 16);
            if let Some(label) = self.labels.next_after(addr) {
                stop = stop.min(label.address.max(addr + 1));
            }
            if let Some((&next_fixup, _)) = fixups
                .range(offset + 1..)
                .next()
            {
                let next_addr = object.base_address() + next_fixup;
                stop = stop.min(next_addr.max(addr + 1));
            }
            self.write_byte_tail(out, object, addr, stop)?;
            addr = stop;
        }
        Ok(())
    }

    fn write_byte_tail(
        &self,
        out: &mut impl Write,
        object: &ImageObject,
        start: u32,
        end: u32,
    ) -> io::Result<()> {
        if start >= end {
            return Ok(());
        }
        let bytes = &object.data_at(start).unwrap_or(&[])[..(end - start) as usize];
        write!(out, "\t.byte ")?;
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "{:#04x}", byte)?;
        }
        writeln!(out)
    }

    fn write_label_line(&self, out: &mut impl Write, addr: u32) -> io::Result<()> {
        if self.labels.get(addr).is_some() {
            if let Some(name) = self.label_name(addr) {
                writeln!(out, "{}:", name)?;
            }
        }
        Ok(())
    }

    /// The name an address is listed under: its label's own name, or
    /// one synthesized from the label kind.
    fn label_name(&self, addr: u32) -> Option<String> {
        let label = self.labels.get(addr)?;
        if let Some(name) = &label.name {
            if !name.is_empty() {
                return Some(name.clone());
            }
        }
        let prefix = match label.kind {
            LabelKind::Function => "func",
            LabelKind::Jump => "jump",
            LabelKind::Vtable => "vtable",
            LabelKind::Data => "data",
            LabelKind::Unknown => "loc",
        };
        Some(format!("{}_{:06x}", prefix, addr))
    }

    fn read_word(&self, object: &ImageObject, addr: u32) -> u32 {
        let bytes = object.data_at(addr).unwrap_or(&[]);
        match bytes {
            [a, b, c, d, ..] => u32::from_le_bytes([*a, *b, *c, *d]),
            _ => 0,
        }
    }
}

fn kind_name(kind: RegionKind) -> &'static str {
    match kind {
        RegionKind::Unknown => "unknown",
        RegionKind::Code => "code",
        RegionKind::Data => "data",
        RegionKind::Vtable => "vtable",
    }
}
