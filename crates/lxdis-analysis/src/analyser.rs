//! The control-flow discovery engine.
//!
//! The analyser owns two intertwined ordered maps (typed regions and
//! labels) plus a FIFO queue of addresses awaiting code tracing. It
//! runs three passes in a fixed order: tracing from the entry point and
//! known symbols, scanning relocation targets for vtables, and sweeping
//! whatever relocation targets are still undecided. The vtable pass
//! relies on the regions the code pass left behind, so the order is
//! part of the contract.

use std::collections::VecDeque;
use std::ops::Bound;

use lxdis_core::{Image, Label, LabelKind, LabelMap, Region, RegionKind, RegionMap, SymbolMap};
use lxdis_disasm::{Classifier, InsnKind};
use lxdis_formats::LinearExecutable;

use crate::AnalysisError;

pub struct Analyser<'a> {
    le: &'a LinearExecutable<'a>,
    image: &'a Image,
    classifier: Classifier,
    regions: RegionMap,
    labels: LabelMap,
    queue: VecDeque<u32>,
    guesses: usize,
}

impl<'a> Analyser<'a> {
    /// Creates an analyser seeded with one region per object: UNKNOWN
    /// for executable objects, DATA (with a base label) otherwise.
    pub fn new(le: &'a LinearExecutable<'a>, image: &'a Image) -> Self {
        let mut analyser = Self {
            le,
            image,
            classifier: Classifier::new(),
            regions: RegionMap::new(),
            labels: LabelMap::new(),
            queue: VecDeque::new(),
            guesses: 0,
        };

        for object in le.objects() {
            let kind = if object.is_executable() {
                RegionKind::Unknown
            } else {
                analyser
                    .labels
                    .set(Label::new(object.base_address, LabelKind::Data));
                RegionKind::Data
            };
            analyser
                .regions
                .add(Region::new(object.base_address, object.virtual_size, kind));
        }

        analyser
    }

    /// Runs the full discovery pipeline.
    pub fn run(&mut self, symbols: &SymbolMap) -> Result<(), AnalysisError> {
        self.add_symbols_to_labels(symbols);
        self.add_entry_to_labels();
        self.add_labels_to_trace_queue();

        eprintln!("Tracing code directly accessible from the entry point...");
        self.trace_code()?;
        eprintln!("Tracing text relocs for vtables...");
        self.trace_vtables()?;
        eprintln!("Tracing remaining relocs for functions and data...");
        self.trace_remaining_relocs()?;

        Ok(())
    }

    /// Final region map, for the listing writer.
    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// Final label map, for the listing writer.
    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// How many relocation targets were classified by guesswork.
    pub fn guess_count(&self) -> usize {
        self.guesses
    }

    /// Splits `region` into the map. Exposed for known-file overrides.
    pub fn insert_region(&mut self, region: Region) -> Result<(), AnalysisError> {
        self.regions.insert(region)?;
        Ok(())
    }

    /// Sets or improves a label. Exposed for known-file overrides.
    pub fn set_label(&mut self, label: Label) {
        self.labels.set(label);
    }

    /// Drops the label at `addr`. Exposed for known-file overrides.
    pub fn remove_label(&mut self, addr: u32) {
        self.labels.remove(addr);
    }

    fn add_symbols_to_labels(&mut self, symbols: &SymbolMap) {
        for symbol in symbols.iter() {
            self.labels
                .set(Label::with_name(symbol.address, symbol.kind, symbol.name.as_str()));
        }
    }

    fn add_entry_to_labels(&mut self) {
        match self.le.entry_point() {
            Some(entry) => {
                self.labels
                    .set(Label::with_name(entry, LabelKind::Function, "_start"));
            }
            None => eprintln!(
                "Warning: Entry object {} does not exist.",
                self.le.header.eip_object
            ),
        }
    }

    fn add_labels_to_trace_queue(&mut self) {
        for label in self.labels.iter() {
            if matches!(
                label.kind,
                LabelKind::Function | LabelKind::Jump | LabelKind::Unknown
            ) {
                self.queue.push_back(label.address);
            }
        }
    }

    /// Drains the trace queue, tracing each scheduled address.
    fn trace_code(&mut self) -> Result<(), AnalysisError> {
        while let Some(address) = self.queue.pop_front() {
            self.trace_code_at(address)?;
        }
        Ok(())
    }

    /// Walks instructions from `start` to the end of its region,
    /// scheduling every direct branch target, then types the walked
    /// range. Duplicate queue entries short-circuit here: a region that
    /// is no longer UNKNOWN has already been decided.
    fn trace_code_at(&mut self, start: u32) -> Result<(), AnalysisError> {
        let Some(region) = self.regions.get_at(start).copied() else {
            eprintln!(
                "Warning: Tried to trace code at an unmapped address: {:#x}.",
                start
            );
            return Ok(());
        };
        if region.kind != RegionKind::Unknown {
            return Ok(());
        }

        let end = region.end_address();
        let Some(object) = self.image.object_at(start) else {
            eprintln!(
                "Warning: Tried to trace code at an unmapped address: {:#x}.",
                start
            );
            return Ok(());
        };

        let mut addr = start;
        let mut kind = RegionKind::Code;

        while addr < end {
            let window = &object
                .data_at(addr)
                .expect("traced address inside its object")[..(end - addr) as usize];
            let insn = self.classifier.decode(addr, window)?;

            if !insn.is_acceptable() {
                // Treating the region as code was wrong; make it data.
                kind = RegionKind::Data;
                addr += insn.size as u32;
                break;
            }

            if insn.target != 0 {
                match insn.kind {
                    InsnKind::Call => {
                        self.labels.set(Label::new(insn.target, LabelKind::Function));
                        self.queue.push_back(insn.target);
                    }
                    InsnKind::Jump | InsnKind::CondJump => {
                        self.labels.set(Label::new(insn.target, LabelKind::Jump));
                        self.queue.push_back(insn.target);
                    }
                    _ => {}
                }
            }

            addr += insn.size as u32;

            if matches!(insn.kind, InsnKind::Jump | InsnKind::Ret) {
                break;
            }
        }

        self.regions
            .insert(Region::new(start, addr - start, kind))?;
        Ok(())
    }

    /// Scans relocation targets inside executable objects for dense
    /// arrays of relocated code pointers. Each hit becomes a VTABLE
    /// region whose entries are scheduled and traced immediately, so
    /// later fixups see the regions those functions claim.
    fn trace_vtables(&mut self) -> Result<(), AnalysisError> {
        for n in 0..self.le.object_count() {
            let fixups = self.le.fixups_for_object(n);

            for fixup in fixups.values() {
                let Some(region) = self.regions.get_at(fixup.address).copied() else {
                    eprintln!(
                        "Warning: Reloc pointing to unmapped memory at {:#x}.",
                        fixup.address
                    );
                    continue;
                };
                if region.kind != RegionKind::Unknown {
                    continue;
                }

                let Some(object) = self.image.object_at(region.address) else {
                    continue;
                };
                if !object.is_executable() {
                    continue;
                }

                // Scan window: up to the next fixup target anywhere in
                // the image, clamped to the region end.
                let mut size = (region.end_address() - fixup.address) as usize;
                if let Some(&next) = self
                    .le
                    .fixup_target_addresses()
                    .range((Bound::Excluded(fixup.address), Bound::Unbounded))
                    .next()
                {
                    size = size.min((next - fixup.address) as usize);
                }

                let data = object
                    .data_at(fixup.address)
                    .expect("fixup target inside its object");

                let mut count = 0u32;
                let mut off = 0usize;
                while off + 4 <= size {
                    let word = u32::from_le_bytes([
                        data[off],
                        data[off + 1],
                        data[off + 2],
                        data[off + 3],
                    ]);
                    let source_off = fixup.address + off as u32 - object.base_address();

                    // A slot counts when it is zero or when the word
                    // itself was placed by a fixup.
                    if word == 0 || fixups.contains_key(&source_off) {
                        count += 1;
                        if word != 0 {
                            self.labels.set(Label::new(word, LabelKind::Function));
                            self.queue.push_back(word);
                        }
                    } else {
                        break;
                    }
                    off += 4;
                }

                if count > 0 {
                    self.regions
                        .insert(Region::new(fixup.address, 4 * count, RegionKind::Vtable))?;
                    self.labels.set(Label::new(fixup.address, LabelKind::Vtable));
                    // New function leads must be resolved before the
                    // next fixup is considered, or data following this
                    // table could be claimed as code.
                    self.trace_code()?;
                }
            }
        }
        Ok(())
    }

    /// Sweeps fixup targets still UNKNOWN or DATA: undecided targets
    /// get traced (guessing FUNCTION when no stronger label exists);
    /// data targets get a DATA label.
    fn trace_remaining_relocs(&mut self) -> Result<(), AnalysisError> {
        for n in 0..self.image.object_count() {
            let fixups = self.le.fixups_for_object(n);

            for fixup in fixups.values() {
                let Some(region) = self.regions.get_at(fixup.address).copied() else {
                    continue;
                };

                match region.kind {
                    RegionKind::Unknown => {
                        let labelled = self.labels.get(fixup.address).is_some_and(|label| {
                            matches!(label.kind, LabelKind::Function | LabelKind::Jump)
                        });
                        if !labelled {
                            eprintln!("Guessing that {:#x} is a function.", fixup.address);
                            self.guesses += 1;
                            self.labels
                                .set(Label::new(fixup.address, LabelKind::Function));
                        }
                        self.queue.push_back(fixup.address);
                        self.trace_code()?;
                    }
                    RegionKind::Data => {
                        self.labels.set(Label::new(fixup.address, LabelKind::Data));
                    }
                    _ => {}
                }
            }
        }

        eprintln!("{} guess(es) to investigate.", self.guesses);
        Ok(())
    }
}
