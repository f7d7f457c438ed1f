//! Recognition of specific known binaries.
//!
//! A handful of shipped LE executables need hand-curated corrections
//! the heuristics cannot reach: data blobs embedded mid-code, vtables
//! no relocation points at, and labels the tracer places wrongly. Each
//! recognized binary is fingerprinted by a tuple of header fields plus
//! its object layout, and carries a fixed set of overrides applied
//! before and after analysis.

use lxdis_core::{Label, LabelKind, Region, RegionKind};
use lxdis_formats::LinearExecutable;

use crate::{AnalysisError, Analyser};

/// Tag for a recognized binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KnownFile {
    #[default]
    NotKnown,
    SyndicateWarsFinalMain,
    SyndicatePlusFinalMain,
}

/// Header and object-layout tuple identifying one binary.
struct Fingerprint {
    tag: KnownFile,
    eip_offset: u32,
    esp_offset: u32,
    last_page_size: u32,
    fixup_section_size: u32,
    loader_section_size: u32,
    /// Per object: (virtual_size, base_address).
    objects: &'static [(u32, u32)],
}

const FINGERPRINTS: &[Fingerprint] = &[
    Fingerprint {
        tag: KnownFile::SyndicateWarsFinalMain,
        eip_offset: 0xd581c,
        esp_offset: 0x9ffe0,
        last_page_size: 0x34a,
        fixup_section_size: 0x5d9ca,
        loader_section_size: 0x5df3f,
        objects: &[
            (0x12d030, 0x10000),
            (0x96, 0x140000),
            (0x9ffe0, 0x150000),
            (0x1b58, 0x1f0000),
        ],
    },
    Fingerprint {
        tag: KnownFile::SyndicatePlusFinalMain,
        eip_offset: 0x2d85c,
        esp_offset: 0x13e60,
        last_page_size: 0xe39,
        fixup_section_size: 0x12ee9,
        loader_section_size: 0x130f6,
        objects: &[
            (0x3fdf4, 0x10000),
            (0x13e60, 0x50000),
            (0xc00, 0x70000),
            (0x1c632, 0x80000),
        ],
    },
];

impl Fingerprint {
    fn matches(&self, le: &LinearExecutable) -> bool {
        let header = &le.header;
        if header.eip_offset != self.eip_offset
            || header.esp_offset != self.esp_offset
            || header.last_page_size != self.last_page_size
            || header.fixup_section_size != self.fixup_section_size
            || header.loader_section_size != self.loader_section_size
            || header.object_count as usize != self.objects.len()
        {
            return false;
        }
        self.objects
            .iter()
            .zip(le.objects())
            .all(|(&(virtual_size, base), object)| {
                object.virtual_size == virtual_size && object.base_address == base
            })
    }
}

/// Pre-analysis region overrides for Syndicate Wars: data blobs the
/// tracer would otherwise walk into.
const SYNDWARS_REGIONS: &[(u32, u32, RegionKind)] = &[
    (0x0e581e, 0x76, RegionKind::Data),
    (0x0e5af1, 0xf, RegionKind::Data),
    (0x0e73e2, 0x4e, RegionKind::Data),
    (0x0ea128, 0x202, RegionKind::Data),
    (0x10ae19, 0x25, RegionKind::Data),
    (0x10aeb5, 0x25, RegionKind::Data),
    (0x117830, 0x200, RegionKind::Data),
    (0x1233f3, 0x40, RegionKind::Data),
    (0x12b3d0, 0x2450, RegionKind::Data),
];

const SYNDWARS_LABELS: &[(u32, LabelKind)] = &[
    (0x03cd08, LabelKind::Jump),
    (0x03fdc8, LabelKind::Jump),
    (0x035644, LabelKind::Jump),
    (0x13c443, LabelKind::Jump),
    (0x140096, LabelKind::Function),
];

/// Pre-analysis overrides for Syndicate Plus: vtables and string
/// constants embedded in the code object.
const SYNDPLUS_REGIONS: &[(u32, u32, RegionKind)] = &[
    (0x014550, 0x018, RegionKind::Vtable),
    (0x014568, 0x0ac, RegionKind::Vtable),
    (0x015c0c, 0x034, RegionKind::Vtable),
    (0x015c40, 0x020, RegionKind::Vtable),
    (0x016508, 0x040, RegionKind::Vtable),
    (0x0175b0, 0x010, RegionKind::Vtable),
    (0x018238, 0x010, RegionKind::Vtable),
    (0x01be1c, 0x09c, RegionKind::Vtable),
    (0x01d390, 0x0a8, RegionKind::Vtable),
    (0x01d438, 0x014, RegionKind::Vtable),
    (0x01fb50, 0x064, RegionKind::Vtable),
    (0x025830, 0x0b4, RegionKind::Vtable),
    (0x025920, 0x0ec, RegionKind::Vtable),
    (0x026eb0, 0x034, RegionKind::Vtable),
    (0x029760, 0x030, RegionKind::Vtable),
    (0x02c340, 0x044, RegionKind::Vtable),
    (0x02f980, 0x010, RegionKind::Vtable),
    (0x02fce0, 0x040, RegionKind::Vtable),
    (0x02fe2c, 0x040, RegionKind::Vtable),
    (0x0312f8, 0x044, RegionKind::Vtable),
    (0x0346c0, 0x020, RegionKind::Vtable),
    (0x034a70, 0x020, RegionKind::Vtable),
    (0x034ab0, 0x020, RegionKind::Vtable),
    (0x0375c0, 0x010, RegionKind::Vtable),
    (0x0375d0, 0x030, RegionKind::Vtable),
    (0x040431, 0x025, RegionKind::Data),
    (0x0404fb, 0x025, RegionKind::Data),
    (0x04225e, 0x044, RegionKind::Vtable),
    (0x042ade, 0x008, RegionKind::Data),
    (0x042ae6, 0x008, RegionKind::Data),
    (0x043992, 0x010, RegionKind::Vtable),
    (0x048794, 0x010, RegionKind::Vtable),
    (0x0488bd, 0x010, RegionKind::Vtable),
    (0x0489cc, 0x010, RegionKind::Vtable),
    (0x04a3a7, 0x010, RegionKind::Vtable),
    (0x04fc81, 0x040, RegionKind::Data),
    (0x04fd30, 0x028, RegionKind::Data),
    (0x04fda3, 0x028, RegionKind::Data),
    (0x04fde4, 0x010, RegionKind::Data),
];

impl KnownFile {
    /// Fingerprints `le` against the registry.
    pub fn check(le: &LinearExecutable) -> KnownFile {
        FINGERPRINTS
            .iter()
            .find(|fp| fp.matches(le))
            .map(|fp| fp.tag)
            .unwrap_or(KnownFile::NotKnown)
    }

    /// Human-readable identification, when recognized.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::NotKnown => None,
            Self::SyndicateWarsFinalMain => Some("Syndicate Wars Final `main.exe`"),
            Self::SyndicatePlusFinalMain => Some("Syndicate Plus Final `main.exe`"),
        }
    }

    /// Applies the pre-analysis overrides: runs after region seeding,
    /// before the first trace.
    pub fn pre_apply(&self, analyser: &mut Analyser) -> Result<(), AnalysisError> {
        let (regions, labels): (&[_], &[_]) = match self {
            Self::NotKnown => return Ok(()),
            Self::SyndicateWarsFinalMain => (SYNDWARS_REGIONS, SYNDWARS_LABELS),
            Self::SyndicatePlusFinalMain => (SYNDPLUS_REGIONS, &[]),
        };

        if let Some(name) = self.name() {
            eprintln!("Known file: {}.", name);
        }
        for &(address, size, kind) in regions {
            analyser.insert_region(Region::new(address, size, kind))?;
        }
        for &(address, kind) in labels {
            analyser.set_label(Label::new(address, kind));
        }
        Ok(())
    }

    /// Applies the post-analysis overrides: runs after `run` completes.
    pub fn post_apply(&self, analyser: &mut Analyser) {
        if let Self::SyndicateWarsFinalMain = self {
            analyser.remove_label(0x10000);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_known_applies_nothing() {
        assert_eq!(KnownFile::default(), KnownFile::NotKnown);
        assert!(KnownFile::NotKnown.name().is_none());
    }

    #[test]
    fn fingerprint_tables_are_well_formed() {
        for fp in FINGERPRINTS {
            assert!(!fp.objects.is_empty());
            assert!(fp.tag != KnownFile::NotKnown);
        }
        for &(_, size, _) in SYNDWARS_REGIONS.iter().chain(SYNDPLUS_REGIONS) {
            assert!(size > 0);
        }
    }
}
