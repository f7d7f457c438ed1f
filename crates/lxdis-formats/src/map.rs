//! Linker `.MAP` symbol reader.
//!
//! Recognizes the two address forms that matter for LE work:
//!
//! - `SSSS:OOOOOOOO name` (Watcom/MSVC style): the 1-based segment
//!   number selects an LE object; the symbol lands at
//!   `object.base_address + offset`.
//! - `0xXXXXXXXX name` (GNU ld style): the address is already linear.
//!
//! Everything else (section banners, comments, module lists) is
//! skipped line by line; only a file with no recognizable symbol at all
//! is an error.

use lxdis_core::{LabelKind, Symbol, SymbolMap};

use crate::{LinearExecutable, ParseError};

/// Parses map-file text and merges the symbols it yields into
/// `symbols`. Returns how many symbols were accepted.
pub fn load_map_symbols(
    text: &str,
    le: &LinearExecutable,
    symbols: &mut SymbolMap,
) -> Result<usize, ParseError> {
    let mut accepted = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        let Some((address, name)) = parse_symbol_line(line, le) else {
            continue;
        };

        let kind = match le
            .objects()
            .iter()
            .find(|o| address >= o.base_address && address < o.end_address())
        {
            Some(object) if object.is_executable() => LabelKind::Function,
            Some(_) => LabelKind::Data,
            // Addresses outside every object cannot be labelled.
            None => continue,
        };

        symbols.insert(Symbol::new(address, kind, name));
        accepted += 1;
    }

    if accepted == 0 {
        return Err(ParseError::InvalidValue(
            "no symbols recognized in map file",
        ));
    }
    Ok(accepted)
}

fn parse_symbol_line(line: &str, le: &LinearExecutable) -> Option<(u32, String)> {
    let mut parts = line.split_whitespace();
    let addr_field = parts.next()?;
    let name = parts.next()?;

    if !is_symbol_name(name) {
        return None;
    }

    let address = if let Some((seg, off)) = addr_field.split_once(':') {
        let seg = u32::from_str_radix(seg, 16).ok()?;
        let off = u32::from_str_radix(off, 16).ok()?;
        let object = le.object_header(seg.checked_sub(1)? as usize)?;
        object.base_address.wrapping_add(off)
    } else {
        let hex = addr_field.strip_prefix("0x")?;
        u32::from_str_radix(hex, 16).ok()?
    };

    Some((address, name.to_string()))
}

fn is_symbol_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.' | '@' | '?'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::le::{OBJECT_EXECUTABLE, OBJECT_READABLE, OBJECT_WRITABLE};
    use crate::testing::{SynthLe, SynthObject};

    fn sample_le() -> Vec<u8> {
        SynthLe {
            page_size: 0x1000,
            eip_object: 1,
            eip_offset: 0,
            objects: vec![
                SynthObject {
                    base_address: 0x10000,
                    virtual_size: 0x2000,
                    flags: OBJECT_READABLE | OBJECT_EXECUTABLE,
                    data: vec![0xc3; 0x100],
                },
                SynthObject {
                    base_address: 0x20000,
                    virtual_size: 0x1000,
                    flags: OBJECT_READABLE | OBJECT_WRITABLE,
                    data: vec![0; 0x100],
                },
            ],
            fixups: vec![],
        }
        .build()
    }

    #[test]
    fn watcom_style_lines_resolve_through_objects() {
        let file = sample_le();
        let le = LinearExecutable::parse(&file).unwrap();
        let mut symbols = SymbolMap::new();

        let text = "\
            Memory Map\n\
            \n\
            0001:00000040  main_\n\
            0002:00000010  screen_buffer\n";
        let n = load_map_symbols(text, &le, &mut symbols).unwrap();
        assert_eq!(n, 2);

        let main = symbols.get(0x10040).unwrap();
        assert_eq!(main.name, "main_");
        assert_eq!(main.kind, LabelKind::Function);

        let buffer = symbols.get(0x20010).unwrap();
        assert_eq!(buffer.kind, LabelKind::Data);
    }

    #[test]
    fn linear_style_lines_are_taken_verbatim() {
        let file = sample_le();
        let le = LinearExecutable::parse(&file).unwrap();
        let mut symbols = SymbolMap::new();

        let n = load_map_symbols("0x00010100 start_\n", &le, &mut symbols).unwrap();
        assert_eq!(n, 1);
        assert_eq!(symbols.get(0x10100).unwrap().name, "start_");
    }

    #[test]
    fn unresolvable_addresses_are_skipped() {
        let file = sample_le();
        let le = LinearExecutable::parse(&file).unwrap();
        let mut symbols = SymbolMap::new();

        let text = "\
            0x00010000 known_\n\
            0x00090000 outside_every_object\n\
            00ff:00000000 no_such_segment\n";
        let n = load_map_symbols(text, &le, &mut symbols).unwrap();
        assert_eq!(n, 1);
        assert_eq!(symbols.len(), 1);
    }

    #[test]
    fn file_without_symbols_is_an_error() {
        let file = sample_le();
        let le = LinearExecutable::parse(&file).unwrap();
        let mut symbols = SymbolMap::new();

        let text = "Origin   Group\n; nothing here\n";
        assert!(load_map_symbols(text, &le, &mut symbols).is_err());
    }
}
