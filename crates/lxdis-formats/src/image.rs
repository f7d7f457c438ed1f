//! Relocation-aware reconstruction of the loaded memory image.

use lxdis_core::{Image, ImageObject};

use crate::{LinearExecutable, ParseError};

/// Rebuilds the in-memory image of `le` from its data pages, then
/// patches every fixup's 32-bit word with its absolute target address.
///
/// A page whose byte range falls outside the backing file, or a fixup
/// that would write past the end of its object, fails the build.
pub fn build_image(le: &LinearExecutable) -> Result<Image, ParseError> {
    let file = le.data();
    let header = &le.header;
    let page_count = header.page_count as usize;

    let mut objects = Vec::with_capacity(le.object_count());

    for (oi, object) in le.objects().iter().enumerate() {
        let virtual_size = object.virtual_size as usize;
        let mut data = vec![0u8; virtual_size];

        let first = object.first_page_index();
        let page_end = (first + object.page_count as usize).min(page_count);

        let mut data_off = 0usize;
        for page in first..page_end {
            let page_bytes = if page + 1 < page_count {
                header.page_size as usize
            } else {
                header.last_page_size as usize
            };
            let size = page_bytes.min(virtual_size - data_off);

            let file_off = self::page_offset(le, page, oi)?;
            let src = file.get(file_off..file_off + size).ok_or_else(|| {
                ParseError::TruncatedData {
                    expected: file_off + size,
                    actual: file.len(),
                    context: "object data page",
                }
            })?;
            data[data_off..data_off + size].copy_from_slice(src);
            data_off += size;
        }

        for fixup in le.fixups_for_object(oi).values() {
            let end = fixup.offset as usize + 4;
            if end > data.len() {
                return Err(ParseError::invalid_structure(
                    "fixup",
                    fixup.offset as u64,
                    format!("write past end of object {}", oi),
                ));
            }
            data[fixup.offset as usize..end].copy_from_slice(&fixup.address.to_le_bytes());
        }

        objects.push(ImageObject::new(
            oi,
            object.base_address,
            object.is_executable(),
            data,
        ));
    }

    Ok(Image::new(objects))
}

fn page_offset(le: &LinearExecutable, page: usize, object: usize) -> Result<usize, ParseError> {
    le.page_file_offset(page).ok_or_else(|| {
        ParseError::invalid_structure(
            "object page map",
            page as u64,
            format!("object {} references missing page {}", object, page),
        )
    })
}
