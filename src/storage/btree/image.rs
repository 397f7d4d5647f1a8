//! Durable page image encoding and decoding.
//!
//! Every image is an [`ImageHeader`] followed by a type-specific body:
//!
//! | page type | body |
//! |-----------|------|
//! | `col-fix` | `width:u8`, then `entries * width` value bytes |
//! | `col-rle` | per run: `varint repeat`, `varint len`, value |
//! | `col-var` | per record: `varint len`, value |
//! | `row-leaf` | per record: `varint key_len`, key, `varint val_len`, value |
//! | `col-int` | per child: `varint recno`, address |
//! | `row-int` | per child: `varint key_len`, key, address |
//!
//! Addresses are `offset:u64 | size:u32 | checksum:u32`, big-endian.

use bytes::Bytes;

use crate::primitives::bytes::{buf::Cursor, var};
use crate::storage::btree::page::{ColRef, PageContent, RowRef};
use crate::types::page::{ImageHeader, PageType, IMAGE_HDR_LEN};
use crate::types::{ArborError, PageAddr, RecordNo, Result};

/// Serializes `content` as a `page_type` image into `out`.
///
/// `fixed_width` is only consulted for fixed-length column pages, where
/// every value must be exactly that many bytes.
pub fn encode_page(
    page_type: PageType,
    content: &PageContent,
    fixed_width: u8,
    out: &mut Vec<u8>,
) -> Result<ImageHeader> {
    out.clear();
    out.resize(IMAGE_HDR_LEN, 0);
    let (entries, recno) = match (page_type, content) {
        (PageType::ColFix, PageContent::Column { recno, updates }) => {
            if fixed_width == 0 {
                return Err(ArborError::Invalid("fixed-length width must be non-zero"));
            }
            out.push(fixed_width);
            let mut entries = 0u64;
            for update in updates.iter() {
                if update.value().len() != fixed_width as usize {
                    return Err(ArborError::Invalid("fixed-length value has the wrong width"));
                }
                for _ in 0..update.repeat() {
                    out.extend_from_slice(update.value());
                }
                entries += update.repeat();
            }
            (entries, *recno)
        }
        (PageType::ColRle, PageContent::Column { recno, updates }) => {
            let mut runs = 0u64;
            let mut pending: Option<(&[u8], u64)> = None;
            for update in updates.iter() {
                pending = match pending {
                    Some((value, repeat)) if value == update.value() => {
                        Some((value, repeat + update.repeat()))
                    }
                    Some((value, repeat)) => {
                        put_run(out, repeat, value);
                        runs += 1;
                        Some((update.value(), update.repeat()))
                    }
                    None => Some((update.value(), update.repeat())),
                };
            }
            if let Some((value, repeat)) = pending {
                put_run(out, repeat, value);
                runs += 1;
            }
            (runs, *recno)
        }
        (PageType::ColVar, PageContent::Column { recno, updates }) => {
            let mut entries = 0u64;
            for update in updates.iter() {
                for _ in 0..update.repeat() {
                    put_len_prefixed(out, update.value());
                }
                entries += update.repeat();
            }
            (entries, *recno)
        }
        (PageType::RowLeaf, PageContent::Row { inserts }) => {
            for insert in inserts.iter() {
                put_len_prefixed(out, insert.key());
                put_len_prefixed(out, insert.value());
            }
            (inserts.len() as u64, RecordNo(0))
        }
        (PageType::ColInt, PageContent::ColumnInternal { recno, children }) => {
            for child in children {
                var::encode_u64(child.recno.0, out);
                put_addr(out, child.addr)?;
            }
            (children.len() as u64, *recno)
        }
        (PageType::RowInt, PageContent::RowInternal { children }) => {
            for child in children {
                put_len_prefixed(out, &child.key);
                put_addr(out, child.addr)?;
            }
            (children.len() as u64, RecordNo(0))
        }
        _ => return Err(ArborError::Invalid("page content does not match page type")),
    };
    let entries =
        u32::try_from(entries).map_err(|_| ArborError::Invalid("page holds more than u32 entries"))?;
    let body_len = u32::try_from(out.len() - IMAGE_HDR_LEN)
        .map_err(|_| ArborError::Invalid("page image exceeds u32"))?;
    let header = ImageHeader::new(page_type, entries, recno, body_len);
    header.encode(&mut out[..IMAGE_HDR_LEN])?;
    Ok(header)
}

fn put_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.reserve(var::encoded_len(bytes.len() as u64) + bytes.len());
    var::encode_u64(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

fn put_run(out: &mut Vec<u8>, repeat: u64, value: &[u8]) {
    var::encode_u64(repeat, out);
    put_len_prefixed(out, value);
}

fn put_addr(out: &mut Vec<u8>, addr: Option<PageAddr>) -> Result<()> {
    let addr = addr.ok_or(ArborError::Invalid("child reference was never reconciled"))?;
    out.extend_from_slice(&addr.offset.to_be_bytes());
    out.extend_from_slice(&addr.size.to_be_bytes());
    out.extend_from_slice(&addr.checksum.to_be_bytes());
    Ok(())
}

fn get_addr(cur: &mut Cursor<'_>) -> Result<PageAddr> {
    Ok(PageAddr {
        offset: cur.u64_be()?,
        size: cur.u32_be()?,
        checksum: cur.u32_be()?,
    })
}

/// A value and the number of consecutive records it covers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ColumnRun<'a> {
    /// Records covered by this run (at least 1).
    pub repeat: u64,
    /// The value stored for every record in the run.
    pub value: &'a [u8],
}

/// Parsed view over a page image read back from a store.
#[derive(Clone, Debug)]
pub struct ImageView {
    header: ImageHeader,
    image: Bytes,
}

impl ImageView {
    /// Validates the header of `image`.
    pub fn parse(image: Bytes) -> Result<Self> {
        let header = ImageHeader::decode(&image)?;
        Ok(Self { header, image })
    }

    /// Page type recorded in the header.
    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    /// Starting record number (column pages).
    pub fn recno(&self) -> RecordNo {
        self.header.recno
    }

    fn body(&self) -> Cursor<'_> {
        Cursor::new(&self.image[IMAGE_HDR_LEN..])
    }

    /// Decodes a column leaf into runs, in record-number order.
    pub fn column_runs(&self) -> Result<Vec<ColumnRun<'_>>> {
        let mut cur = self.body();
        let entries = self.header.entries as usize;
        let mut runs = Vec::with_capacity(entries);
        match self.header.page_type {
            PageType::ColFix => {
                let width = cur.take(1)?[0] as usize;
                if width == 0 {
                    return Err(ArborError::Corruption("fixed-length width is zero"));
                }
                for _ in 0..entries {
                    runs.push(ColumnRun {
                        repeat: 1,
                        value: cur.take(width)?,
                    });
                }
            }
            PageType::ColRle => {
                for _ in 0..entries {
                    let repeat = cur.varint()?;
                    if repeat == 0 {
                        return Err(ArborError::Corruption("run-length repeat is zero"));
                    }
                    runs.push(ColumnRun {
                        repeat,
                        value: cur.len_prefixed()?,
                    });
                }
            }
            PageType::ColVar => {
                for _ in 0..entries {
                    runs.push(ColumnRun {
                        repeat: 1,
                        value: cur.len_prefixed()?,
                    });
                }
            }
            _ => return Err(ArborError::Invalid("not a column leaf image")),
        }
        finish(&cur)?;
        Ok(runs)
    }

    /// Decodes a row leaf into key/value pairs, in key order.
    pub fn rows(&self) -> Result<Vec<(&[u8], &[u8])>> {
        if self.header.page_type != PageType::RowLeaf {
            return Err(ArborError::Invalid("not a row leaf image"));
        }
        let mut cur = self.body();
        let mut rows = Vec::with_capacity(self.header.entries as usize);
        for _ in 0..self.header.entries {
            let key = cur.len_prefixed()?;
            let value = cur.len_prefixed()?;
            rows.push((key, value));
        }
        finish(&cur)?;
        Ok(rows)
    }

    /// Decodes a column internal page into child references.
    pub fn column_children(&self) -> Result<Vec<ColRef>> {
        if self.header.page_type != PageType::ColInt {
            return Err(ArborError::Invalid("not a column internal image"));
        }
        let mut cur = self.body();
        let mut children = Vec::with_capacity(self.header.entries as usize);
        for _ in 0..self.header.entries {
            let recno = RecordNo(cur.varint()?);
            let addr = get_addr(&mut cur)?;
            children.push(ColRef {
                recno,
                addr: Some(addr),
            });
        }
        finish(&cur)?;
        Ok(children)
    }

    /// Decodes a row internal page into child references.
    pub fn row_children(&self) -> Result<Vec<RowRef>> {
        if self.header.page_type != PageType::RowInt {
            return Err(ArborError::Invalid("not a row internal image"));
        }
        let mut cur = self.body();
        let mut children = Vec::with_capacity(self.header.entries as usize);
        for _ in 0..self.header.entries {
            let key = cur.len_prefixed()?;
            let addr = get_addr(&mut cur)?;
            children.push(RowRef {
                key: key.into(),
                addr: Some(addr),
            });
        }
        finish(&cur)?;
        Ok(children)
    }
}

fn finish(cur: &Cursor<'_>) -> Result<()> {
    if cur.remaining() != 0 {
        return Err(ArborError::Corruption("trailing bytes after page entries"));
    }
    Ok(())
}
