//! Shared on-disk page metadata used by the reconciler and the read path.

use core::convert::{TryFrom, TryInto};

use super::{ArborError, RecordNo, Result};

/// Magic bytes opening every page image.
pub const PAGE_MAGIC: [u8; 4] = *b"ARBR";
/// Image format version written by this crate.
pub const PAGE_FORMAT_VERSION: u16 = 1;
/// Encoded length of [`ImageHeader`].
pub const IMAGE_HDR_LEN: usize = 24;

pub mod header {
    //! Byte offsets for fixed header fields.
    use core::ops::Range;

    /// Magic bytes.
    pub const MAGIC: Range<usize> = 0..4;
    /// Format version, big-endian u16.
    pub const FORMAT_VERSION: Range<usize> = 4..6;
    /// Page type tag.
    pub const PAGE_TYPE: usize = 6;
    /// Always zero.
    pub const RESERVED: usize = 7;
    /// Entry count, big-endian u32.
    pub const ENTRIES: Range<usize> = 8..12;
    /// Starting record number, big-endian u64.
    pub const RECNO: Range<usize> = 12..20;
    /// Body length in bytes, big-endian u32.
    pub const BODY_LEN: Range<usize> = 20..24;
}

/// Every page type the tree knows how to hold in memory and on disk.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PageType {
    /// Column-store leaf of fixed-width values.
    ColFix = 1,
    /// Column-store leaf of run-length encoded values.
    ColRle = 2,
    /// Column-store leaf of variable-length values.
    ColVar = 3,
    /// Row-store leaf of variable-length key/value pairs.
    RowLeaf = 4,
    /// Column-store internal page keyed by starting record number.
    ColInt = 5,
    /// Row-store internal page keyed by each child's first key.
    RowInt = 6,
}

impl PageType {
    /// Tag stored in the image header.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for every type except the internal ones.
    pub const fn is_leaf(self) -> bool {
        !matches!(self, PageType::ColInt | PageType::RowInt)
    }

    /// True for column-store leaf and internal types.
    pub const fn is_column(self) -> bool {
        !matches!(self, PageType::RowLeaf | PageType::RowInt)
    }

    /// The internal page type that parents leaves of this type.
    pub const fn internal(self) -> PageType {
        if self.is_column() {
            PageType::ColInt
        } else {
            PageType::RowInt
        }
    }

    /// Short name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            PageType::ColFix => "col-fix",
            PageType::ColRle => "col-rle",
            PageType::ColVar => "col-var",
            PageType::RowLeaf => "row-leaf",
            PageType::ColInt => "col-int",
            PageType::RowInt => "row-int",
        }
    }
}

impl TryFrom<u8> for PageType {
    type Error = ArborError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageType::ColFix),
            2 => Ok(PageType::ColRle),
            3 => Ok(PageType::ColVar),
            4 => Ok(PageType::RowLeaf),
            5 => Ok(PageType::ColInt),
            6 => Ok(PageType::RowInt),
            _ => Err(ArborError::Corruption("unknown page type")),
        }
    }
}

/// Fixed header written in front of every page image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageHeader {
    /// Format version the image was written with.
    pub format_version: u16,
    /// Type of the page the body encodes.
    pub page_type: PageType,
    /// Number of entries (runs for run-length pages) in the body.
    pub entries: u32,
    /// Starting record number; zero for row-store pages.
    pub recno: RecordNo,
    /// Length of the body following the header.
    pub body_len: u32,
}

impl ImageHeader {
    /// Header for the current format version.
    pub fn new(page_type: PageType, entries: u32, recno: RecordNo, body_len: u32) -> Self {
        Self {
            format_version: PAGE_FORMAT_VERSION,
            page_type,
            entries,
            recno,
            body_len,
        }
    }

    /// Writes the header into the first [`IMAGE_HDR_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < IMAGE_HDR_LEN {
            return Err(ArborError::Invalid("image header buffer too small"));
        }
        let hdr = &mut dst[..IMAGE_HDR_LEN];
        hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
        hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
        hdr[header::PAGE_TYPE] = self.page_type.as_u8();
        hdr[header::RESERVED] = 0;
        hdr[header::ENTRIES].copy_from_slice(&self.entries.to_be_bytes());
        hdr[header::RECNO].copy_from_slice(&self.recno.0.to_be_bytes());
        hdr[header::BODY_LEN].copy_from_slice(&self.body_len.to_be_bytes());
        Ok(())
    }

    /// Parses and validates a header from the front of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < IMAGE_HDR_LEN {
            return Err(ArborError::Corruption("image header truncated"));
        }
        let hdr = &src[..IMAGE_HDR_LEN];
        if hdr[header::MAGIC] != PAGE_MAGIC {
            return Err(ArborError::Corruption("invalid page magic"));
        }
        let format_version = u16::from_be_bytes(be_array(&hdr[header::FORMAT_VERSION])?);
        if format_version != PAGE_FORMAT_VERSION {
            return Err(ArborError::Corruption("unsupported page format version"));
        }
        if hdr[header::RESERVED] != 0 {
            return Err(ArborError::Corruption("image header reserved byte not zero"));
        }
        let page_type = PageType::try_from(hdr[header::PAGE_TYPE])?;
        let entries = u32::from_be_bytes(be_array(&hdr[header::ENTRIES])?);
        let recno = RecordNo(u64::from_be_bytes(be_array(&hdr[header::RECNO])?));
        let body_len = u32::from_be_bytes(be_array(&hdr[header::BODY_LEN])?);
        if src.len() - IMAGE_HDR_LEN != body_len as usize {
            return Err(ArborError::Corruption("image body length mismatch"));
        }
        Ok(Self {
            format_version,
            page_type,
            entries,
            recno,
            body_len,
        })
    }
}

fn be_array<const N: usize>(src: &[u8]) -> Result<[u8; N]> {
    src.try_into()
        .map_err(|_| ArborError::Corruption("image header field truncated"))
}
