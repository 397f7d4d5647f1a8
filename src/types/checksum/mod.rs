#![forbid(unsafe_code)]

/// CRC32 of a page image, salted with the offset it was written at so an
/// image read back from the wrong location never verifies.
pub fn image_crc32(offset: u64, image: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&offset.to_be_bytes());
    hasher.update(image);
    hasher.finalize()
}
