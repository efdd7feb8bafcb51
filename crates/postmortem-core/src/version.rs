//! Fixed file version block parsing.
//!
//! A module may carry a fixed-size version block: thirteen little-endian
//! `u32` words starting with the signature `0xFEEF04BD`. The file version
//! lives in words 2 and 3 (most- and least-significant halves), each split
//! into two 16-bit fields.
//!
//! ```text
//! word  0  signature        0xFEEF04BD
//! word  1  struct version
//! word  2  file version MS  major << 16 | minor
//! word  3  file version LS  build << 16 | revision
//! word  4  product version MS
//! ...
//! word 12  file date LS
//! ```

use std::fmt;

/// Signature every valid block starts with.
pub const FIXED_FILE_INFO_SIGNATURE: u32 = 0xFEEF_04BD;

const WORDS: usize = 13;

/// Size of a serialized block in bytes.
pub const FIXED_FILE_INFO_SIZE: usize = WORDS * 4;

/// ELF section holding a module's version block, if it carries one.
pub const VERSION_SECTION: &str = ".fixed_file_info";

/// The parsed fixed-size version block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFileInfo
{
    pub struct_version: u32,
    pub file_version_ms: u32,
    pub file_version_ls: u32,
    pub product_version_ms: u32,
    pub product_version_ls: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_ms: u32,
    pub file_date_ls: u32,
}

impl FixedFileInfo
{
    /// Parse a block.
    ///
    /// Returns `None` when the buffer is shorter than a block or the
    /// signature does not match. No other field is read in that case.
    pub fn parse(bytes: &[u8]) -> Option<Self>
    {
        let head = bytes.get(..FIXED_FILE_INFO_SIZE)?;
        let word = |index: usize| {
            let start = index * 4;
            u32::from_le_bytes([head[start], head[start + 1], head[start + 2], head[start + 3]])
        };

        if word(0) != FIXED_FILE_INFO_SIGNATURE {
            return None;
        }

        Some(Self {
            struct_version: word(1),
            file_version_ms: word(2),
            file_version_ls: word(3),
            product_version_ms: word(4),
            product_version_ls: word(5),
            file_flags_mask: word(6),
            file_flags: word(7),
            file_os: word(8),
            file_type: word(9),
            file_subtype: word(10),
            file_date_ms: word(11),
            file_date_ls: word(12),
        })
    }

    /// The four 16-bit components of the file version.
    pub fn file_version(&self) -> [u16; 4]
    {
        [
            high_word(self.file_version_ms),
            low_word(self.file_version_ms),
            high_word(self.file_version_ls),
            low_word(self.file_version_ls),
        ]
    }

    /// Serialize back into the on-disk layout.
    pub fn to_bytes(&self) -> [u8; FIXED_FILE_INFO_SIZE]
    {
        let words = [
            FIXED_FILE_INFO_SIGNATURE,
            self.struct_version,
            self.file_version_ms,
            self.file_version_ls,
            self.product_version_ms,
            self.product_version_ls,
            self.file_flags_mask,
            self.file_flags,
            self.file_os,
            self.file_type,
            self.file_subtype,
            self.file_date_ms,
            self.file_date_ls,
        ];
        let mut bytes = [0u8; FIXED_FILE_INFO_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// A block with only the file version set, for building test fixtures
    /// and synthetic modules.
    pub fn with_file_version(major: u16, minor: u16, build: u16, revision: u16) -> Self
    {
        Self {
            struct_version: 0x0001_0000,
            file_version_ms: (u32::from(major) << 16) | u32::from(minor),
            file_version_ls: (u32::from(build) << 16) | u32::from(revision),
            product_version_ms: 0,
            product_version_ls: 0,
            file_flags_mask: 0,
            file_flags: 0,
            file_os: 0,
            file_type: 0,
            file_subtype: 0,
            file_date_ms: 0,
            file_date_ls: 0,
        }
    }
}

impl fmt::Display for FixedFileInfo
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let [a, b, c, d] = self.file_version();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// Dotted version string of a raw block, or an empty string when the block
/// is missing or malformed.
pub fn format_version_block(bytes: Option<&[u8]>) -> String
{
    bytes
        .and_then(FixedFileInfo::parse)
        .map(|info| info.to_string())
        .unwrap_or_default()
}

#[allow(clippy::cast_possible_truncation)]
fn high_word(value: u32) -> u16
{
    (value >> 16) as u16
}

#[allow(clippy::cast_possible_truncation)]
fn low_word(value: u32) -> u16
{
    (value & 0xffff) as u16
}
