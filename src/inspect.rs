//! Archive signature inspection for streaming-readiness.
//!
//! Given the first bytes of an archive volume, decide whether its payload is
//! stored (random-access streamable) or compressed/encrypted/solid. Only the
//! RAR4 header chain is walked; RAR5 is accepted on signature alone and 7z is
//! probed by its leading coder byte.

use crate::types::FindingStatus;

/// RAR4 signature `Rar!\x1a\x07\x00`
const RAR4_SIGNATURE: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];
/// RAR5 signature `Rar!\x1a\x07\x01\x00`
const RAR5_SIGNATURE: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];
/// First two bytes of the 7z signature `7z\xbc\xaf\x27\x1c`
const SEVENZIP_MAGIC: [u8; 2] = [0x37, 0x7A];

/// RAR4 file-header block type
const RAR4_FILE_HEADER: u8 = 0x74;
/// File is continued from / into another volume or encrypted (password flag)
const RAR4_FLAG_ENCRYPTED: u16 = 0x0004;
/// File is part of a solid chain
const RAR4_FLAG_SOLID: u16 = 0x0010;
/// 64-bit pack/unpack sizes follow the fixed fields
const RAR4_FLAG_LARGE: u16 = 0x0100;
/// Filename carries a trailing unicode section after a NUL
const RAR4_FLAG_UNICODE: u16 = 0x0200;
/// Storage method byte for uncompressed entries
const RAR4_METHOD_STORED: u8 = 0x30;

/// Result of inspecting an archive prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inspection {
    /// Classification of the archive prefix
    pub status: FindingStatus,
    /// Extra detail, e.g. the offending method byte
    pub details: Option<String>,
    /// Filename of the first file entry, when the RAR4 header exposes one
    pub archived_filename: Option<String>,
}

impl Inspection {
    fn status(status: FindingStatus) -> Self {
        Self {
            status,
            details: None,
            archived_filename: None,
        }
    }
}

/// Inspect the leading bytes of an archive volume.
///
/// The buffer may be any length; truncation maps onto the
/// `*-insufficient-data` statuses rather than an error.
pub fn inspect_prefix(buf: &[u8]) -> Inspection {
    if buf.starts_with(&RAR5_SIGNATURE) {
        // RAR5 block parsing is deferred; volumes are assumed stored.
        return Inspection::status(FindingStatus::RarStored);
    }
    if buf.starts_with(&RAR4_SIGNATURE) {
        return inspect_rar4(buf);
    }
    if buf.len() >= 6 && buf[..2] == SEVENZIP_MAGIC {
        return inspect_sevenzip(buf);
    }
    Inspection::status(FindingStatus::RarHeaderNotFound)
}

/// Walk RAR4 block headers until the first file header decides the status.
fn inspect_rar4(buf: &[u8]) -> Inspection {
    let mut offset = RAR4_SIGNATURE.len();

    while offset + 7 <= buf.len() {
        let block_type = buf[offset + 2];
        let flags = u16_le(buf, offset + 3);
        let size = u16_le(buf, offset + 5) as usize;

        if size < 7 {
            return Inspection::status(FindingStatus::RarCorruptHeader);
        }
        if offset + size > buf.len() {
            return Inspection::status(FindingStatus::RarInsufficientData);
        }

        if block_type == RAR4_FILE_HEADER {
            return inspect_rar4_file_header(buf, offset, flags);
        }

        offset += size;
    }

    Inspection::status(FindingStatus::RarHeaderNotFound)
}

fn inspect_rar4_file_header(buf: &[u8], offset: usize, flags: u16) -> Inspection {
    // Fixed layout: method byte at +25, name length at +26, name after the
    // 32-byte fixed fields (shifted by 8 when 64-bit sizes are present).
    if offset + 32 > buf.len() {
        return Inspection::status(FindingStatus::RarInsufficientData);
    }
    let method = buf[offset + 25];
    let name_size = u16_le(buf, offset + 26) as usize;
    let name_offset = offset + 32 + if flags & RAR4_FLAG_LARGE != 0 { 8 } else { 0 };

    let archived_filename = buf
        .get(name_offset..name_offset + name_size)
        .map(|raw| {
            // Unicode names store "ascii\0packed-unicode"; keep the ascii part.
            let raw = if flags & RAR4_FLAG_UNICODE != 0 {
                raw.split(|&b| b == 0).next().unwrap_or(raw)
            } else {
                raw
            };
            String::from_utf8_lossy(raw).into_owned()
        })
        .filter(|name| !name.is_empty());

    let status = if flags & RAR4_FLAG_ENCRYPTED != 0 {
        FindingStatus::RarEncrypted
    } else if flags & RAR4_FLAG_SOLID != 0 {
        FindingStatus::RarSolid
    } else if method != RAR4_METHOD_STORED {
        FindingStatus::RarCompressed
    } else {
        FindingStatus::RarStored
    };

    Inspection {
        status,
        details: (status == FindingStatus::RarCompressed)
            .then(|| format!("method byte 0x{:02x}", method)),
        archived_filename,
    }
}

fn inspect_sevenzip(buf: &[u8]) -> Inspection {
    if buf.len() < 32 {
        return Inspection::status(FindingStatus::SevenzipInsufficientData);
    }
    let probe = buf[6];
    if probe == 0x00 {
        Inspection::status(FindingStatus::SevenzipStored)
    } else {
        Inspection {
            status: FindingStatus::SevenzipUnsupported,
            details: Some(format!("method byte 0x{:02x}", probe)),
            archived_filename: None,
        }
    }
}

fn u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}
