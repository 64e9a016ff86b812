// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Binary file format detection by signature, plus image dimension probing.

/// Known binary formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Portable Network Graphics.
    Png,
    /// JPEG / JFIF.
    Jpeg,
    /// TIFF, either byte order.
    Tiff,
    /// DICOM part 10 file.
    Dicom,
}

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIGNATURE: [u8; 3] = [0xFF, 0xD8, 0xFF];
const TIFF_LE_SIGNATURE: [u8; 4] = [0x49, 0x49, 0x2A, 0x00];
const TIFF_BE_SIGNATURE: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A];
const DICOM_MAGIC: [u8; 4] = *b"DICM";
const DICOM_PREAMBLE: usize = 128;

impl FileFormat {
    /// Every known format.
    pub const ALL: [FileFormat; 4] = [
        FileFormat::Png,
        FileFormat::Jpeg,
        FileFormat::Tiff,
        FileFormat::Dicom,
    ];

    /// Look a format up by its descriptor name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "png" => Some(FileFormat::Png),
            "jpeg" | "jpg" => Some(FileFormat::Jpeg),
            "tiff" | "tif" => Some(FileFormat::Tiff),
            "dicom" | "dcm" => Some(FileFormat::Dicom),
            _ => None,
        }
    }

    /// Whether `bytes` starts with this format's signature.
    pub fn check_signature(&self, bytes: &[u8]) -> bool {
        match self {
            FileFormat::Png => bytes.starts_with(&PNG_SIGNATURE),
            FileFormat::Jpeg => bytes.starts_with(&JPEG_SIGNATURE),
            FileFormat::Tiff => {
                bytes.starts_with(&TIFF_LE_SIGNATURE) || bytes.starts_with(&TIFF_BE_SIGNATURE)
            }
            FileFormat::Dicom => {
                bytes.starts_with(&DICOM_MAGIC)
                    || bytes
                        .get(DICOM_PREAMBLE..DICOM_PREAMBLE + 4)
                        .is_some_and(|magic| magic == DICOM_MAGIC)
            }
        }
    }

    /// Width and height in pixels, when they can be read from the header.
    pub fn dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        match self {
            FileFormat::Png => png_dimensions(bytes),
            FileFormat::Jpeg => jpeg_dimensions(bytes),
            FileFormat::Tiff => tiff_dimensions(bytes),
            FileFormat::Dicom => None,
        }
    }
}

/// First known format whose signature matches.
pub fn detect(bytes: &[u8]) -> Option<FileFormat> {
    FileFormat::ALL
        .into_iter()
        .find(|format| format.check_signature(bytes))
}

fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(bytes.get(at..at + 2)?.try_into().ok()?))
}

fn be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
}

fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    // 8-byte signature, 4-byte chunk length, then the IHDR chunk type.
    if bytes.get(12..16)? != b"IHDR" {
        return None;
    }
    Some((be_u32(bytes, 16)?, be_u32(bytes, 20)?))
}

fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        if marker == 0xD8 || marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            i += 2;
            continue;
        }
        let length = be_u16(bytes, i + 2)? as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && ![0xC4, 0xC8, 0xCC].contains(&marker);
        if is_sof {
            let height = be_u16(bytes, i + 5)?;
            let width = be_u16(bytes, i + 7)?;
            return Some((u32::from(width), u32::from(height)));
        }
        i += 2 + length;
    }
    None
}

fn tiff_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let little = bytes.starts_with(&TIFF_LE_SIGNATURE);
    let u16_at = |at: usize| -> Option<u16> {
        let raw: [u8; 2] = bytes.get(at..at + 2)?.try_into().ok()?;
        Some(if little {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    };
    let u32_at = |at: usize| -> Option<u32> {
        let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
        Some(if little {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    };

    let ifd = u32_at(4)? as usize;
    let count = u16_at(ifd)? as usize;
    let mut width = None;
    let mut height = None;

    for n in 0..count {
        let entry = ifd + 2 + n * 12;
        let tag = u16_at(entry)?;
        let field_type = u16_at(entry + 2)?;
        let value = match field_type {
            3 => u32::from(u16_at(entry + 8)?),
            4 => u32_at(entry + 8)?,
            _ => continue,
        };
        match tag {
            256 => width = Some(value),
            257 => height = Some(value),
            _ => {}
        }
    }

    Some((width?, height?))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_detect_signatures() {
        assert_eq!(detect(&png(1, 1)), Some(FileFormat::Png));
        assert_eq!(detect(&jpeg(1, 1)), Some(FileFormat::Jpeg));
        assert_eq!(detect(&tiff(1, 1)), Some(FileFormat::Tiff));
        assert_eq!(detect(b"DICM...."), Some(FileFormat::Dicom));
        assert_eq!(detect(b"plain text"), None);
    }

    #[test]
    fn test_dicom_magic_after_preamble() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        assert!(FileFormat::Dicom.check_signature(&bytes));
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(FileFormat::Png.dimensions(&png(640, 480)), Some((640, 480)));
        assert_eq!(FileFormat::Jpeg.dimensions(&jpeg(320, 200)), Some((320, 200)));
        assert_eq!(FileFormat::Tiff.dimensions(&tiff(1024, 768)), Some((1024, 768)));
        assert_eq!(FileFormat::Dicom.dimensions(b"DICM"), None);
    }

    #[test]
    fn test_truncated_headers() {
        assert_eq!(FileFormat::Png.dimensions(&png(1, 1)[..18]), None);
        assert_eq!(FileFormat::Tiff.dimensions(&tiff(1, 1)[..12]), None);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(FileFormat::from_name("PNG"), Some(FileFormat::Png));
        assert_eq!(FileFormat::from_name("jpg"), Some(FileFormat::Jpeg));
        assert_eq!(FileFormat::from_name("webp"), None);
    }
}
