// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Charsets used to encode text values written to storage.

use std::fmt;
use std::str::FromStr;

/// Text encoding applied to textual values in storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Charset {
    /// 7-bit ASCII; unmappable characters become `?`.
    UsAscii,
    /// Latin-1; unmappable characters become `?`.
    Iso8859_1,
    /// UTF-8.
    #[default]
    Utf8,
    /// UTF-16 with a big-endian byte order mark on write.
    Utf16,
    /// UTF-16 little-endian without BOM.
    Utf16Le,
    /// UTF-16 big-endian without BOM.
    Utf16Be,
}

impl Charset {
    /// Encode text into bytes.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::UsAscii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Charset::Iso8859_1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Utf16 => {
                let mut out = vec![0xFE, 0xFF];
                out.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
                out
            }
            Charset::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Charset::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        }
    }

    /// Decode bytes into text, replacing malformed sequences.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::UsAscii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
            Charset::Iso8859_1 => bytes.iter().map(|&b| b as char).collect(),
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Utf16 => match bytes {
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                _ => decode_utf16(bytes, u16::from_be_bytes),
            },
            Charset::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Charset::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks(2).map(|pair| match pair {
        [a, b] => unit([*a, *b]),
        _ => 0xFFFD,
    });
    char::decode_utf16(units)
        .map(|r| r.unwrap_or('\u{FFFD}'))
        .collect()
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Charset::UsAscii => "US-ASCII",
            Charset::Iso8859_1 => "ISO-8859-1",
            Charset::Utf8 => "UTF-8",
            Charset::Utf16 => "UTF-16",
            Charset::Utf16Le => "UTF-16LE",
            Charset::Utf16Be => "UTF-16BE",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Charset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('_', "-").as_str() {
            "US-ASCII" | "ASCII" => Ok(Charset::UsAscii),
            "ISO-8859-1" | "LATIN1" => Ok(Charset::Iso8859_1),
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            "UTF-16" | "UTF16" => Ok(Charset::Utf16),
            "UTF-16LE" => Ok(Charset::Utf16Le),
            "UTF-16BE" => Ok(Charset::Utf16Be),
            _ => Err(format!("Unknown charset: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("utf-8".parse::<Charset>().unwrap(), Charset::Utf8);
        assert_eq!("UTF_16LE".parse::<Charset>().unwrap(), Charset::Utf16Le);
        assert_eq!("iso-8859-1".parse::<Charset>().unwrap(), Charset::Iso8859_1);
        assert!("EBCDIC".parse::<Charset>().is_err());
    }

    #[test]
    fn test_ascii_replaces_unmappable() {
        assert_eq!(Charset::UsAscii.encode("né"), b"n?".to_vec());
        assert_eq!(Charset::Iso8859_1.encode("né"), vec![b'n', 0xE9]);
        assert_eq!(Charset::Iso8859_1.decode(&[b'n', 0xE9]), "né");
    }

    #[test]
    fn test_utf16_bom_handling() {
        let encoded = Charset::Utf16.encode("42");
        assert_eq!(encoded, vec![0xFE, 0xFF, 0x00, b'4', 0x00, b'2']);
        assert_eq!(Charset::Utf16.decode(&encoded), "42");
        assert_eq!(Charset::Utf16.decode(&[0xFF, 0xFE, b'4', 0x00]), "4");
        assert_eq!(
            Charset::Utf16Le.decode(&Charset::Utf16Le.encode("héllo")),
            "héllo"
        );
    }

    #[test]
    fn test_display_roundtrips_through_from_str() {
        for charset in [
            Charset::UsAscii,
            Charset::Iso8859_1,
            Charset::Utf8,
            Charset::Utf16,
            Charset::Utf16Le,
            Charset::Utf16Be,
        ] {
            assert_eq!(charset.to_string().parse::<Charset>().unwrap(), charset);
        }
    }
}
