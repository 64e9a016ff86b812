// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Data size strings such as `10MB`, `1.5 GiB` or `800kbit`.

/// Parse a data size into a number of bytes.
///
/// Returns `None` when the string does not follow `<value>[ ]<prefix><suffix>`.
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    if number.is_empty()
        || number.starts_with('.')
        || number.ends_with('.')
        || number.matches('.').count() > 1
        || (number.len() > 1 && number.starts_with('0') && !number.starts_with("0."))
    {
        return None;
    }
    let value: f64 = number.parse().ok()?;
    let unit = unit.trim_start();

    let (multiplier, suffix) = split_prefix(unit)?;
    let bits = match suffix {
        "B" | "Byte" | "byte" => false,
        "b" | "bit" => true,
        _ => return None,
    };

    let bytes = value * multiplier;
    let bytes = if bits { bytes / 8.0 } else { bytes };
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return None;
    }
    Some(bytes.round() as u64)
}

fn split_prefix(unit: &str) -> Option<(f64, &str)> {
    const BINARY: [(&str, i32); 6] = [
        ("Ki", 10),
        ("Mi", 20),
        ("Gi", 30),
        ("Ti", 40),
        ("Pi", 50),
        ("Ei", 60),
    ];
    const DECIMAL: [(&str, i32); 6] = [
        ("k", 3),
        ("M", 6),
        ("G", 9),
        ("T", 12),
        ("P", 15),
        ("E", 18),
    ];

    for (prefix, exp) in BINARY {
        if let Some(rest) = unit.strip_prefix(prefix) {
            return Some((2f64.powi(exp), rest));
        }
    }
    for (prefix, exp) in DECIMAL {
        if let Some(rest) = unit.strip_prefix(prefix)
            && !rest.is_empty()
        {
            return Some((10f64.powi(exp), rest));
        }
    }
    if unit.is_empty() {
        return None;
    }
    Some((1.0, unit))
}
