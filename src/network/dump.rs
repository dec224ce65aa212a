//! Hex and ASCII renderings of raw bytes for diagnostics.

/// Uppercase, space-separated hex: `[0x40, 0x0A]` → `"40 0A"`.
pub fn hexstr(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// ASCII rendering aligned with [`hexstr`] columns.
///
/// Printable characters are shown as themselves, everything else as `.`.
pub fn spaced_ascii(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(' ');
        out.push(printable(byte));
    }
    out
}

/// The byte as a printable character, or `.`.
pub fn printable(byte: &u8) -> char {
    if byte.is_ascii_graphic() || *byte == b' ' { *byte as char } else { '.' }
}

/// Two-line hex + ASCII dump used in warnings and packet read errors.
pub fn dump(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "No remaining data.".to_string();
    }
    format!("Remaining data:\nHEX:   {}\nASCII: {}", hexstr(bytes), spaced_ascii(bytes))
}
