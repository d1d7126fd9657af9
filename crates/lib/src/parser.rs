//! Parser for `efibootmgr -v` output.
//!
//! The output is line oriented. Header lines look like `BootOrder: 0001,0000`
//! and entry lines like
//!
//! ```text
//! Boot0001* Fedora	HD(1,GPT,1c2f...,0x800,0x12c000)/File(\EFI\fedora\shimx64.efi)
//! Boot0002  Linux	HD(1,GPT,1c2f...,0x800,0x12c000)/\vmlinuz-linux r.o.o.t.=./.d.e.v./.s.d.a.2.
//! ```
//!
//! where `*` marks an active entry. Older versions wrap the loader in
//! `File(...)`, newer ones print it directly after `/`.

use crate::entry::{BootEntry, BootNum, Listing};
use crate::error::ParseError;

/// Parse a full `efibootmgr -v` run.
///
/// Unknown lines are skipped with a warning, but at least one line has to
/// be recognized.
pub fn parse_listing(output: &str) -> Result<Listing, ParseError> {
    let mut listing = Listing::default();
    let mut recognized = false;

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            match key {
                "BootOrder" => {
                    listing.boot_order = parse_boot_order(value)?;
                    tracing::debug!("BootOrder: {:?}", listing.boot_order);
                    recognized = true;
                    continue;
                }
                "BootNext" => {
                    listing.boot_next = Some(value.parse()?);
                    recognized = true;
                    continue;
                }
                "BootCurrent" => {
                    listing.boot_current = Some(value.parse()?);
                    recognized = true;
                    continue;
                }
                "Timeout" => {
                    listing.timeout = Some(parse_timeout(line, value)?);
                    recognized = true;
                    continue;
                }
                _ => {}
            }
        }
        match parse_entry_line(line) {
            Some(entry) => {
                let entry = entry?;
                tracing::debug!("Entry: {entry:?}");
                listing.entries.push(entry);
                recognized = true;
            }
            None => tracing::warn!("line didn't match: {line:?}"),
        }
    }

    if !recognized {
        return Err(ParseError::Unrecognized(output.to_owned()));
    }

    for entry in listing.entries.iter_mut() {
        entry.next = listing.boot_next == Some(entry.num);
        entry.current = listing.boot_current == Some(entry.num);
    }
    Ok(listing)
}

fn parse_boot_order(value: &str) -> Result<Vec<BootNum>, ParseError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::parse)
        .collect()
}

fn parse_timeout(line: &str, value: &str) -> Result<u16, ParseError> {
    value
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ParseError::InvalidTimeout(line.to_owned()))
}

/// Parse one `BootXXXX` line. Returns `None` if the line is not an entry.
fn parse_entry_line(line: &str) -> Option<Result<BootEntry, ParseError>> {
    let rest = line.strip_prefix("Boot")?;
    let hex_len = rest.bytes().take_while(u8::is_ascii_hexdigit).count();
    if hex_len == 0 {
        return None;
    }
    let (num, rest) = rest.split_at(hex_len);
    let (active, rest) = if let Some(rest) = rest.strip_prefix("* ") {
        (true, rest)
    } else if let Some(rest) = rest.strip_prefix("  ") {
        (false, rest)
    } else if let Some(rest) = rest.strip_prefix('*') {
        (true, rest)
    } else {
        // Single space between number and label, or nothing at all
        (false, rest.strip_prefix(' ')?)
    };
    let num = match num.parse() {
        Ok(num) => num,
        Err(e) => return Some(Err(e)),
    };

    let (label, device_path) = split_label(rest);
    let (loader, parameters) = split_loader(device_path);
    Some(Ok(BootEntry {
        num,
        label: label.to_owned(),
        device_path: device_path.to_owned(),
        loader: loader.to_owned(),
        parameters: decode_optional_data(parameters),
        active,
        next: false,
        current: false,
    }))
}

/// The label ends at the first tab, or failing that at the first run of
/// two spaces.
fn split_label(rest: &str) -> (&str, &str) {
    if let Some((label, path)) = rest.split_once('\t') {
        (label, path.trim())
    } else if let Some((label, path)) = rest.split_once("  ") {
        (label, path.trim())
    } else {
        (rest.trim_end(), "")
    }
}

/// Extract the loader path and the raw optional data from a device path.
fn split_loader(path: &str) -> (&str, &str) {
    if let Some(start) = path.find("File(") {
        let after = &path[start + "File(".len()..];
        return match after.find(')') {
            Some(end) => (&after[..end], after[end + 1..].trim()),
            None => (after, ""),
        };
    }
    if let Some(start) = path.find("/\\") {
        let after = &path[start + 1..];
        let end = after.find(char::is_whitespace).unwrap_or(after.len());
        return (&after[..end], after[end..].trim());
    }
    // No file node (e.g. BBS or network entries), so anything after the
    // last node is optional data.
    match path.rfind(')') {
        Some(end) => ("", path[end + 1..].trim()),
        None => ("", ""),
    }
}

/// efibootmgr prints UCS-2 optional data byte by byte, replacing the
/// unprintable high bytes with `.`, so `root=` shows up as `r.o.o.t.=.`.
/// Only data in exactly that shape is decoded; anything else, such as the
/// plain text newer versions print, is returned unchanged.
pub(crate) fn decode_optional_data(data: &str) -> String {
    if let Some(rest) = data.strip_prefix("WINDOWS") {
        return format!("WINDOWS{}", decode_optional_data(rest));
    }
    let bytes = data.as_bytes();
    if !is_dotted_ucs2(bytes) {
        return data.to_owned();
    }
    bytes
        .chunks_exact(2)
        .map(|pair| char::from(pair[0]))
        .filter(|&c| c != '\0')
        .collect()
}

/// Every high byte is `.` or NUL and every low byte is ASCII.
fn is_dotted_ucs2(bytes: &[u8]) -> bool {
    if bytes.is_empty() || bytes.len() % 2 != 0 {
        return false;
    }
    bytes
        .chunks_exact(2)
        .all(|pair| pair[0].is_ascii() && matches!(pair[1], b'.' | 0))
}
