//! Boot entries as reported by the firmware.
//!
//! Nothing here is persisted: a [`Listing`] is rebuilt from `efibootmgr`
//! output after every change, and the values in it are never mutated.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{Error, ParseError};

/// A boot entry number, the `XXXX` in `BootXXXX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BootNum(pub u16);

impl FromStr for BootNum {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = (1..=4).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(ParseError::InvalidBootNum(s.to_owned()));
        }
        u16::from_str_radix(s, 16)
            .map(BootNum)
            .map_err(|_| ParseError::InvalidBootNum(s.to_owned()))
    }
}

impl fmt::Display for BootNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl Serialize for BootNum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One `BootXXXX` variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootEntry {
    /// Boot number
    pub num: BootNum,
    /// The label shown in the firmware boot menu
    pub label: String,
    /// Everything the tool printed after the label: the device path and
    /// any optional data. Empty when the tool printed none.
    pub device_path: String,
    /// The loader file path relative to the ESP, e.g. `\EFI\fedora\shimx64.efi`
    pub loader: String,
    /// Optional data passed to the loader (kernel command line for EFISTUB)
    pub parameters: String,
    /// Whether the firmware will consider this entry
    pub active: bool,
    /// Whether this is BootNext, the one-shot target for the next boot
    pub next: bool,
    /// Whether this is BootCurrent, the entry the running system booted from
    pub current: bool,
}

impl fmt::Display for BootEntry {
    /// Renders the entry the way `efibootmgr -v` prints it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = if self.active { '*' } else { ' ' };
        write!(f, "Boot{}{flag} {}", self.num, self.label)?;
        if !self.device_path.is_empty() {
            write!(f, "\t{}", self.device_path)?;
        }
        Ok(())
    }
}

/// Everything one `efibootmgr -v` run reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Listing {
    /// Entries in the order the tool printed them
    pub entries: Vec<BootEntry>,
    /// The `BootOrder` variable
    pub boot_order: Vec<BootNum>,
    /// The `BootNext` variable, if set
    pub boot_next: Option<BootNum>,
    /// The `BootCurrent` variable, if reported
    pub boot_current: Option<BootNum>,
    /// Boot manager timeout in seconds, if reported
    pub timeout: Option<u16>,
}

impl Listing {
    /// Look up an entry by number.
    pub fn get(&self, num: BootNum) -> Option<&BootEntry> {
        self.entries.iter().find(|e| e.num == num)
    }

    /// Entries in boot priority order.
    ///
    /// Numbers in `BootOrder` without a matching entry are skipped, and
    /// entries missing from `BootOrder` are appended in listing order.
    pub fn ordered_entries(&self) -> Vec<&BootEntry> {
        let mut ordered = Vec::with_capacity(self.entries.len());
        for &num in &self.boot_order {
            match self.get(num) {
                Some(entry) if !ordered.iter().any(|e: &&BootEntry| e.num == num) => {
                    ordered.push(entry)
                }
                Some(_) => tracing::warn!("{num} appears more than once in BootOrder"),
                None => tracing::warn!("{num} is in BootOrder, but it's not in the list"),
            }
        }
        for entry in &self.entries {
            if !self.boot_order.contains(&entry.num) {
                tracing::warn!("{} is not in BootOrder, appending to the list", entry.num);
                ordered.push(entry);
            }
        }
        ordered
    }
}

impl fmt::Display for Listing {
    /// Renders the listing the way `efibootmgr -v` prints it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(next) = self.boot_next {
            writeln!(f, "BootNext: {next}")?;
        }
        if let Some(current) = self.boot_current {
            writeln!(f, "BootCurrent: {current}")?;
        }
        if let Some(timeout) = self.timeout {
            writeln!(f, "Timeout: {timeout} seconds")?;
        }
        let order: Vec<String> = self.boot_order.iter().map(ToString::to_string).collect();
        writeln!(f, "BootOrder: {}", order.join(","))?;
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// A boot entry to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Label for the firmware boot menu; must not be empty
    pub label: String,
    /// Loader path relative to the ESP, like `\EFI\Boot\bootx64.efi`
    pub loader: String,
    /// Optional arguments for the loader
    pub parameters: Option<String>,
}

impl NewEntry {
    /// Validate and build a new entry. Empty parameters are treated as none.
    pub fn new(
        label: impl Into<String>,
        loader: impl Into<String>,
        parameters: Option<String>,
    ) -> Result<Self, Error> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(Error::InvalidEntry("the label must not be empty".into()));
        }
        let loader = loader.into();
        if loader.trim().is_empty() {
            return Err(Error::InvalidEntry("the loader path must not be empty".into()));
        }
        let parameters = parameters.filter(|p| !p.is_empty());
        Ok(Self {
            label,
            loader,
            parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(num: u16, active: bool) -> BootEntry {
        BootEntry {
            num: BootNum(num),
            label: format!("Entry {num}"),
            device_path: String::new(),
            loader: String::new(),
            parameters: String::new(),
            active,
            next: false,
            current: false,
        }
    }

    #[test]
    fn test_bootnum() {
        assert_eq!("0001".parse::<BootNum>().unwrap(), BootNum(1));
        assert_eq!("000a".parse::<BootNum>().unwrap(), BootNum(10));
        assert_eq!("FFFF".parse::<BootNum>().unwrap(), BootNum(0xffff));
        assert_eq!("2".parse::<BootNum>().unwrap(), BootNum(2));
        assert_eq!(BootNum(0x2a).to_string(), "002A");
        for invalid in ["", "00001", "xyz", "-1", "+1", " 1"] {
            assert!(invalid.parse::<BootNum>().is_err(), "{invalid}");
        }
    }

    #[test]
    fn test_ordered_entries() {
        let listing = Listing {
            entries: vec![entry(1, true), entry(2, true), entry(3, false)],
            boot_order: vec![BootNum(3), BootNum(7), BootNum(1)],
            ..Default::default()
        };
        let nums: Vec<_> = listing.ordered_entries().iter().map(|e| e.num).collect();
        assert_eq!(nums, [BootNum(3), BootNum(1), BootNum(2)]);
    }

    #[test]
    fn test_ordered_entries_duplicates() {
        let listing = Listing {
            entries: vec![entry(1, true), entry(2, true)],
            boot_order: vec![BootNum(2), BootNum(2), BootNum(1)],
            ..Default::default()
        };
        let nums: Vec<_> = listing.ordered_entries().iter().map(|e| e.num).collect();
        assert_eq!(nums, [BootNum(2), BootNum(1)]);
    }

    #[test]
    fn test_display() {
        let mut e = entry(1, true);
        e.device_path = r"HD(1,GPT,abc)/File(\EFI\boot\bootx64.efi)".into();
        assert_eq!(
            e.to_string(),
            "Boot0001* Entry 1\tHD(1,GPT,abc)/File(\\EFI\\boot\\bootx64.efi)"
        );
        assert_eq!(entry(2, false).to_string(), "Boot0002  Entry 2");
    }

    #[test]
    fn test_new_entry() {
        let e = NewEntry::new("Linux", r"\vmlinuz", Some(String::new())).unwrap();
        assert_eq!(e.parameters, None);
        assert!(matches!(
            NewEntry::new("  ", r"\vmlinuz", None),
            Err(Error::InvalidEntry(_))
        ));
        assert!(matches!(
            NewEntry::new("Linux", "", None),
            Err(Error::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_entry_json() {
        let v = serde_json::to_value(entry(0x1f, true)).unwrap();
        assert_eq!(v["num"], "001F");
        assert_eq!(v["device-path"], "");
        assert_eq!(v["active"], true);
    }
}
