//! Errors surfaced by the entry repository.

use efiboot_utils::CommandError;

use crate::entry::BootNum;

/// The output of `efibootmgr` did not have the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// A boot number that is not 1 to 4 hex digits.
    #[error("Invalid boot number {0:?}")]
    InvalidBootNum(String),
    /// A `Timeout:` line without a number of seconds.
    #[error("Invalid timeout line {0:?}")]
    InvalidTimeout(String),
    /// Nothing in the output looked like a boot entry listing.
    #[error("Unrecognized efibootmgr output: {0:?}")]
    Unrecognized(String),
}

/// Errors from listing or editing boot entries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Spawning the tool failed, or it exited non-zero.
    #[error(transparent)]
    Tool(#[from] CommandError),
    /// The tool's listing could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// An edit referred to an entry that is not in the listing.
    #[error("Boot entry {0} does not exist")]
    UnknownEntry(BootNum),
    /// The same entry was named twice in a boot order.
    #[error("Boot entry {0} appears more than once in the boot order")]
    DuplicateEntry(BootNum),
    /// Creating an entry needs to know which disk and partition hold the ESP.
    #[error("The EFI System Partition is unknown; pass --disk and --part")]
    EspRequired,
    /// A new entry failed validation.
    #[error("Invalid boot entry: {0}")]
    InvalidEntry(String),
}

impl Error {
    /// The tool's stderr, when the error is a tool that exited non-zero.
    pub fn tool_stderr(&self) -> Option<&str> {
        match self {
            Error::Tool(e) => e.stderr(),
            _ => None,
        }
    }
}
