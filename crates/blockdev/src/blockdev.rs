//! Locating the EFI System Partition.
//!
//! Detection is a best-effort guess: first we look for a `vfat` filesystem
//! mounted at one of the usual ESP mount points, then we scan the partition
//! table for exactly one partition with the ESP type. Anything else is
//! reported as [`Detection::Ambiguous`] and the caller has to ask for the
//! disk and partition explicitly.

use std::process::Command;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use efiboot_utils::{CommandError, CommandRunExt};
use fn_error_context::context;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The GPT partition type GUID of an EFI System Partition.
pub const ESP_GPT_TYPE: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
/// The MBR partition type of an EFI System Partition.
pub const ESP_MBR_TYPE: &str = "EF";
/// Where an ESP is usually mounted, in the order we look.
pub const DEFAULT_ESP_MOUNT_POINTS: &[&str] = &["/efi", "/boot/efi", "/boot"];

const ESP_FSTYPE: &str = "vfat";

/// A disk and partition number, as passed to `efibootmgr --disk --part`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Esp {
    /// The whole-disk block device, e.g. `/dev/nvme0n1`
    pub disk: Utf8PathBuf,
    /// The 1-based partition number on that disk
    pub part: u32,
}

impl std::fmt::Display for Esp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "disk {} part {}", self.disk, self.part)
    }
}

/// The outcome of ESP auto-detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum Detection {
    /// Exactly one ESP was found.
    Found(Esp),
    /// Zero or several candidates; the user must pick one with `--disk`/`--part`.
    Ambiguous {
        /// Partition device nodes that looked like an ESP
        candidates: Vec<String>,
    },
}

fn device_regex() -> &'static Regex {
    static DEVICE_RE: OnceLock<Regex> = OnceLock::new();
    DEVICE_RE.get_or_init(|| Regex::new(r"^([a-z/]+[0-9a-z]*?)p?([0-9]+)$").unwrap())
}

/// Split a partition device node into its disk and partition number.
///
/// `/dev/sda1` becomes `/dev/sda` and `1`, `/dev/nvme0n1p2` becomes
/// `/dev/nvme0n1` and `2`.
pub fn split_device(device: &str) -> Result<Esp> {
    let caps = device_regex()
        .captures(device)
        .ok_or_else(|| anyhow!("Could not match device {device}"))?;
    let disk = Utf8PathBuf::from(&caps[1]);
    let part = caps[2]
        .parse()
        .with_context(|| format!("Parsing partition number of {device}"))?;
    tracing::debug!("Device path {device} split into {disk} and {part}");
    Ok(Esp { disk, part })
}

/// One filesystem as reported by `findmnt --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Filesystem {
    /// Mount source, e.g. `/dev/sda1` or `systemd-1` for an automount
    pub source: String,
    /// Filesystem type, e.g. `vfat` or `autofs`
    pub fstype: String,
}

#[derive(Deserialize)]
struct Findmnt {
    filesystems: Vec<Filesystem>,
}

/// Pick the ESP out of what is mounted at a single mount point.
pub fn esp_from_filesystems(filesystems: &[Filesystem]) -> Option<Esp> {
    let fs = filesystems.iter().find(|fs| fs.fstype == ESP_FSTYPE)?;
    // Bind mounts show up as `/dev/sda1[/subdir]`
    let source = fs
        .source
        .split_once('[')
        .map_or(fs.source.as_str(), |(dev, _)| dev);
    match split_device(source) {
        Ok(esp) => Some(esp),
        Err(e) => {
            tracing::warn!("Ignoring vfat mount from {}: {e}", fs.source);
            None
        }
    }
}

/// One block device as reported by `lsblk --json --list`.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    /// Device node path
    pub name: String,
    /// Partition type GUID (GPT) or type code (MBR); unset for whole disks
    pub parttype: Option<String>,
    /// Filesystem type, if one was identified
    pub fstype: Option<String>,
}

impl Device {
    /// Whether this looks like an EFI System Partition.
    pub fn is_esp(&self) -> bool {
        let fat = self.fstype.as_deref() == Some(ESP_FSTYPE);
        fat && self.parttype.as_deref().is_some_and(is_esp_parttype)
    }
}

fn is_esp_parttype(parttype: &str) -> bool {
    let parttype = parttype.trim();
    let parttype = parttype
        .strip_prefix("0x")
        .or_else(|| parttype.strip_prefix("0X"))
        .unwrap_or(parttype);
    parttype.eq_ignore_ascii_case(ESP_GPT_TYPE) || parttype.eq_ignore_ascii_case(ESP_MBR_TYPE)
}

#[derive(Deserialize)]
struct Lsblk {
    blockdevices: Vec<Device>,
}

fn parse_lsblk(out: &str) -> Result<Vec<Device>> {
    let parsed: Lsblk = serde_json::from_str(out).context("Parsing lsblk output")?;
    Ok(parsed.blockdevices)
}

/// Decide on the ESP from the partition table alone.
pub fn detection_from_devices(devices: &[Device]) -> Detection {
    let candidates: Vec<String> = devices
        .iter()
        .filter(|d| d.is_esp())
        .map(|d| d.name.clone())
        .collect();
    if let [single] = candidates.as_slice() {
        match split_device(single) {
            Ok(esp) => return Detection::Found(esp),
            Err(e) => tracing::warn!("{e}"),
        }
    }
    Detection::Ambiguous { candidates }
}

/// Runs the tools ESP detection relies on.
#[derive(Debug, Clone)]
pub struct EspLocator {
    findmnt: Utf8PathBuf,
    lsblk: Utf8PathBuf,
}

impl Default for EspLocator {
    fn default() -> Self {
        Self {
            findmnt: "findmnt".into(),
            lsblk: "lsblk".into(),
        }
    }
}

impl EspLocator {
    /// Use `findmnt` and `lsblk` from `$PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a different `findmnt` binary.
    pub fn with_findmnt(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.findmnt = path.into();
        self
    }

    /// Run a different `lsblk` binary.
    pub fn with_lsblk(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.lsblk = path.into();
        self
    }

    /// Run `findmnt` on a mount point. Returns `None` if nothing is mounted there.
    #[context("Inspecting mount point {mountpoint}")]
    pub fn findmnt(&self, mountpoint: &Utf8Path) -> Result<Option<Vec<Filesystem>>> {
        let out = Command::new(&self.findmnt)
            .args(["--json", "--output", "SOURCE,FSTYPE", "--mountpoint"])
            .arg(mountpoint)
            .log_debug()
            .run_get_string();
        let out = match out {
            Ok(out) => out,
            // findmnt exits 1 when the mount point is not found
            Err(CommandError::Failed { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let parsed: Findmnt = serde_json::from_str(&out).context("Parsing findmnt output")?;
        Ok(Some(parsed.filesystems))
    }

    /// List every block device on the system, flattened.
    #[context("Listing block devices")]
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        let out = Command::new(&self.lsblk)
            .args([
                "--json",
                "--list",
                "--paths",
                "--output",
                "NAME,PARTTYPE,FSTYPE",
            ])
            .log_debug()
            .run_get_string()?;
        parse_lsblk(&out)
    }

    /// Guess the ESP, trying the given mount points first and then the
    /// partition table. Never fails; problems are logged and reported as
    /// [`Detection::Ambiguous`].
    pub fn detect<P: AsRef<Utf8Path>>(&self, mount_points: &[P]) -> Detection {
        for mountpoint in mount_points {
            let mountpoint = mountpoint.as_ref();
            match self.findmnt(mountpoint) {
                Ok(Some(filesystems)) => {
                    if let Some(esp) = esp_from_filesystems(&filesystems) {
                        tracing::info!("Detected ESP mounted at {mountpoint}: {esp}");
                        return Detection::Found(esp);
                    }
                }
                Ok(None) => tracing::debug!("Nothing mounted at {mountpoint}"),
                Err(e) => tracing::debug!("{e:#}"),
            }
        }

        let detection = match self.list_devices() {
            Ok(devices) => detection_from_devices(&devices),
            Err(e) => {
                tracing::warn!("{e:#}");
                Detection::Ambiguous { candidates: vec![] }
            }
        };
        match &detection {
            Detection::Found(esp) => tracing::info!("Detected ESP from partition table: {esp}"),
            Detection::Ambiguous { candidates } if candidates.is_empty() => {
                tracing::warn!("Can't auto-detect ESP: no EFI System Partition found")
            }
            Detection::Ambiguous { candidates } => tracing::warn!(
                "More than one EFI System Partition detected: {}",
                candidates.join(", ")
            ),
        }
        detection
    }
}

/// [`EspLocator::detect`] with the system tools.
pub fn detect_esp<P: AsRef<Utf8Path>>(mount_points: &[P]) -> Detection {
    EspLocator::new().detect(mount_points)
}
