//! # Configuration file
//!
//! An optional TOML file, by default `/etc/efibootctl/config.toml`.
//! Command line flags take precedence over anything set here.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use efiboot_blockdev::{DEFAULT_ESP_MOUNT_POINTS, Esp};
use fn_error_context::context;
use serde::{Deserialize, Serialize};

use crate::manager::Efibootmgr;

/// Where the configuration is read from when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/efibootctl/config.toml";

/// The toplevel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// How to run the boot manager tool
    pub efibootmgr: Option<EfibootmgrConfig>,
    /// Where to find the ESP
    pub esp: Option<EspConfig>,
}

/// The `[efibootmgr]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EfibootmgrConfig {
    /// Path to the binary. Defaults to `efibootmgr` from `$PATH`.
    pub path: Option<Utf8PathBuf>,
    /// Command prefixed to every change, such as `pkexec` or `sudo`.
    pub privilege_helper: Option<String>,
}

/// The `[esp]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EspConfig {
    /// Mount points checked during detection, in order
    pub mount_points: Option<Vec<Utf8PathBuf>>,
    /// The disk holding the ESP; skips detection when set with `part`
    pub disk: Option<Utf8PathBuf>,
    /// The ESP partition number on `disk`
    pub part: Option<u32>,
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn parse(buf: &str) -> Result<Self> {
        let config: Config = toml::from_str(buf)?;
        // Catch a half configured ESP early rather than on first use
        config.esp()?;
        Ok(config)
    }

    /// Load the configuration file.
    ///
    /// An explicitly given `path` must exist. A missing default file
    /// means an empty configuration.
    #[context("Loading configuration")]
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Utf8Path::new(DEFAULT_CONFIG_PATH), false),
        };
        let buf = match std::fs::read_to_string(path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!("No configuration at {path}");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Reading {path}")),
        };
        tracing::debug!("Loaded configuration from {path}");
        Self::parse(&buf).with_context(|| format!("Parsing {path}"))
    }

    /// The configured ESP, when both `disk` and `part` are set.
    pub fn esp(&self) -> Result<Option<Esp>> {
        let Some(esp) = self.esp.as_ref() else {
            return Ok(None);
        };
        match (&esp.disk, esp.part) {
            (Some(disk), Some(part)) => Ok(Some(Esp {
                disk: disk.clone(),
                part,
            })),
            (None, None) => Ok(None),
            _ => bail!("esp.disk and esp.part must be set together"),
        }
    }

    /// Mount points to look for a mounted ESP on.
    pub fn mount_points(&self) -> Vec<Utf8PathBuf> {
        self.esp
            .as_ref()
            .and_then(|esp| esp.mount_points.clone())
            .unwrap_or_else(|| {
                DEFAULT_ESP_MOUNT_POINTS
                    .iter()
                    .map(|p| Utf8PathBuf::from(*p))
                    .collect()
            })
    }

    /// An [`Efibootmgr`] set up from the `[efibootmgr]` section.
    pub fn manager(&self) -> Efibootmgr {
        let mut manager = Efibootmgr::new();
        if let Some(config) = self.efibootmgr.as_ref() {
            if let Some(path) = config.path.as_ref() {
                manager = manager.with_program(path.clone());
            }
            manager = manager.with_privilege_helper(config.privilege_helper.clone());
        }
        manager
    }
}
