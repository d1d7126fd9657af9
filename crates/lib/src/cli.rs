//! # efibootctl command line
//!
//! Command line tool to show and edit UEFI boot entries.

use std::ffi::OsString;
use std::io::Write;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use comfy_table::{Table, presets::NOTHING};
use efiboot_blockdev::{Detection, Esp, detect_esp};
use fn_error_context::context;

use crate::config::Config;
use crate::entry::{BootEntry, BootNum, Listing, NewEntry};
use crate::error::Error;
use crate::manager::BootManager;
use crate::session::{Direction, EditSession};

/// Show and edit UEFI boot entries through efibootmgr.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "efibootctl", version)]
pub(crate) struct Opt {
    /// The disk containing the EFI System Partition.
    #[clap(long, global = true)]
    pub(crate) disk: Option<Utf8PathBuf>,

    /// The partition number of the EFI System Partition on `--disk`.
    #[clap(long, global = true)]
    pub(crate) part: Option<u32>,

    /// Configuration file; defaults to /etc/efibootctl/config.toml.
    #[clap(long, global = true)]
    pub(crate) config: Option<Utf8PathBuf>,

    /// Print the efibootmgr commands instead of running them.
    #[clap(long, global = true)]
    pub(crate) dry_run: bool,

    #[clap(subcommand)]
    pub(crate) cmd: Cmd,
}

/// Subcommands.
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub(crate) enum Cmd {
    /// Show boot entries in boot order.
    List {
        /// Output JSON instead of a table.
        #[clap(long)]
        json: bool,
    },
    /// Put the given entries first in the boot order.
    Order {
        /// Boot numbers, highest priority first.
        #[clap(required = true)]
        entries: Vec<BootNum>,
    },
    /// Move an entry one place up or down in the boot order.
    Move {
        /// Boot number
        entry: BootNum,
        /// Which way to move it
        #[clap(value_enum)]
        direction: Direction,
    },
    /// Mark entries active.
    Enable {
        /// Boot numbers
        #[clap(required = true)]
        entries: Vec<BootNum>,
    },
    /// Mark entries inactive; the firmware will skip them.
    Disable {
        /// Boot numbers
        #[clap(required = true)]
        entries: Vec<BootNum>,
    },
    /// Delete entries.
    Delete {
        /// Boot numbers
        #[clap(required = true)]
        entries: Vec<BootNum>,
    },
    /// Create an entry for a loader on the EFI System Partition.
    ///
    /// Without `--disk` and `--part` the partition is detected.
    Create {
        /// Label for the firmware boot menu.
        #[clap(long)]
        label: String,

        /// Loader path relative to the ESP, e.g. `\EFI\fedora\shimx64.efi`.
        #[clap(long)]
        loader: String,

        /// Arguments passed to the loader, such as a kernel command line.
        #[clap(long)]
        parameters: Option<String>,
    },
    /// Boot an entry once on the next restart.
    Next {
        /// Boot number
        #[clap(required_unless_present = "clear")]
        entry: Option<BootNum>,

        /// Remove a pending next boot instead.
        #[clap(long, conflicts_with = "entry")]
        clear: bool,
    },
    /// Set the boot menu timeout.
    Timeout {
        /// Timeout in seconds
        seconds: u16,
    },
    /// Show which partition looks like the EFI System Partition.
    DetectEsp {
        /// Output JSON.
        #[clap(long)]
        json: bool,
    },
}

/// Parse the provided arguments and execute.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

fn run_from_opt(opt: Opt) -> Result<()> {
    let config = Config::load(opt.config.as_deref())?;
    let esp = explicit_esp(&opt, &config)?;
    let manager = config.manager().with_esp(esp.clone());
    let dry_run = opt.dry_run;
    let out = &mut std::io::stdout().lock();
    match opt.cmd {
        Cmd::List { json } => {
            let listing = manager.list()?;
            print_listing(&listing, json, out)
        }
        Cmd::Order { entries } => edit(&manager, dry_run, out, |s| s.set_order(&entries)),
        Cmd::Move { entry, direction } => {
            edit(&manager, dry_run, out, |s| s.move_entry(entry, direction))
        }
        Cmd::Enable { entries } => edit(&manager, dry_run, out, |s| {
            unique(entries).into_iter().try_for_each(|n| s.set_active(n, true))
        }),
        Cmd::Disable { entries } => edit(&manager, dry_run, out, |s| {
            unique(entries).into_iter().try_for_each(|n| s.set_active(n, false))
        }),
        Cmd::Delete { entries } => edit(&manager, dry_run, out, |s| {
            unique(entries).into_iter().try_for_each(|n| s.remove(n))
        }),
        Cmd::Create {
            label,
            loader,
            parameters,
        } => {
            let new = NewEntry::new(label, loader, parameters)?;
            let esp = required_esp(esp, &config)?;
            let manager = manager.with_esp(Some(esp));
            edit(&manager, dry_run, out, |s| {
                s.add(new);
                Ok(())
            })
        }
        Cmd::Next { entry, clear } => {
            edit(&manager, dry_run, out, |s| s.set_next(entry.filter(|_| !clear)))
        }
        Cmd::Timeout { seconds } => edit(&manager, dry_run, out, |s| {
            s.set_timeout(seconds);
            Ok(())
        }),
        Cmd::DetectEsp { json } => {
            let detection = detect_esp(&config.mount_points());
            print_detection(&detection, json, out)
        }
    }
}

/// The ESP from `--disk`/`--part`, or else from the configuration.
fn explicit_esp(opt: &Opt, config: &Config) -> Result<Option<Esp>> {
    match (&opt.disk, opt.part) {
        (Some(disk), Some(part)) => Ok(Some(Esp {
            disk: disk.clone(),
            part,
        })),
        (None, None) => config.esp(),
        _ => anyhow::bail!("--disk and --part must be given together"),
    }
}

/// The ESP given explicitly, or a unique detected one.
fn required_esp(explicit: Option<Esp>, config: &Config) -> Result<Esp> {
    if let Some(esp) = explicit {
        return Ok(esp);
    }
    match detect_esp(&config.mount_points()) {
        Detection::Found(esp) => {
            tracing::info!("Using detected ESP: {esp}");
            Ok(esp)
        }
        Detection::Ambiguous { candidates } if candidates.is_empty() => {
            Err(Error::EspRequired).context("No EFI System Partition found")
        }
        Detection::Ambiguous { candidates } => Err(Error::EspRequired).with_context(|| {
            format!(
                "Found several EFI System Partitions: {}",
                candidates.join(", ")
            )
        }),
    }
}

/// Drop repeated boot numbers, keeping the first occurrence.
fn unique(entries: Vec<BootNum>) -> Vec<BootNum> {
    let mut seen = Vec::with_capacity(entries.len());
    for entry in entries {
        if !seen.contains(&entry) {
            seen.push(entry);
        }
    }
    seen
}

/// Stage changes against the current listing and commit them together.
///
/// Each invocation makes one kind of change, possibly to several entries.
fn edit<F>(manager: &dyn BootManager, dry_run: bool, out: &mut dyn Write, f: F) -> Result<()>
where
    F: FnOnce(&mut EditSession) -> Result<(), Error>,
{
    let mut session = EditSession::new(manager.list()?);
    f(&mut session)?;
    commit_session(manager, session, dry_run, out)
}

#[context("Committing changes")]
fn commit_session(
    manager: &dyn BootManager,
    session: EditSession,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let ops = session.operations();
    if ops.is_empty() {
        writeln!(out, "No changes")?;
        return Ok(());
    }
    writeln!(out, "The following commands will be run:")?;
    for op in &ops {
        writeln!(out, "  {}", manager.describe(op))?;
    }
    if dry_run {
        return Ok(());
    }
    let listing = session.commit(manager)?;
    writeln!(out)?;
    print_listing(&listing, false, out)
}

fn yes_no(v: bool) -> &'static str {
    if v { "yes" } else { "no" }
}

fn notes(entry: &BootEntry) -> String {
    let mut notes = Vec::new();
    if entry.current {
        notes.push("current");
    }
    if entry.next {
        notes.push("next");
    }
    notes.join(", ")
}

fn print_listing(listing: &Listing, json: bool, out: &mut dyn Write) -> Result<()> {
    let entries: Vec<&BootEntry> = listing.ordered_entries();
    if json {
        // Entries in boot order rather than the order efibootmgr printed
        let ordered = Listing {
            entries: entries.into_iter().cloned().collect(),
            ..listing.clone()
        };
        serde_json::to_writer_pretty(&mut *out, &ordered)?;
        writeln!(out)?;
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
        .set_header(["NUM", "ACTIVE", "LABEL", "LOADER", "PARAMETERS", "NOTE"]);
    for entry in entries {
        table.add_row([
            entry.num.to_string(),
            yes_no(entry.active).to_owned(),
            entry.label.clone(),
            entry.loader.clone(),
            entry.parameters.clone(),
            notes(entry),
        ]);
    }
    writeln!(out, "{table}")?;
    if let Some(timeout) = listing.timeout {
        writeln!(out, "Timeout: {timeout} seconds")?;
    }
    Ok(())
}

fn print_detection(detection: &Detection, json: bool, out: &mut dyn Write) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, detection)?;
        writeln!(out)?;
        return Ok(());
    }
    match detection {
        Detection::Found(esp) => writeln!(out, "{esp}")?,
        Detection::Ambiguous { candidates } if candidates.is_empty() => {
            writeln!(out, "No EFI System Partition found; use --disk and --part")?
        }
        Detection::Ambiguous { candidates } => {
            writeln!(
                out,
                "Several EFI System Partitions found; use --disk and --part:"
            )?;
            for candidate in candidates {
                writeln!(out, "  {candidate}")?;
            }
        }
    }
    Ok(())
}
