//! The entry repository: a narrow interface over the boot-management tool.
//!
//! Each [`BootManager`] method is exactly one tool invocation. There is no
//! transaction around several of them; the firmware is the only source of
//! truth and a fresh [`BootManager::list`] shows whatever state was reached.

use std::process::Command;

use camino::Utf8PathBuf;
use efiboot_blockdev::Esp;
use efiboot_utils::{CommandRunExt, shell_join};

use crate::entry::{BootNum, Listing, NewEntry};
use crate::error::Error;
use crate::parser::parse_listing;

/// A single change to the firmware boot configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Delete a boot entry
    Delete(BootNum),
    /// Create a boot entry
    Create(NewEntry),
    /// Replace `BootOrder`
    BootOrder(Vec<BootNum>),
    /// Set `BootNext`
    BootNext(BootNum),
    /// Remove `BootNext`
    DeleteBootNext,
    /// Mark an entry active
    Active(BootNum),
    /// Mark an entry inactive
    Inactive(BootNum),
    /// Set the boot manager timeout in seconds
    Timeout(u16),
}

impl Operation {
    /// The `efibootmgr` arguments for this operation, without ESP flags.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            Operation::Delete(num) => {
                args.extend(["--delete-bootnum".into(), "--bootnum".into(), num.to_string()])
            }
            Operation::Create(entry) => {
                args.extend([
                    "--create".into(),
                    "--label".into(),
                    entry.label.clone(),
                    "--loader".into(),
                    entry.loader.clone(),
                ]);
                if let Some(parameters) = &entry.parameters {
                    args.extend(["--unicode".into(), parameters.clone()]);
                }
            }
            Operation::BootOrder(order) => {
                let order: Vec<String> = order.iter().map(ToString::to_string).collect();
                args.extend(["--bootorder".into(), order.join(",")]);
            }
            Operation::BootNext(num) => args.extend(["--bootnext".into(), num.to_string()]),
            Operation::DeleteBootNext => args.push("--delete-bootnext".into()),
            Operation::Active(num) => {
                args.extend(["--bootnum".into(), num.to_string(), "--active".into()])
            }
            Operation::Inactive(num) => {
                args.extend(["--bootnum".into(), num.to_string(), "--inactive".into()])
            }
            Operation::Timeout(seconds) => args.extend(["--timeout".into(), seconds.to_string()]),
        }
        args
    }

    /// Perform this operation through the matching [`BootManager`] method.
    pub fn apply(&self, manager: &dyn BootManager) -> Result<(), Error> {
        match self {
            Operation::Delete(num) => manager.delete(*num),
            Operation::Create(entry) => manager.create(entry),
            Operation::BootOrder(order) => manager.set_boot_order(order),
            Operation::BootNext(num) => manager.set_boot_next(Some(*num)),
            Operation::DeleteBootNext => manager.set_boot_next(None),
            Operation::Active(num) => manager.set_active(*num, true),
            Operation::Inactive(num) => manager.set_active(*num, false),
            Operation::Timeout(seconds) => manager.set_timeout(*seconds),
        }
    }
}

/// Reading and changing firmware boot entries.
pub trait BootManager {
    /// The current entries and boot variables.
    fn list(&self) -> Result<Listing, Error>;
    /// Replace `BootOrder`.
    fn set_boot_order(&self, order: &[BootNum]) -> Result<(), Error>;
    /// Enable or disable an entry.
    fn set_active(&self, num: BootNum, active: bool) -> Result<(), Error>;
    /// Delete an entry.
    fn delete(&self, num: BootNum) -> Result<(), Error>;
    /// Create an entry on the ESP.
    fn create(&self, entry: &NewEntry) -> Result<(), Error>;
    /// Set or clear the one-shot `BootNext`.
    fn set_boot_next(&self, num: Option<BootNum>) -> Result<(), Error>;
    /// Set the boot manager timeout.
    fn set_timeout(&self, seconds: u16) -> Result<(), Error>;

    /// A human readable form of what `op` will run.
    fn describe(&self, op: &Operation) -> String {
        shell_join(std::iter::once("efibootmgr".to_owned()).chain(op.args()))
    }
}

/// [`BootManager`] backed by the `efibootmgr` command.
#[derive(Debug, Clone)]
pub struct Efibootmgr {
    program: Utf8PathBuf,
    privilege_helper: Option<String>,
    esp: Option<Esp>,
}

impl Default for Efibootmgr {
    fn default() -> Self {
        Self {
            program: "efibootmgr".into(),
            privilege_helper: None,
            esp: None,
        }
    }
}

impl Efibootmgr {
    /// Use `efibootmgr` from `$PATH`, unprivileged, with no ESP.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a specific binary instead of `efibootmgr` from `$PATH`.
    pub fn with_program(mut self, program: impl Into<Utf8PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Prefix changes (but not listing) with a helper such as `pkexec`.
    pub fn with_privilege_helper(mut self, helper: Option<String>) -> Self {
        self.privilege_helper = helper;
        self
    }

    /// Pass `--disk` and `--part` on every change.
    pub fn with_esp(mut self, esp: Option<Esp>) -> Self {
        self.esp = esp;
        self
    }

    /// The command every change runs: helper, program and ESP flags.
    fn command(&self) -> Command {
        let mut cmd = match &self.privilege_helper {
            Some(helper) => {
                let mut cmd = Command::new(helper);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        if let Some(esp) = &self.esp {
            cmd.arg("--disk").arg(&esp.disk);
            cmd.arg("--part").arg(esp.part.to_string());
        }
        cmd
    }

    fn invoke(&self, op: &Operation) -> Result<(), Error> {
        if matches!(op, Operation::Create(_)) && self.esp.is_none() {
            return Err(Error::EspRequired);
        }
        self.command()
            .args(op.args())
            .log_debug()
            .run_capture_stderr()?;
        Ok(())
    }
}

impl BootManager for Efibootmgr {
    fn list(&self) -> Result<Listing, Error> {
        let out = Command::new(&self.program)
            .arg("-v")
            .log_debug()
            .run_get_string()?;
        Ok(parse_listing(&out)?)
    }

    fn set_boot_order(&self, order: &[BootNum]) -> Result<(), Error> {
        self.invoke(&Operation::BootOrder(order.to_vec()))
    }

    fn set_active(&self, num: BootNum, active: bool) -> Result<(), Error> {
        match active {
            true => self.invoke(&Operation::Active(num)),
            false => self.invoke(&Operation::Inactive(num)),
        }
    }

    fn delete(&self, num: BootNum) -> Result<(), Error> {
        self.invoke(&Operation::Delete(num))
    }

    fn create(&self, entry: &NewEntry) -> Result<(), Error> {
        self.invoke(&Operation::Create(entry.clone()))
    }

    fn set_boot_next(&self, num: Option<BootNum>) -> Result<(), Error> {
        match num {
            Some(num) => self.invoke(&Operation::BootNext(num)),
            None => self.invoke(&Operation::DeleteBootNext),
        }
    }

    fn set_timeout(&self, seconds: u16) -> Result<(), Error> {
        self.invoke(&Operation::Timeout(seconds))
    }

    fn describe(&self, op: &Operation) -> String {
        self.command().args(op.args()).to_shell_string()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt as _;

    use camino::Utf8Path;
    use indoc::indoc;

    use super::*;

    /// Install a shell script standing in for efibootmgr. It keeps BootOrder
    /// in a file next to itself and logs every invocation.
    fn stub_tool(dir: &Utf8Path) -> Utf8PathBuf {
        let listing = indoc! { r"
            BootCurrent: 0001
            Timeout: 3 seconds
            Boot0000* Windows Boot Manager	HD(1,GPT,abc,0x800,0x32000)/File(\EFI\Microsoft\Boot\bootmgfw.efi)
            Boot0001* Fedora	HD(1,GPT,abc,0x800,0x32000)/File(\EFI\fedora\shimx64.efi)
            Boot0002* Linux	HD(1,GPT,abc,0x800,0x32000)/File(\EFI\boot\bootx64.efi)
        " };
        std::fs::write(dir.join("listing"), listing).unwrap();
        std::fs::write(dir.join("order"), "0001,0000,0002").unwrap();
        let script = indoc! { r#"
            #!/bin/sh
            dir=$(dirname "$0")
            echo "$@" >> "$dir/log"
            case "$1" in
                -v)
                    cat "$dir/listing"
                    echo "BootOrder: $(cat "$dir/order")"
                    ;;
                --bootorder)
                    printf '%s' "$2" > "$dir/order"
                    ;;
                --delete-bootnum)
                    printf 'Permission denied' >&2
                    exit 1
                    ;;
            esac
        "# };
        let path = dir.join("efibootmgr");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let td = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(td.path()).unwrap().to_owned();
        (td, path)
    }

    fn esp() -> Esp {
        Esp {
            disk: "/dev/nvme0n1".into(),
            part: 1,
        }
    }

    #[test]
    fn test_args() {
        let new = NewEntry::new("Fedora Linux", r"\EFI\fedora\shimx64.efi", None).unwrap();
        assert_eq!(
            Operation::Create(new).args(),
            [
                "--create",
                "--label",
                "Fedora Linux",
                "--loader",
                r"\EFI\fedora\shimx64.efi"
            ]
        );
        let new = NewEntry::new("Arch", r"\vmlinuz-linux", Some("root=/dev/sda2 rw".into()))
            .unwrap();
        assert_eq!(
            Operation::Create(new).args()[5..],
            ["--unicode", "root=/dev/sda2 rw"]
        );
        assert_eq!(
            Operation::BootOrder(vec![BootNum(2), BootNum(0x1a)]).args(),
            ["--bootorder", "0002,001A"]
        );
        assert_eq!(
            Operation::Inactive(BootNum(3)).args(),
            ["--bootnum", "0003", "--inactive"]
        );
        assert_eq!(Operation::DeleteBootNext.args(), ["--delete-bootnext"]);
        assert_eq!(Operation::Timeout(5).args(), ["--timeout", "5"]);
    }

    #[test]
    fn test_describe() {
        let mgr = Efibootmgr::new()
            .with_privilege_helper(Some("pkexec".into()))
            .with_esp(Some(esp()));
        let new = NewEntry::new("My Linux", r"\EFI\Linux\linux.efi", None).unwrap();
        similar_asserts::assert_eq!(
            mgr.describe(&Operation::Create(new)),
            r#"pkexec efibootmgr --disk /dev/nvme0n1 --part 1 --create --label 'My Linux' --loader "\\EFI\\Linux\\linux.efi""#
        );
        assert_eq!(
            Efibootmgr::new().describe(&Operation::Timeout(2)),
            "efibootmgr --timeout 2"
        );
    }

    #[test]
    fn test_create_requires_esp() {
        let mgr = Efibootmgr::new().with_program("/nonexistent/efibootmgr");
        let new = NewEntry::new("Linux", r"\vmlinuz", None).unwrap();
        assert!(matches!(mgr.create(&new), Err(Error::EspRequired)));
    }

    #[test]
    fn test_stub_reorder() {
        let (_td, dir) = tempdir();
        let mgr = Efibootmgr::new().with_program(stub_tool(&dir));
        let before = mgr.list().unwrap();
        let nums: Vec<_> = before.ordered_entries().iter().map(|e| e.num).collect();
        assert_eq!(nums, [BootNum(1), BootNum(0), BootNum(2)]);
        assert_eq!(before.timeout, Some(3));

        let order = [BootNum(2), BootNum(1), BootNum(0)];
        mgr.set_boot_order(&order).unwrap();
        let after = mgr.list().unwrap();
        assert_eq!(after.boot_order, order);
        let nums: Vec<_> = after.ordered_entries().iter().map(|e| e.num).collect();
        assert_eq!(nums, order);

        let log = std::fs::read_to_string(dir.join("log")).unwrap();
        assert_eq!(log, "-v\n--bootorder 0002,0001,0000\n-v\n");
    }

    #[test]
    fn test_stub_esp_flags() {
        let (_td, dir) = tempdir();
        let mgr = Efibootmgr::new()
            .with_program(stub_tool(&dir))
            .with_esp(Some(esp()));
        mgr.set_timeout(7).unwrap();
        mgr.set_boot_next(Some(BootNum(2))).unwrap();
        let log = std::fs::read_to_string(dir.join("log")).unwrap();
        assert_eq!(
            log,
            "--disk /dev/nvme0n1 --part 1 --timeout 7\n--disk /dev/nvme0n1 --part 1 --bootnext 0002\n"
        );
    }

    #[test]
    fn test_stub_failure_surfaces_stderr() {
        let (_td, dir) = tempdir();
        let mgr = Efibootmgr::new().with_program(stub_tool(&dir));
        let err = mgr.delete(BootNum(1)).unwrap_err();
        assert_eq!(err.to_string(), "Permission denied");
        assert_eq!(err.tool_stderr(), Some("Permission denied"));
    }

    #[test]
    fn test_missing_tool() {
        let mgr = Efibootmgr::new().with_program("/nonexistent/efibootmgr");
        assert!(matches!(mgr.list(), Err(Error::Tool(_))));
    }
}
