//! An in-memory [`BootManager`] for tests.
//!
//! State is kept as a [`Listing`] and every [`BootManager::list`] renders it
//! to `efibootmgr -v` text and parses it back, the same path real output
//! takes.

use std::cell::{RefCell, RefMut};

use efiboot_utils::CommandError;
use indoc::indoc;

use crate::entry::{BootEntry, BootNum, Listing, NewEntry};
use crate::error::Error;
use crate::manager::BootManager;
use crate::parser::parse_listing;

const INITIAL: &str = indoc! { r"
    BootCurrent: 0001
    Timeout: 3 seconds
    BootOrder: 0001,0000,0002
    Boot0000* Windows Boot Manager	HD(1,GPT,5f3c2d1e-0a9b-4c8d-9e7f-a1b2c3d4e5f6,0x800,0x32000)/File(\EFI\Microsoft\Boot\bootmgfw.efi)
    Boot0001* Fedora	HD(1,GPT,5f3c2d1e-0a9b-4c8d-9e7f-a1b2c3d4e5f6,0x800,0x32000)/File(\EFI\fedora\shimx64.efi)
    Boot0002  Linux	HD(1,GPT,5f3c2d1e-0a9b-4c8d-9e7f-a1b2c3d4e5f6,0x800,0x32000)/File(\EFI\boot\bootx64.efi)
" };

#[derive(Debug)]
pub(crate) struct FakeFirmware {
    state: RefCell<Listing>,
    fail: RefCell<Option<String>>,
}

fn tool_error(stderr: impl Into<String>) -> Error {
    CommandError::Failed {
        program: "efibootmgr".into(),
        code: Some(1),
        stderr: stderr.into(),
    }
    .into()
}

impl FakeFirmware {
    /// Three entries, `0002` inactive, booted from `0001`.
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(parse_listing(INITIAL).unwrap()),
            fail: RefCell::new(None),
        }
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, Listing> {
        self.state.borrow_mut()
    }

    /// Make the next call fail as if efibootmgr printed `stderr`.
    pub(crate) fn fail_next(&self, stderr: &str) {
        *self.fail.borrow_mut() = Some(stderr.to_owned());
    }

    fn check(&self) -> Result<(), Error> {
        match self.fail.borrow_mut().take() {
            Some(stderr) => Err(tool_error(stderr)),
            None => Ok(()),
        }
    }

    fn with_entry(&self, num: BootNum, f: impl FnOnce(&mut BootEntry)) -> Result<(), Error> {
        self.check()?;
        let mut state = self.state.borrow_mut();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.num == num)
            .ok_or_else(|| tool_error(format!("Could not find boot variable {num}")))?;
        f(entry);
        Ok(())
    }
}

impl BootManager for FakeFirmware {
    fn list(&self) -> Result<Listing, Error> {
        self.check()?;
        let rendered = self.state.borrow().to_string();
        Ok(parse_listing(&rendered)?)
    }

    fn set_boot_order(&self, order: &[BootNum]) -> Result<(), Error> {
        self.check()?;
        self.state.borrow_mut().boot_order = order.to_vec();
        Ok(())
    }

    fn set_active(&self, num: BootNum, active: bool) -> Result<(), Error> {
        self.with_entry(num, |e| e.active = active)
    }

    fn delete(&self, num: BootNum) -> Result<(), Error> {
        self.with_entry(num, |_| ())?;
        let mut state = self.state.borrow_mut();
        state.entries.retain(|e| e.num != num);
        state.boot_order.retain(|&n| n != num);
        Ok(())
    }

    fn create(&self, entry: &NewEntry) -> Result<(), Error> {
        self.check()?;
        let mut state = self.state.borrow_mut();
        let num = (0..=u16::MAX)
            .map(BootNum)
            .find(|&n| state.get(n).is_none())
            .ok_or_else(|| tool_error("No free boot number"))?;
        // Optional data shows up in the dotted UCS-2 form
        let data: String = entry
            .parameters
            .iter()
            .flat_map(|p| p.chars())
            .flat_map(|c| [c, '.'])
            .collect();
        state.entries.push(BootEntry {
            num,
            label: entry.label.clone(),
            device_path: format!("HD(1,GPT,5f3c2d1e,0x800,0x32000)/File({}){data}", entry.loader),
            loader: String::new(),
            parameters: String::new(),
            active: true,
            next: false,
            current: false,
        });
        state.boot_order.insert(0, num);
        Ok(())
    }

    fn set_boot_next(&self, num: Option<BootNum>) -> Result<(), Error> {
        self.check()?;
        self.state.borrow_mut().boot_next = num;
        Ok(())
    }

    fn set_timeout(&self, seconds: u16) -> Result<(), Error> {
        self.check()?;
        self.state.borrow_mut().timeout = Some(seconds);
        Ok(())
    }
}
