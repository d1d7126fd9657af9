//! Staged edits against one [`Listing`].
//!
//! An [`EditSession`] collects what the user wants to change and turns it
//! into the minimal list of [`Operation`]s. Nothing touches the firmware
//! until [`EditSession::commit`].

use crate::entry::{BootEntry, BootNum, Listing, NewEntry};
use crate::error::Error;
use crate::manager::{BootManager, Operation};

/// The direction for [`EditSession::move_entry`].
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards the front of the boot order
    Up,
    /// Towards the back of the boot order
    Down,
}

/// Pending changes to the boot configuration.
#[derive(Debug, Clone)]
pub struct EditSession {
    initial: Listing,
    /// Entries as displayed, in boot priority order
    rows: Vec<BootNum>,
    boot_order: Vec<BootNum>,
    reordered: bool,
    boot_next: Option<BootNum>,
    timeout: Option<u16>,
    activate: Vec<BootNum>,
    deactivate: Vec<BootNum>,
    added: Vec<NewEntry>,
    removed: Vec<BootNum>,
}

impl EditSession {
    /// Start editing from the given state.
    pub fn new(listing: Listing) -> Self {
        let rows = listing.ordered_entries().iter().map(|e| e.num).collect();
        Self {
            rows,
            boot_order: listing.boot_order.clone(),
            reordered: false,
            boot_next: listing.boot_next,
            timeout: listing.timeout,
            activate: Vec::new(),
            deactivate: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            initial: listing,
        }
    }

    fn ensure_known(&self, num: BootNum) -> Result<(), Error> {
        if self.rows.contains(&num) {
            Ok(())
        } else {
            Err(Error::UnknownEntry(num))
        }
    }

    /// Entries as they will look after committing, in boot priority order.
    /// Entries staged for creation are not included; they have no number yet.
    pub fn entries(&self) -> Vec<BootEntry> {
        self.rows
            .iter()
            .filter_map(|&num| self.initial.get(num))
            .map(|e| BootEntry {
                active: self.is_active(e.num),
                next: self.boot_next == Some(e.num),
                ..e.clone()
            })
            .collect()
    }

    fn is_active(&self, num: BootNum) -> bool {
        if self.activate.contains(&num) {
            return true;
        }
        if self.deactivate.contains(&num) {
            return false;
        }
        self.initial.get(num).is_some_and(|e| e.active)
    }

    /// Swap an entry with its neighbour. Moving past either end does nothing.
    pub fn move_entry(&mut self, num: BootNum, direction: Direction) -> Result<(), Error> {
        let Some(idx) = self.rows.iter().position(|&n| n == num) else {
            return Err(Error::UnknownEntry(num));
        };
        let other = match direction {
            Direction::Up => idx.checked_sub(1),
            Direction::Down => Some(idx + 1).filter(|&i| i < self.rows.len()),
        };
        if let Some(other) = other {
            self.rows.swap(idx, other);
            self.boot_order = self.rows.clone();
            self.reordered = true;
        }
        Ok(())
    }

    /// Put the given entries first, in this order. Entries not named keep
    /// their relative order behind them.
    pub fn set_order(&mut self, order: &[BootNum]) -> Result<(), Error> {
        for (i, &num) in order.iter().enumerate() {
            self.ensure_known(num)?;
            if order[..i].contains(&num) {
                return Err(Error::DuplicateEntry(num));
            }
        }
        let rest = self.rows.iter().filter(|n| !order.contains(n)).copied();
        self.rows = order.iter().copied().chain(rest).collect();
        self.boot_order = self.rows.clone();
        self.reordered = true;
        Ok(())
    }

    /// Enable or disable an entry. Undoes a pending opposite change instead
    /// of stacking both.
    pub fn set_active(&mut self, num: BootNum, active: bool) -> Result<(), Error> {
        self.ensure_known(num)?;
        if self.is_active(num) == active {
            return Ok(());
        }
        let (undo, stage) = if active {
            (&mut self.deactivate, &mut self.activate)
        } else {
            (&mut self.activate, &mut self.deactivate)
        };
        if let Some(idx) = undo.iter().position(|&n| n == num) {
            undo.remove(idx);
        } else {
            stage.push(num);
        }
        Ok(())
    }

    /// Set or clear the one-shot next boot target.
    pub fn set_next(&mut self, num: Option<BootNum>) -> Result<(), Error> {
        if let Some(num) = num {
            self.ensure_known(num)?;
        }
        self.boot_next = num;
        Ok(())
    }

    /// Set the boot manager timeout.
    pub fn set_timeout(&mut self, seconds: u16) {
        self.timeout = Some(seconds);
    }

    /// Stage a new entry.
    pub fn add(&mut self, entry: NewEntry) {
        self.added.push(entry);
    }

    /// Stage deleting an entry.
    pub fn remove(&mut self, num: BootNum) -> Result<(), Error> {
        self.ensure_known(num)?;
        self.rows.retain(|&n| n != num);
        self.boot_order.retain(|&n| n != num);
        self.activate.retain(|&n| n != num);
        self.deactivate.retain(|&n| n != num);
        if self.boot_next == Some(num) {
            self.boot_next = None;
        }
        self.removed.push(num);
        Ok(())
    }

    /// Whether committing would change anything.
    pub fn is_dirty(&self) -> bool {
        !self.operations().is_empty()
    }

    /// The operations [`Self::commit`] will run, in order.
    ///
    /// Deleting an entry already drops it from `BootOrder`, so the order is
    /// only written after an explicit reorder. It is written before any
    /// creation because `--create` puts the new entry first in `BootOrder`.
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.removed.iter().copied().map(Operation::Delete).collect();
        if self.reordered && self.boot_order != self.initial.boot_order {
            ops.push(Operation::BootOrder(self.boot_order.clone()));
        }
        ops.extend(self.added.iter().cloned().map(Operation::Create));
        if self.boot_next != self.initial.boot_next {
            ops.push(match self.boot_next {
                Some(num) => Operation::BootNext(num),
                None => Operation::DeleteBootNext,
            });
        }
        ops.extend(self.activate.iter().copied().map(Operation::Active));
        ops.extend(self.deactivate.iter().copied().map(Operation::Inactive));
        if let Some(timeout) = self.timeout.filter(|&t| Some(t) != self.initial.timeout) {
            ops.push(Operation::Timeout(timeout));
        }
        ops
    }

    /// Run every staged operation, then list again.
    ///
    /// Stops at the first failure; operations already run stay applied.
    pub fn commit(self, manager: &dyn BootManager) -> Result<Listing, Error> {
        for op in self.operations() {
            tracing::info!("Running {}", manager.describe(&op));
            op.apply(manager)?;
        }
        manager.list()
    }
}
