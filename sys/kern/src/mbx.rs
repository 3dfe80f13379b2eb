// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-task mailboxes.
//!
//! A mailbox is a small circular FIFO of `(sender, message)` entries. Entries
//! normally leave from the front, but a task that is only interested in some
//! senders can pull a matching entry out of the middle; the entries behind it
//! close ranks so that arrival order is preserved.

use abi::{MailboxEntry, MailboxError, MailboxMask, TASK_MBX_COUNT};

#[derive(Clone, Debug)]
pub struct Mailbox {
    entries: [MailboxEntry; TASK_MBX_COUNT],
    /// Slot holding the oldest entry.
    head: u8,
    count: u8,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            entries: [MailboxEntry::EMPTY; TASK_MBX_COUNT],
            head: 0,
            count: 0,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn len(&self) -> usize {
        usize::from(self.count)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == TASK_MBX_COUNT
    }

    /// Maps a position in arrival order to a slot in `entries`.
    fn slot(&self, pos: usize) -> usize {
        (usize::from(self.head) + pos) % TASK_MBX_COUNT
    }

    /// Appends `entry` behind everything already buffered.
    pub fn push(&mut self, entry: MailboxEntry) -> Result<(), MailboxError> {
        if self.is_full() {
            return Err(MailboxError::FifoFull);
        }
        let slot = self.slot(self.len());
        self.entries[slot] = entry;
        self.count += 1;
        Ok(())
    }

    /// Union of the senders of every buffered entry.
    pub fn posted_mask(&self) -> MailboxMask {
        self.iter()
            .fold(MailboxMask::EMPTY, |m, e| m | MailboxMask::of(e.sender))
    }

    /// Removes and returns the oldest entry whose sender is in `mask`.
    pub fn take_first_matching(
        &mut self,
        mask: MailboxMask,
    ) -> Result<MailboxEntry, MailboxError> {
        if self.is_empty() {
            return Err(MailboxError::FifoEmpty);
        }

        let pos = self
            .iter()
            .position(|e| mask.contains(e.sender))
            .ok_or(MailboxError::ReceiveMismatch)?;
        let entry = self.entries[self.slot(pos)];

        if pos == 0 {
            // Common case: it's the front of the queue.
            let head = self.slot(0);
            self.entries[head] = MailboxEntry::EMPTY;
            self.head = self.slot(1) as u8;
        } else {
            for p in pos..self.len() - 1 {
                let (dst, src) = (self.slot(p), self.slot(p + 1));
                self.entries[dst] = self.entries[src];
            }
            let last = self.slot(self.len() - 1);
            self.entries[last] = MailboxEntry::EMPTY;
        }
        self.count -= 1;

        Ok(entry)
    }

    /// Iterates over buffered entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MailboxEntry> + '_ {
        (0..self.len()).map(move |pos| &self.entries[self.slot(pos)])
    }
}
