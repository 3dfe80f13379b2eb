// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.

use abi::{
    MailboxEntry, MailboxError, MailboxMask, MessageWord, Priority, TaskDesc,
    TaskId,
};

use crate::arch::SavedState;
use crate::mbx::Mailbox;

/// Internal representation of a task.
///
/// The fields of this struct are private to this module so that we can
/// maintain some task invariants. The ready list links are visible to the
/// rest of the crate only so that `ready` can thread through them.
#[derive(Debug)]
pub struct Task {
    /// Saved machine state of the user program.
    save: SavedState,
    /// Next task in the ready list, or `TaskId::NONE`.
    pub(crate) next: TaskId,
    /// Previous task in the ready list, or `TaskId::NONE`.
    pub(crate) prev: TaskId,
    /// Senders this task is currently interested in. Left in place after the
    /// wait that set it completes, since receive filters against it.
    waiting_mask: MailboxMask,
    mailbox: Mailbox,
    /// Static table entry for this task.
    descriptor: &'static TaskDesc,
}

impl Task {
    /// Creates a `Task` in its initial state, filling in fields from
    /// `descriptor`.
    pub fn from_descriptor(descriptor: &'static TaskDesc) -> Self {
        Task {
            save: SavedState::default(),
            next: TaskId::NONE,
            prev: TaskId::NONE,
            waiting_mask: MailboxMask::EMPTY,
            mailbox: Mailbox::new(),
            descriptor,
        }
    }

    /// Returns the task to its boot state, apart from its saved context,
    /// which belongs to the architecture layer.
    pub(crate) fn reset(&mut self) {
        self.next = TaskId::NONE;
        self.prev = TaskId::NONE;
        self.waiting_mask = MailboxMask::EMPTY;
        self.mailbox.clear();
    }

    pub fn priority(&self) -> Priority {
        self.descriptor.priority
    }

    /// Tasks that may post to this one.
    pub fn mailbox_permission(&self) -> MailboxMask {
        self.descriptor.mailbox_permission
    }

    pub fn waiting_mask(&self) -> MailboxMask {
        self.waiting_mask
    }

    pub(crate) fn set_waiting_mask(&mut self, mask: MailboxMask) {
        self.waiting_mask = mask;
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub(crate) fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }

    /// Returns a reference to the `TaskDesc` that was used to initially create
    /// this task.
    pub fn descriptor(&self) -> &'static TaskDesc {
        self.descriptor
    }

    /// Returns a reference to the saved machine state for the task.
    pub fn save(&self) -> &SavedState {
        &self.save
    }

    /// Returns a mutable reference to the saved machine state for the task.
    pub fn save_mut(&mut self) -> &mut SavedState {
        &mut self.save
    }

    /// Checks whether a wait on `mask` can be satisfied right away by
    /// something already in the mailbox.
    pub(crate) fn has_posted_from(&self, mask: MailboxMask) -> bool {
        self.mailbox.posted_mask().intersects(mask)
    }
}

/// Interface that must be implemented by the `arch::SavedState` type. This
/// gives architecture-independent access to task state for the rest of the
/// kernel.
///
/// Architectures need to implement the `argX` and `retX` functions plus
/// `syscall_descriptor`, and the rest of the trait (such as the argument
/// proxies) will just work.
pub trait ArchState: Default {
    /// Reads the task's stack pointer, for diagnostics.
    fn stack_pointer(&self) -> u32;

    /// Reads syscall argument register 0.
    fn arg0(&self) -> u32;
    /// Reads syscall argument register 1.
    fn arg1(&self) -> u32;
    /// Reads syscall argument register 2.
    fn arg2(&self) -> u32;

    /// Reads the syscall descriptor (number).
    fn syscall_descriptor(&self) -> u32;

    /// Writes syscall return argument 0.
    fn ret0(&mut self, _: u32);
    /// Writes syscall return argument 1.
    fn ret1(&mut self, _: u32);
    /// Writes syscall return argument 2.
    fn ret2(&mut self, _: u32);
    /// Writes syscall return argument 3.
    fn ret3(&mut self, _: u32);

    /// Interprets arguments as for the WAIT syscall and returns the results.
    fn as_wait_args(&self) -> WaitArgs {
        WaitArgs {
            mask: MailboxMask(self.arg0()),
        }
    }

    /// Interprets arguments as for the MBX_SEND syscall and returns the
    /// results.
    ///
    /// This is inlined because it's cheap and its callers usually use only
    /// part of it.
    #[inline(always)]
    fn as_send_args(&self) -> SendArgs {
        SendArgs {
            // Anything that doesn't fit a TaskId names no task at all.
            dest: i8::try_from(self.arg0() as i32)
                .map(TaskId)
                .unwrap_or(TaskId::NONE),
            msg: abi::message_from_words(self.arg1(), self.arg2()),
        }
    }

    /// Sets the status code seen by the task.
    fn set_status(&mut self, r: Result<(), MailboxError>) {
        self.ret0(abi::status_code(&r) as u32);
    }

    /// Sets the results of MBX_RECV. On failure only the status is
    /// meaningful.
    fn set_recv_result(&mut self, r: Result<MailboxEntry, MailboxError>) {
        self.ret0(abi::status_code(&r) as u32);
        let entry = r.unwrap_or(MailboxEntry::EMPTY);
        let (lo, hi) = abi::message_to_words(entry.msg);
        self.ret1(entry.sender.0 as u32);
        self.ret2(lo);
        self.ret3(hi);
    }
}

/// Decoded WAIT arguments.
#[derive(Clone, Debug)]
pub struct WaitArgs {
    pub mask: MailboxMask,
}

/// Decoded MBX_SEND arguments.
#[derive(Clone, Debug)]
pub struct SendArgs {
    pub dest: TaskId,
    pub msg: MessageWord,
}
