// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between kernel and applications.

#![no_std]

use serde::{Deserialize, Serialize};

/// Upper bound on the number of tasks in an application. This is the width of
/// a `MailboxMask`, so it can't grow without changing the ABI.
pub const MAX_TASKS: usize = 32;

/// Number of entries in each task's mailbox.
pub const TASK_MBX_COUNT: usize = 4;

static_assertions::const_assert!(MAX_TASKS <= u32::BITS as usize);
static_assertions::const_assert!(MAX_TASKS <= i8::MAX as usize);
// Mailbox head and count are stored as bytes.
static_assertions::const_assert!(TASK_MBX_COUNT > 0);
static_assertions::const_assert!(TASK_MBX_COUNT <= u8::MAX as usize);

/// Names a task.
///
/// Real tasks are numbered from zero in the order they appear in the task
/// table. Negative values are reserved for the two sentinels below.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct TaskId(pub i8);

impl TaskId {
    /// "No task." Terminates the ready list and marks unused mailbox slots.
    pub const NONE: Self = Self(-1);

    /// Every task. Only meaningful as the destination of a mailbox send.
    pub const ALL: Self = Self(-2);

    /// Fabricates a `TaskId` for a known index.
    pub const fn for_index(index: usize) -> Self {
        TaskId(index as i8)
    }

    /// Extracts the task index, or `None` for the sentinels.
    pub fn index(self) -> Option<usize> {
        if self.0 >= 0 {
            Some(self.0 as usize)
        } else {
            None
        }
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::NONE => f.write_str("none"),
            Self::ALL => f.write_str("all"),
            TaskId(n) => write!(f, "#{n}"),
        }
    }
}

/// A set of tasks, one bit per task index.
///
/// Used both as a task's permission mask (who may post to its mailbox) and as
/// its waiting mask (whose messages it is currently interested in).
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct MailboxMask(pub u32);

impl MailboxMask {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(!0);

    /// The mask containing only `id`. Sentinel IDs produce the empty mask.
    pub fn of(id: TaskId) -> Self {
        match id.index() {
            Some(i) if i < MAX_TASKS => Self(1 << i),
            _ => Self::EMPTY,
        }
    }

    pub fn contains(self, id: TaskId) -> bool {
        let bit = Self::of(id);
        !bit.is_empty() && self.0 & bit.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Checks whether `self` and `other` share any task.
    pub fn intersects(self, other: Self) -> bool {
        !self.intersection(other).is_empty()
    }
}

impl core::ops::BitAnd for MailboxMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl core::ops::BitOr for MailboxMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for MailboxMask {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "msg-size-1")] {
        /// Payload carried by one mailbox entry.
        pub type MessageWord = u8;
    } else if #[cfg(feature = "msg-size-2")] {
        /// Payload carried by one mailbox entry.
        pub type MessageWord = u16;
    } else if #[cfg(feature = "msg-size-4")] {
        /// Payload carried by one mailbox entry.
        pub type MessageWord = u32;
    } else {
        /// Payload carried by one mailbox entry.
        pub type MessageWord = u64;
    }
}

/// Reassembles a message from the two 32-bit words used to pass it through
/// registers. Bits beyond the width of `MessageWord` are discarded.
#[allow(clippy::unnecessary_cast)]
pub fn message_from_words(lo: u32, hi: u32) -> MessageWord {
    (u64::from(lo) | u64::from(hi) << 32) as MessageWord
}

/// Splits a message into low and high 32-bit words.
#[allow(clippy::unnecessary_cast)]
pub fn message_to_words(msg: MessageWord) -> (u32, u32) {
    let wide = msg as u64;
    (wide as u32, (wide >> 32) as u32)
}

/// One buffered mailbox message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MailboxEntry {
    pub sender: TaskId,
    pub msg: MessageWord,
}

impl MailboxEntry {
    /// Contents of an unused slot.
    pub const EMPTY: Self = Self {
        sender: TaskId::NONE,
        msg: 0,
    };
}

impl Default for MailboxEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Status code reported to a task when an operation succeeds.
pub const SUCCESS: i32 = 0;

/// Recoverable errors returned by mailbox operations.
///
/// The discriminants are the status codes tasks see in their return register.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(i32)]
pub enum MailboxError {
    /// The destination mailbox is at capacity.
    FifoFull = -1,
    /// The caller's mailbox holds nothing.
    FifoEmpty = -2,
    /// The destination does not accept messages from the caller.
    Denied = -3,
    /// The caller's mailbox holds messages, but none from a sender it is
    /// waiting on.
    ReceiveMismatch = -4,
    /// A task ID argument named no task.
    BadParam = -5,
}

impl MailboxError {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Lets task-side code turn a raw status register back into an error; the
/// kernel only ever encodes.
impl core::convert::TryFrom<i32> for MailboxError {
    type Error = ();

    fn try_from(x: i32) -> Result<Self, Self::Error> {
        match x {
            -1 => Ok(Self::FifoFull),
            -2 => Ok(Self::FifoEmpty),
            -3 => Ok(Self::Denied),
            -4 => Ok(Self::ReceiveMismatch),
            -5 => Ok(Self::BadParam),
            _ => Err(()),
        }
    }
}

/// Collapses an operation result into the status code a task sees.
pub fn status_code<T>(r: &Result<T, MailboxError>) -> i32 {
    match r {
        Ok(_) => SUCCESS,
        Err(e) => e.code(),
    }
}

/// Decodes a status code back into a result, for tasks reading syscall
/// returns. Unknown codes are treated as `BadParam`.
pub fn status_from_code(code: i32) -> Result<(), MailboxError> {
    if code == SUCCESS {
        Ok(())
    } else {
        Err(MailboxError::try_from(code).unwrap_or(MailboxError::BadParam))
    }
}

/// Enumeration of syscall numbers.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sysnum {
    Wait = 0,
    Yield = 1,
    MbxSend = 2,
    MbxRecv = 3,
    Exit = 4,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because the kernel doesn't depend on `num-traits` and this
/// seems okay.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Wait),
            1 => Ok(Self::Yield),
            2 => Ok(Self::MbxSend),
            3 => Ok(Self::MbxRecv),
            4 => Ok(Self::Exit),
            _ => Err(()),
        }
    }
}

/// Indicates priority of a task.
///
/// Numerically higher priorities are more important: a task at priority 3
/// runs before any task at priority 1.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves about what `>` means.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

/// A contiguous piece of a task image, as laid out at build time.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
pub struct SectionDesc {
    pub virtual_address: u32,
    pub size: u32,
}

impl SectionDesc {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Address one past the end of the section.
    pub fn end(&self) -> u32 {
        self.virtual_address.wrapping_add(self.size)
    }
}

/// Names one of the three sections in a `TaskDesc`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SectionKind {
    Text,
    Bss,
    Stack,
}

impl core::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Bss => "bss",
            Self::Stack => "stack",
        })
    }
}

/// Record describing a single task, fixed at build time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskDesc {
    pub priority: Priority,
    /// Tasks allowed to post to this task's mailbox.
    pub mailbox_permission: MailboxMask,
    pub text: SectionDesc,
    pub bss: SectionDesc,
    pub stack: SectionDesc,
}

impl TaskDesc {
    pub fn sections(&self) -> [(SectionKind, &SectionDesc); 3] {
        [
            (SectionKind::Text, &self.text),
            (SectionKind::Bss, &self.bss),
            (SectionKind::Stack, &self.stack),
        ]
    }

    /// Returns the first zero-sized section, if any. A task with one can't be
    /// started.
    pub fn first_empty_section(&self) -> Option<SectionKind> {
        self.sections()
            .into_iter()
            .find(|(_, s)| s.is_empty())
            .map(|(kind, _)| kind)
    }
}
