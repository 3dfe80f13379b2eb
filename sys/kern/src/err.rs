// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Errors a task can cause are reported to it as `abi::MailboxError` status
//! codes. The errors here are different: they mean the task table the kernel
//! was built with can't be run at all.

use core::fmt;

use abi::{SectionKind, TaskId};

/// A problem with the static task table, found while bringing up the kernel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// A task has a zero-sized text, bss, or stack section.
    EmptySection { task: TaskId, section: SectionKind },
    /// More tasks than a `MailboxMask` can name.
    TooManyTasks { count: usize },
    /// The interrupt task isn't in the table.
    BadInterruptTask(TaskId),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySection { task, section } => {
                write!(f, "task {task}: {section} section is empty")
            }
            Self::TooManyTasks { count } => write!(
                f,
                "{count} tasks configured, at most {} supported",
                abi::MAX_TASKS
            ),
            Self::BadInterruptTask(id) => {
                write!(f, "interrupt task {id} is not in the task table")
            }
        }
    }
}
