// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Moth kernel.
//!
//! A small cooperative kernel for a statically-known set of tasks. Tasks run
//! until they make a syscall; the scheduler then picks the most important
//! ready task, breaking ties first-come-first-served. Tasks talk to each other
//! through fixed-size mailboxes of scalar messages.
//!
//! This code outside of the `arch` module is portable, and is tested on the
//! host against the `fake` architecture.
//!
//! # Design principles
//!
//! 1. Static configuration. The task table is fixed at build time and the
//!    kernel never allocates.
//! 2. One kernel context. All mutable kernel state lives in a single
//!    `sched::Kernel` value, and every operation takes it by `&mut`.
//! 3. A preference for simple and clear algorithms over fast and clever
//!    algorithms. Task counts are small.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

#[macro_use]
pub mod trace;

pub mod err;
pub mod fail;
pub mod mbx;
pub mod ready;
pub mod sched;
#[cfg(all(moth_kconfig, target_arch = "arm", target_os = "none"))]
pub mod startup;
pub mod syscalls;
pub mod task;
