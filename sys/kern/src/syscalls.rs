// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall implementation.
//!
//! This translates a syscall trap into calls on the scheduler. The
//! architecture-specific trap handler saves the caller's registers into its
//! `SavedState`, calls `syscall_entry`, and then restores whichever task's
//! state it was told to.
//!
//! # Syscall arguments and return values
//!
//! Arguments arrive in the registers exposed by `ArchState::arg0` and
//! friends, and the syscall number in `ArchState::syscall_descriptor`. Results go back in
//! `ret0..ret3`: `ret0` is always a status code (zero for success, negative
//! `MailboxError` otherwise), and receive also returns the sender in `ret1`
//! and the message in `ret2` (low word) and `ret3` (high word).
//!
//! | Syscall   | Arguments                       | Returns              |
//! |-----------|---------------------------------|----------------------|
//! | `Wait`    | sender mask                     | status               |
//! | `Yield`   |                                 | status               |
//! | `MbxSend` | dest, message low, message high | status               |
//! | `MbxRecv` |                                 | status, sender, msg  |
//! | `Exit`    |                                 | does not return      |

use core::convert::TryFrom;

use abi::{MailboxError, Sysnum, TaskId};

use crate::arch::Arch;
use crate::sched::Kernel;
use crate::task::ArchState;
use crate::trace::Trace;

/// Handles the syscall the current task just made; its number and arguments
/// are in the task's saved state. Returns the task to resume, after switching
/// to it if it's not the caller.
pub fn syscall_entry<A: Arch, const N: usize>(
    kernel: &mut Kernel<A, N>,
) -> TaskId {
    let caller = kernel.current();
    let Some(save) = kernel.task_save_mut(caller) else {
        // A trap with nobody running means the trap entry is broken.
        panic!("syscall with no current task");
    };
    let nr = save.syscall_descriptor();

    let next = match Sysnum::try_from(nr) {
        Ok(Sysnum::Wait) => {
            let args = save.as_wait_args();
            let (r, next) = kernel.wait(args.mask);
            set_status(kernel, caller, r);
            next
        }
        Ok(Sysnum::Yield) => {
            let next = kernel.yield_task();
            set_status(kernel, caller, Ok(()));
            next
        }
        Ok(Sysnum::MbxSend) => {
            let args = save.as_send_args();
            let r = kernel.mbx_send(args.dest, args.msg);
            set_status(kernel, caller, r);
            caller
        }
        Ok(Sysnum::MbxRecv) => {
            let r = kernel.mbx_receive();
            if let Some(save) = kernel.task_save_mut(caller) {
                save.set_recv_result(r);
            }
            caller
        }
        Ok(Sysnum::Exit) => {
            let next = kernel.exit();
            // If it ever runs again, it starts over.
            kernel.recreate_context(caller);
            next
        }
        Err(()) => {
            let sp = save.stack_pointer();
            klog!("task {} made bad syscall {} (sp {:#x})", caller, nr, sp);
            ktrace!(kernel.trace, Trace::BadSyscall { task: caller, nr });
            set_status(kernel, caller, Err(MailboxError::BadParam));
            caller
        }
    };

    if next != caller {
        kernel.switch_to(caller, next);
    }
    next
}

fn set_status<A: Arch, const N: usize>(
    kernel: &mut Kernel<A, N>,
    id: TaskId,
    r: Result<(), MailboxError>,
) {
    if let Some(save) = kernel.task_save_mut(id) {
        save.set_status(r);
    }
}
