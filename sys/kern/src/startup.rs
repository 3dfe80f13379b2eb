// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! The task table is generated at build time (see `build.rs`) from the
//! application's configuration and compiled in here.

use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::{self, CortexM};
use crate::sched::Kernel;

include!(concat!(env!("OUT_DIR"), "/kconfig.rs"));

type AppKernel = Kernel<CortexM, MOTH_TASK_COUNT>;

/// Set while someone holds a reference to `KERNEL`. Starts out set so that
/// nothing can get at the kernel before `start_kernel` has built it.
static KERNEL_IN_USE: AtomicBool = AtomicBool::new(true);

static mut KERNEL: MaybeUninit<AppKernel> = MaybeUninit::uninit();

/// Builds the kernel from the compiled-in task table, starts every task, and
/// drops into the first one. Configuration errors are fatal.
///
/// # Safety
///
/// Call this exactly once, from the reset handler, on the main stack.
pub unsafe fn start_kernel() -> ! {
    klog!("starting: {} tasks", MOTH_TASK_COUNT);

    let arch = CortexM::new(&MOTH_TASK_DESCS, &MOTH_INTERRUPT_IRQS);
    let kernel = match Kernel::new(&MOTH_TASK_DESCS, MOTH_INTERRUPT_TASK, arch)
    {
        Ok(k) => k,
        Err(e) => crate::fail::die(e),
    };

    // Safety: KERNEL_IN_USE is still set from boot, so nothing else can be
    // looking at KERNEL.
    let kernel: &'static mut AppKernel = unsafe {
        (*core::ptr::addr_of_mut!(KERNEL)).write(kernel)
    };

    let first = match kernel.init() {
        Ok(first) => first,
        Err(e) => crate::fail::die(e),
    };
    let Some(save) = kernel.task(first).map(|t| t.save()) else {
        crate::fail::die("no task to start");
    };

    KERNEL_IN_USE.store(false, Ordering::Release);
    arch::start_first_task(save)
}

/// Runs `body` with exclusive access to the kernel.
///
/// The kernel never re-enters itself, so finding it already in use means
/// something has gone badly wrong.
pub(crate) fn with_kernel<R>(body: impl FnOnce(&mut AppKernel) -> R) -> R {
    if KERNEL_IN_USE.swap(true, Ordering::Acquire) {
        panic!("kernel reentered");
    }

    // Safety: the flag above guarantees exclusive access, and it is only
    // cleared once `start_kernel` has initialized KERNEL.
    let kernel = unsafe { (*core::ptr::addr_of_mut!(KERNEL)).assume_init_mut() };
    let r = body(kernel);

    KERNEL_IN_USE.store(false, Ordering::Release);
    r
}

/// Entry point called by the `SVCall` handler, with the caller's state
/// already saved.
///
/// # Safety
///
/// Only the trap handler may call this.
#[no_mangle]
pub unsafe extern "C" fn moth_syscall_entry() {
    with_kernel(|k| {
        crate::syscalls::syscall_entry(k);
    })
}
