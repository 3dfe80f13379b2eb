// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7-M with an FPU (`thumbv7em-none-eabihf`).
//!
//! # Notes on ARM-M traps
//!
//! Tasks enter the kernel only through the `SVC` instruction. The `SVCall`
//! handler below deposits all callee-save user state into the current task's
//! `SavedState`, calls `moth_syscall_entry` (provided by `startup`), and then
//! reloads user state from whatever `SavedState` is current on the way out,
//! which may belong to a different task if the syscall caused a switch.
//!
//! # Notes on external interrupts
//!
//! Device interrupts are never enabled in the NVIC. They just go pending, and
//! the scheduler notices that on its next pass and readies the interrupt task,
//! which is responsible for clearing the pending bit once it has dealt with
//! the device. `SEVONPEND` is set so that a newly pending interrupt still wakes
//! the CPU from `WFE` while we idle.

use core::arch::{self, global_asm};
use core::sync::atomic::{AtomicPtr, Ordering};

use abi::{SectionDesc, TaskDesc, TaskId};

use crate::task;

macro_rules! uassert {
    ($cond : expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

#[cfg(feature = "klog-itm")]
macro_rules! klog {
    ($s:expr) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
            cortex_m::iprintln!(stim, $s);
        }
    };
    ($s:expr, $($tt:tt)*) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
            cortex_m::iprintln!(stim, $s, $($tt)*);
        }
    };
}

#[cfg(all(feature = "klog-semihosting", not(feature = "klog-itm")))]
macro_rules! klog {
    ($s:expr) => {
        { let _ = cortex_m_semihosting::hprintln!($s); }
    };
    ($s:expr, $($tt:tt)*) => {
        { let _ = cortex_m_semihosting::hprintln!($s, $($tt)*); }
    };
}

#[cfg(not(any(feature = "klog-itm", feature = "klog-semihosting")))]
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($x:expr),*$(,)?) => {
        {
            $(
                let _ = &$x;
            )*
        }
    };
}

/// On ARMvx-M we have to use a global to record the current task's saved
/// state, since we don't have a scratch register.
#[no_mangle]
static CURRENT_SAVE_PTR: AtomicPtr<SavedState> =
    AtomicPtr::new(core::ptr::null_mut());

/// ARMv7-M volatile registers that must be saved across context switches.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedState {
    // NOTE: the following fields must be kept contiguous!
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    psp: u32,
    exc_return: u32,
    s16_s31: [u32; 16],
    // NOTE: the above fields must be kept contiguous!
}

/// Map the volatile registers to (architecture-independent) syscall argument
/// and return slots.
impl task::ArchState for SavedState {
    fn stack_pointer(&self) -> u32 {
        self.psp
    }

    fn arg0(&self) -> u32 {
        self.r4
    }
    fn arg1(&self) -> u32 {
        self.r5
    }
    fn arg2(&self) -> u32 {
        self.r6
    }

    fn syscall_descriptor(&self) -> u32 {
        self.r11
    }

    fn ret0(&mut self, x: u32) {
        self.r4 = x
    }
    fn ret1(&mut self, x: u32) {
        self.r5 = x
    }
    fn ret2(&mut self, x: u32) {
        self.r6 = x
    }
    fn ret3(&mut self, x: u32) {
        self.r7 = x
    }
}

/// Stuff placed on the stack at exception entry, FPU variant.
#[derive(Debug, Default)]
#[repr(C)]
struct ExtendedExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
    fpu_regs: [u32; 16],
    fpscr: u32,
    reserved: u32,
}

/// Initially we just set the Thumb Mode bit, the minimum required.
const INITIAL_PSR: u32 = 1 << 24;

/// Return to thread mode, process stack, extended (FPU) frame.
const EXC_RETURN_CONST: u32 = 0xFFFFFFED;

/// Cortex-M adapter.
pub struct CortexM {
    descs: &'static [TaskDesc],
    irqs: &'static [u32],
}

impl CortexM {
    /// Creates the adapter for an application whose interrupt task handles
    /// `irqs`.
    pub fn new(descs: &'static [TaskDesc], irqs: &'static [u32]) -> Self {
        // Safety: setting SEVONPEND only changes what wakes WFE.
        unsafe {
            let scb = &*cortex_m::peripheral::SCB::PTR;
            const SEVONPEND: u32 = 1 << 4;
            scb.scr.modify(|x| x | SEVONPEND);
        }
        Self { descs, irqs }
    }
}

impl super::Arch for CortexM {
    fn interrupt_is_pending(&self) -> bool {
        // Safety: reading ISPR has no side effects.
        let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
        self.irqs.iter().any(|&n| {
            let reg_num = (n / 32) as usize;
            let bit_mask = 1 << (n % 32);
            nvic.ispr
                .get(reg_num)
                .map(|r| r.read() & bit_mask != 0)
                .unwrap_or(false)
        })
    }

    fn idle(&mut self) {
        cortex_m::asm::wfe();
    }

    fn create_context(
        &mut self,
        id: TaskId,
        desc: &TaskDesc,
        save: &mut SavedState,
    ) {
        *save = SavedState::default();

        let frame_size = core::mem::size_of::<ExtendedExceptionFrame>() as u32;
        // Modern ARMvX-M machines require 8-byte stack alignment.
        let initial_stack = desc.stack.end() & !0x7;
        uassert!(initial_stack >= desc.stack.virtual_address + frame_size);

        // Safety: section addresses come from the build-time task table,
        // which places them in RAM owned by this task alone.
        unsafe {
            zero_section(&desc.bss);
            zero_section(&desc.stack);
        }

        let frame_addr = initial_stack - frame_size;
        let frame = ExtendedExceptionFrame {
            // Tasks learn their own ID from their first argument.
            r0: id.0 as u32,
            lr: 0xFFFF_FFFF, // trap on return from main
            pc: desc.text.virtual_address | 1, // for thumb
            xpsr: INITIAL_PSR,
            ..ExtendedExceptionFrame::default()
        };
        // Safety: the frame lies within the (just zeroed) stack section.
        unsafe {
            core::ptr::write_volatile(
                frame_addr as *mut ExtendedExceptionFrame,
                frame,
            );
        }

        // Set the initial stack pointer, *not* to the stack top, but to the
        // base of this frame.
        save.psp = frame_addr;
        save.exc_return = EXC_RETURN_CONST;
    }

    fn set_current_task(&mut self, _id: TaskId, save: &SavedState) {
        CURRENT_SAVE_PTR.store(save as *const _ as *mut _, Ordering::Relaxed);
    }

    fn switch_address_space(&mut self, _prev: TaskId, next: TaskId) {
        if let Some(desc) = next.index().and_then(|i| self.descs.get(i)) {
            apply_memory_protection(desc);
        }
    }
}

unsafe fn zero_section(section: &SectionDesc) {
    // Safety: passed along to our caller.
    unsafe {
        core::ptr::write_bytes(
            section.virtual_address as *mut u8,
            0,
            section.size as usize,
        );
    }
}

/// Computes the (RBAR, RASR) pair for one section. The build tools are
/// expected to have produced power-of-two sized, naturally aligned sections.
fn region_registers(section: &SectionDesc, executable: bool) -> (u32, u32) {
    let base = section.virtual_address;
    let size = section.size;
    // This platform requires 32-byte alignment of all regions.
    uassert!(base & 0x1F == 0);
    uassert!(size >= 32);

    let xn = !executable;
    // Code is read-only to the task; data is read-write. The kernel keeps
    // full access either way.
    let ap = if executable { 0b010 } else { 0b011 };
    // Normal memory, write-back, read and write allocate, not shared.
    let (tex, scb) = (0b001, 0b011);
    // The MPU expresses size in log2 form _minus one._
    let l2size = 30 - size.leading_zeros();

    let rasr =
        (xn as u32) << 28 | ap << 24 | tex << 19 | scb << 16 | l2size << 1 | 1;
    (base, rasr)
}

fn apply_memory_protection(desc: &TaskDesc) {
    // We are manufacturing authority to interact with the MPU here, because we
    // can't thread a cortex-specific peripheral through an
    // architecture-independent API.
    let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };

    // Turn off the MPU.
    //
    // Safety: this has no actual memory safety implications, except for
    // potentially exposing the kernel to a NULL dereference that succeeds.
    unsafe {
        mpu.ctrl.write(0);
    }

    let regions = [
        region_registers(&desc.text, true),
        region_registers(&desc.bss, false),
        region_registers(&desc.stack, false),
    ];
    for (i, (rbar, rasr)) in regions.into_iter().enumerate() {
        // Safety: we're loading values generated by our (trusted) build
        // script, which only affect tasks and not us.
        unsafe {
            mpu.rnr.write(i as u32);
            mpu.rbar.write(rbar);
            mpu.rasr.write(rasr);
        }
    }

    // Turn MPU back on, with the default map for privileged code.
    //
    // Safety: same as above, has no safety implications really.
    unsafe {
        mpu.ctrl.write(0b101);
    }
}

/// Drops into user mode in the task whose state is `save`.
pub fn start_first_task(save: &SavedState) -> ! {
    // Safety: we're purely lowering the priority of SVCall from its default,
    // so it can't cause any surprise preemption. But these operations are
    // `unsafe` in the `cortex_m` crate.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        scb.shpr[7].write(0xFF);
    }

    CURRENT_SAVE_PTR.store(save as *const _ as *mut _, Ordering::Relaxed);

    // Safety: this is setting the Process (task) stack pointer, which has no
    // effect _assuming_ this code is running on the Main (kernel) stack.
    unsafe {
        cortex_m::register::psp::write(save.psp);
    }

    // Our basic goal here is to flip into Handler mode so that we can switch
    // Thread mode to unprivileged and running off the Process Stack Pointer.
    // The easiest way to do this on ARM-M is by entering Handler mode by a
    // trap, and the SVC entry sequence detects this case.
    unsafe {
        arch::asm!("
            @ Restore callee-save registers.
            ldm {save}, {{r4-r11}}
            @ Trap into the kernel.
            svc #0xFF
            @ noreturn generates a UDF here in case that should return.
            ",
            save = in(reg) &save.r4,
            options(noreturn),
        )
    }
}

// Handler that gets linked into the vector table for the Supervisor Call (SVC)
// instruction. (Name is dictated by the `cortex_m` crate.)
//
// We inspect LR, which on exception entry describes the interrupted state, to
// detect an SVC from the Main stack: that only happens once, from
// `start_first_task`. Otherwise we store the calling task's context, call
// `moth_syscall_entry`, and restore context (possibly for a different task).
global_asm! {"
    .section .text.SVCall
    .globl SVCall
    .type SVCall,function
    SVCall:
        @ Inspect LR to figure out the caller's mode.
        mov r0, lr
        mov r1, #0xFFFFFFF3
        bic r0, r1
        @ Is the call coming from thread mode + main stack, i.e.
        @ from the kernel startup routine?
        cmp r0, #0x8
        beq 1f

        @ store volatile state.
        @ first, get a pointer to the current saved state.
        movw r0, #:lower16:CURRENT_SAVE_PTR
        movt r0, #:upper16:CURRENT_SAVE_PTR
        ldr r1, [r0]
        movs r2, r1
        @ fetch the process-mode stack pointer.
        @ fetching into r12 means the order in the stm below is right.
        mrs r12, PSP
        @ now, store volatile registers, plus the PSP in r12, plus LR.
        stm r2!, {{r4-r12, lr}}
        vstm r2, {{s16-s31}}

        @ the syscall number is in r11, now saved along with the rest;
        @ the handler reads it from there.
        bl moth_syscall_entry

        @ we're returning back to *some* task, maybe not the same one.
        movw r0, #:lower16:CURRENT_SAVE_PTR
        movt r0, #:upper16:CURRENT_SAVE_PTR
        ldr r0, [r0]
        @ restore volatile registers, plus load PSP into r12
        ldm r0!, {{r4-r12, lr}}
        vldm r0, {{s16-s31}}
        msr PSP, r12

        @ resume
        bx lr

    1:  @ starting up the first task.
        movs r0, #1         @ get bitmask to...
        msr CONTROL, r0     @ ...shed privs from thread mode.

        mov lr, {exc_return}    @ materialize EXC_RETURN value to
                                @ return into thread mode, PSP, FP on

        bx lr                   @ branch into user mode
    ",
    exc_return = const EXC_RETURN_CONST,
}
