// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-in for a real machine, used to run the kernel under test.
//!
//! Nothing here touches hardware. Instead the fake records what the kernel
//! asked of it, and lets tests decide when external interrupts show up.

use abi::{TaskDesc, TaskId};

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

#[cfg(feature = "klog-host")]
macro_rules! klog {
    ($s:expr) => {
        eprintln!($s)
    };
    ($s:expr, $($tt:tt)*) => {
        eprintln!($s, $($tt)*)
    };
}

#[cfg(not(feature = "klog-host"))]
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

/// Simulated register file. As on real hardware, argument and return slots
/// alias each other.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct SavedState {
    regs: [u32; 4],
    descriptor: u32,
    pc: u32,
    sp: u32,
}

impl SavedState {
    /// Loads a syscall number and arguments, as a task's trap sequence would.
    pub fn load_syscall(&mut self, nr: u32, args: &[u32]) {
        self.descriptor = nr;
        for (reg, &arg) in self.regs.iter_mut().zip(args) {
            *reg = arg;
        }
    }

    pub fn regs(&self) -> [u32; 4] {
        self.regs
    }

    /// Where the task will resume.
    pub fn pc(&self) -> u32 {
        self.pc
    }
}

impl crate::task::ArchState for SavedState {
    fn stack_pointer(&self) -> u32 {
        self.sp
    }

    fn arg0(&self) -> u32 {
        self.regs[0]
    }
    fn arg1(&self) -> u32 {
        self.regs[1]
    }
    fn arg2(&self) -> u32 {
        self.regs[2]
    }

    fn syscall_descriptor(&self) -> u32 {
        self.descriptor
    }

    fn ret0(&mut self, x: u32) {
        self.regs[0] = x
    }
    fn ret1(&mut self, x: u32) {
        self.regs[1] = x
    }
    fn ret2(&mut self, x: u32) {
        self.regs[2] = x
    }
    fn ret3(&mut self, x: u32) {
        self.regs[3] = x
    }
}

/// Scriptable machine.
#[derive(Debug)]
pub struct FakeArch {
    interrupt_pending: bool,
    /// Number of upcoming `idle` calls that end with an interrupt arriving.
    scheduled_interrupts: u32,
    /// Number of times the kernel has idled.
    pub idle_count: u32,
    /// Every context creation, in order.
    pub contexts_created: Vec<TaskId>,
    /// Every address space switch, in order.
    pub space_switches: Vec<(TaskId, TaskId)>,
    /// Task most recently handed to `set_current_task`.
    pub current: TaskId,
}

impl Default for FakeArch {
    fn default() -> Self {
        Self {
            interrupt_pending: false,
            scheduled_interrupts: 0,
            idle_count: 0,
            contexts_created: Vec::new(),
            space_switches: Vec::new(),
            current: TaskId::NONE,
        }
    }
}

impl FakeArch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an external interrupt as pending right now.
    pub fn raise_interrupt(&mut self) {
        self.interrupt_pending = true;
    }

    /// Clears the pending interrupt, as the interrupt task would by talking
    /// to the interrupt controller.
    pub fn acknowledge_interrupt(&mut self) {
        self.interrupt_pending = false;
    }

    /// Arranges for the next call to `idle` to be woken by an interrupt.
    pub fn interrupt_during_idle(&mut self) {
        self.scheduled_interrupts += 1;
    }
}

impl super::Arch for FakeArch {
    fn interrupt_is_pending(&self) -> bool {
        self.interrupt_pending
    }

    fn idle(&mut self) {
        self.idle_count += 1;
        // A real CPU would sleep forever here; a test would hang.
        if self.scheduled_interrupts == 0 {
            panic!("idle with no interrupt scheduled");
        }
        self.scheduled_interrupts -= 1;
        self.interrupt_pending = true;
    }

    fn create_context(
        &mut self,
        id: TaskId,
        desc: &TaskDesc,
        save: &mut SavedState,
    ) {
        klog!("creating context for task {}", id);
        *save = SavedState {
            pc: desc.text.virtual_address,
            sp: desc.stack.end(),
            ..SavedState::default()
        };
        // Tasks learn their own ID from their first argument register.
        save.regs[0] = id.0 as u32;
        self.contexts_created.push(id);
    }

    fn set_current_task(&mut self, id: TaskId, _save: &SavedState) {
        self.current = id;
    }

    fn switch_address_space(&mut self, prev: TaskId, next: TaskId) {
        self.space_switches.push((prev, next));
    }
}
