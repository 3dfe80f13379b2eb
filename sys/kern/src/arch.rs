// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! For this to work, each architecture support module must define the same set
//! of names: a `SavedState` type implementing `task::ArchState`, a type
//! implementing `Arch`, and the `klog!` and `uassert!` macros.

use abi::{TaskDesc, TaskId};

/// Operations the scheduler needs from the machine.
///
/// The scheduler never touches registers, address spaces or interrupt
/// controllers itself; everything of that sort goes through here.
pub trait Arch {
    /// Checks whether any external interrupt is waiting to be handled by the
    /// interrupt task.
    fn interrupt_is_pending(&self) -> bool;

    /// Parks the CPU until something might have changed. Called when no task
    /// is ready.
    fn idle(&mut self);

    /// (Re)initializes the saved context of task `id` so that it will start
    /// from its entry point, and clears its writable sections.
    fn create_context(
        &mut self,
        id: TaskId,
        desc: &TaskDesc,
        save: &mut SavedState,
    );

    /// Makes `save` the context that will be restored on return to user
    /// mode.
    fn set_current_task(&mut self, id: TaskId, save: &SavedState);

    /// Changes the active address space from `prev`'s to `next`'s. `prev`
    /// is `TaskId::NONE` for the very first switch.
    fn switch_address_space(&mut self, prev: TaskId, next: TaskId);
}

cfg_if::cfg_if! {
    // Note: cfg_if! is slightly touchy about ordering and expression
    // complexity; this chain seems to be the best compromise.

    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        #[macro_use]
        pub mod arm_m;
        pub use arm_m::*;
    } else {
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    }
}
