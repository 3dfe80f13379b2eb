// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler and the mailbox operations that drive it.
//!
//! All kernel state lives in a `Kernel`. A task is *ready* while it is in the
//! ready list and *blocked* while it is out of the list with a nonzero waiting
//! mask; the running task is simply the head of the ready list. Nothing here
//! preempts anything: every change of task happens inside one of the
//! operations below, and each operation that may change the running task
//! returns the task that should run next.

use abi::{
    MailboxEntry, MailboxError, MailboxMask, MessageWord, TaskDesc, TaskId,
    MAX_TASKS,
};

use crate::arch::{Arch, SavedState};
use crate::err::ConfigError;
use crate::ready::{ReadyIter, ReadyList};
use crate::task::Task;
use crate::trace::{KernelTrace, Trace};

pub struct Kernel<A: Arch, const N: usize> {
    tasks: [Task; N],
    ready: ReadyList,
    /// Task chosen by the most recent `schedule`, or `NONE` before `init`.
    current: TaskId,
    /// Task readied whenever an external interrupt is pending, or `NONE`.
    interrupt_task: TaskId,
    arch: A,
    pub(crate) trace: KernelTrace,
}

impl<A: Arch, const N: usize> Kernel<A, N> {
    /// Builds the task table from `descs`. Nothing runs until `init`.
    pub fn new(
        descs: &'static [TaskDesc; N],
        interrupt_task: TaskId,
        arch: A,
    ) -> Result<Self, ConfigError> {
        if N > MAX_TASKS {
            return Err(ConfigError::TooManyTasks { count: N });
        }
        let interrupt_ok = interrupt_task.is_none()
            || interrupt_task.index().is_some_and(|i| i < N);
        if !interrupt_ok {
            return Err(ConfigError::BadInterruptTask(interrupt_task));
        }

        Ok(Self {
            tasks: core::array::from_fn(|i| Task::from_descriptor(&descs[i])),
            ready: ReadyList::new(),
            current: TaskId::NONE,
            interrupt_task,
            arch,
            trace: KernelTrace::new(Trace::None),
        })
    }

    /// Puts every task in its boot state, makes them all ready, and picks the
    /// first one to run, handing it to the architecture layer.
    pub fn init(&mut self) -> Result<TaskId, ConfigError> {
        self.ready.clear();
        self.current = TaskId::NONE;

        for index in 0..N {
            let id = TaskId::for_index(index);
            let desc = self.tasks[index].descriptor();
            if let Some(section) = desc.first_empty_section() {
                klog!("task {} has an empty {} section", id, section);
                return Err(ConfigError::EmptySection { task: id, section });
            }
            self.tasks[index].reset();
            self.recreate_context(id);
            self.ready.insert(&mut self.tasks, id);
        }

        let first = self.schedule();
        ktrace!(self.trace, Trace::Init { first });
        self.switch_to(TaskId::NONE, first);
        Ok(first)
    }

    /// Index of the calling task. Operations on behalf of a task only make
    /// sense once `init` has picked one.
    fn caller_index(&self) -> usize {
        match self.current.index() {
            Some(i) if i < N => i,
            _ => panic!("no current task"),
        }
    }

    /// Blocks the caller until a message arrives from a sender in `mask`.
    ///
    /// Senders the caller doesn't accept messages from are dropped from
    /// `mask` without complaint. If that leaves nothing, this is a yield. If
    /// a matching message is already waiting, the caller stays ready.
    pub fn wait(
        &mut self,
        mask: MailboxMask,
    ) -> (Result<(), MailboxError>, TaskId) {
        let caller = self.current;
        let index = self.caller_index();
        let mask = mask & self.tasks[index].mailbox_permission();

        self.ready.remove(&mut self.tasks, caller);

        let blocked = if mask.is_empty() {
            self.ready.insert(&mut self.tasks, caller);
            false
        } else {
            self.tasks[index].set_waiting_mask(mask);
            if self.tasks[index].has_posted_from(mask) {
                self.ready.insert(&mut self.tasks, caller);
                false
            } else {
                true
            }
        };
        ktrace!(
            self.trace,
            Trace::Wait {
                task: caller,
                mask: mask.0,
                blocked
            }
        );

        (Ok(()), self.schedule())
    }

    /// Sends the caller to the back of its priority band.
    pub fn yield_task(&mut self) -> TaskId {
        let caller = self.current;
        self.caller_index();
        ktrace!(self.trace, Trace::Yield(caller));

        self.ready.remove(&mut self.tasks, caller);
        self.ready.insert(&mut self.tasks, caller);
        self.schedule()
    }

    /// Retires the caller. It won't run again unless it is restarted, or
    /// unless it is the interrupt task and an interrupt comes in.
    pub fn exit(&mut self) -> TaskId {
        let caller = self.current;
        let index = self.caller_index();
        ktrace!(self.trace, Trace::Exit(caller));

        self.ready.remove(&mut self.tasks, caller);
        // Otherwise a later send could wake it.
        self.tasks[index].set_waiting_mask(MailboxMask::EMPTY);
        self.schedule()
    }

    /// Picks the task to run: the head of the ready list, after readying the
    /// interrupt task if an interrupt is pending. With nothing ready, idles
    /// until an interrupt makes something ready.
    pub fn schedule(&mut self) -> TaskId {
        loop {
            if !self.interrupt_task.is_none()
                && self.arch.interrupt_is_pending()
                && !self.ready.contains(&self.tasks, self.interrupt_task)
            {
                ktrace!(
                    self.trace,
                    Trace::InterruptTaskReady(self.interrupt_task)
                );
                self.ready.insert(&mut self.tasks, self.interrupt_task);
            }
            if !self.ready.is_empty() {
                break;
            }
            ktrace!(self.trace, Trace::Idle);
            self.arch.idle();
        }

        self.current = self.ready.head();
        self.current
    }

    /// Posts `msg` to `dest`'s mailbox on behalf of the caller. If `dest` is
    /// waiting on the caller, it becomes ready; the caller keeps running
    /// either way.
    ///
    /// `dest` may be `TaskId::ALL`, which posts to every other task that
    /// accepts messages from the caller. That succeeds if anyone took the
    /// message, fails with `FifoFull` if everyone who would have was full,
    /// and fails with `Denied` if nobody would have.
    pub fn mbx_send(
        &mut self,
        dest: TaskId,
        msg: MessageWord,
    ) -> Result<(), MailboxError> {
        let caller = self.current;
        self.caller_index();

        let r = if dest == TaskId::ALL {
            self.broadcast(msg)
        } else {
            match dest.index().filter(|&i| i < N) {
                Some(index) => self.deliver(index, msg),
                None => Err(MailboxError::BadParam),
            }
        };
        ktrace!(
            self.trace,
            Trace::Send {
                from: caller,
                to: dest,
                status: abi::status_code(&r)
            }
        );
        r
    }

    fn deliver(
        &mut self,
        index: usize,
        msg: MessageWord,
    ) -> Result<(), MailboxError> {
        let sender = self.current;
        let task = &mut self.tasks[index];
        if !task.mailbox_permission().contains(sender) {
            return Err(MailboxError::Denied);
        }
        task.mailbox_mut().push(MailboxEntry { sender, msg })?;
        if task.waiting_mask().contains(sender) {
            self.ready.insert(&mut self.tasks, TaskId::for_index(index));
        }
        Ok(())
    }

    fn broadcast(&mut self, msg: MessageWord) -> Result<(), MailboxError> {
        let mut result = Err(MailboxError::Denied);
        for index in 0..N {
            if TaskId::for_index(index) == self.current {
                continue;
            }
            match self.deliver(index, msg) {
                Ok(()) => result = Ok(()),
                Err(MailboxError::FifoFull) if result.is_err() => {
                    result = Err(MailboxError::FifoFull)
                }
                Err(_) => {}
            }
        }
        result
    }

    /// Takes the oldest message in the caller's mailbox from a sender in its
    /// waiting mask.
    pub fn mbx_receive(&mut self) -> Result<MailboxEntry, MailboxError> {
        let caller = self.current;
        let task = &mut self.tasks[self.caller_index()];
        let mask = task.waiting_mask();
        let r = task.mailbox_mut().take_first_matching(mask);
        ktrace!(
            self.trace,
            Trace::Receive {
                task: caller,
                sender: r.map(|e| e.sender).unwrap_or(TaskId::NONE),
                status: abi::status_code(&r)
            }
        );
        r
    }

    /// Puts task `id` back in its boot state and makes it ready. Returns the
    /// task that should run next.
    pub fn restart_task(&mut self, id: TaskId) -> Result<TaskId, MailboxError> {
        let Some(index) = id.index().filter(|&i| i < N) else {
            return Err(MailboxError::BadParam);
        };
        ktrace!(self.trace, Trace::Restart(id));

        self.ready.remove(&mut self.tasks, id);
        self.tasks[index].reset();
        self.recreate_context(id);
        self.ready.insert(&mut self.tasks, id);
        Ok(self.schedule())
    }

    /// Has the architecture layer rebuild `id`'s context from its
    /// descriptor, so it will start over from its entry point.
    pub(crate) fn recreate_context(&mut self, id: TaskId) {
        if let Some(task) = id.index().and_then(|i| self.tasks.get_mut(i)) {
            let desc = task.descriptor();
            self.arch.create_context(id, desc, task.save_mut());
        }
    }

    /// Hands the CPU from `prev` to `next` at the architecture level.
    pub(crate) fn switch_to(&mut self, prev: TaskId, next: TaskId) {
        ktrace!(
            self.trace,
            Trace::Switch {
                from: prev,
                to: next
            }
        );
        self.arch.switch_address_space(prev, next);
        if let Some(task) = next.index().and_then(|i| self.tasks.get(i)) {
            self.arch.set_current_task(next, task.save());
        }
    }

    /// The running task.
    pub fn current(&self) -> TaskId {
        self.current
    }

    pub fn interrupt_task(&self) -> TaskId {
        self.interrupt_task
    }

    /// Ready tasks, in the order they would run.
    pub fn ready_tasks(&self) -> ReadyIter<'_> {
        self.ready.iter(&self.tasks)
    }

    pub fn is_ready(&self, id: TaskId) -> bool {
        self.ready.contains(&self.tasks, id)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.index()?)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Saved registers of task `id`, for trap entry code to fill in and for
    /// syscall handlers to read arguments from.
    pub fn task_save_mut(&mut self, id: TaskId) -> Option<&mut SavedState> {
        Some(self.tasks.get_mut(id.index()?)?.save_mut())
    }

    pub fn trace(&self) -> &KernelTrace {
        &self.trace
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn arch_mut(&mut self) -> &mut A {
        &mut self.arch
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::arch::FakeArch;
    use abi::{Priority, SectionDesc, SectionKind};

    /// Builds a descriptor with usable sections. `senders` lists the task
    /// indices allowed to post to this one.
    pub(crate) fn desc(priority: u8, senders: &[usize]) -> TaskDesc {
        let section = SectionDesc {
            virtual_address: 0x2000_0000,
            size: 0x400,
        };
        TaskDesc {
            priority: Priority(priority),
            mailbox_permission: MailboxMask(
                senders.iter().fold(0, |m, &i| m | 1 << i),
            ),
            text: SectionDesc {
                virtual_address: 0x0800_0000,
                size: 0x1000,
            },
            bss: section,
            stack: section,
        }
    }

    pub(crate) fn everyone(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    pub(crate) fn make<const N: usize>(
        descs: [TaskDesc; N],
        interrupt_task: TaskId,
    ) -> Kernel<FakeArch, N> {
        let descs: &'static [TaskDesc; N] = Box::leak(Box::new(descs));
        Kernel::new(descs, interrupt_task, FakeArch::new()).unwrap()
    }

    pub(crate) fn boot<const N: usize>(
        descs: [TaskDesc; N],
        interrupt_task: TaskId,
    ) -> Kernel<FakeArch, N> {
        let mut k = make(descs, interrupt_task);
        k.init().unwrap();
        k
    }

    fn ready_ids<const N: usize>(k: &Kernel<FakeArch, N>) -> Vec<i8> {
        k.ready_tasks().map(|t| t.0).collect()
    }

    #[test]
    fn init_readies_everything_in_priority_order() {
        let k = boot(
            [desc(1, &[]), desc(3, &[]), desc(2, &[]), desc(3, &[])],
            TaskId::NONE,
        );
        assert_eq!(ready_ids(&k), [1, 3, 2, 0]);
        assert_eq!(k.current(), TaskId(1));

        let arch = k.arch();
        let created: Vec<i8> = arch.contexts_created.iter().map(|t| t.0).collect();
        assert_eq!(created, [0, 1, 2, 3]);
        assert_eq!(arch.space_switches, [(TaskId::NONE, TaskId(1))]);
        assert_eq!(arch.current, TaskId(1));
        assert_eq!(
            k.trace().iter().find(|e| matches!(e.payload, Trace::Init { .. }))
                .map(|e| e.payload),
            Some(Trace::Init { first: TaskId(1) })
        );
    }

    #[test]
    fn init_resets_state() {
        let mut k = boot([desc(2, &[1]), desc(1, &[])], TaskId::NONE);
        k.wait(MailboxMask::ALL);
        let _ = k.mbx_send(TaskId(0), 5);
        assert!(!k.task(TaskId(0)).unwrap().mailbox().is_empty());

        assert_eq!(k.init(), Ok(TaskId(0)));
        let t0 = k.task(TaskId(0)).unwrap();
        assert!(t0.mailbox().is_empty());
        assert_eq!(t0.waiting_mask(), MailboxMask::EMPTY);
        assert_eq!(ready_ids(&k), [0, 1]);
    }

    #[test]
    fn init_rejects_empty_sections() {
        let mut bad = desc(1, &[]);
        bad.stack.size = 0;
        let mut k = make([desc(1, &[]), bad], TaskId::NONE);
        assert_eq!(
            k.init(),
            Err(ConfigError::EmptySection {
                task: TaskId(1),
                section: SectionKind::Stack,
            })
        );
        assert_eq!(k.current(), TaskId::NONE);
    }

    #[test]
    fn new_rejects_bad_tables() {
        let too_many: [TaskDesc; MAX_TASKS + 1] =
            core::array::from_fn(|_| desc(1, &[]));
        let too_many: &'static _ = Box::leak(Box::new(too_many));
        assert_eq!(
            Kernel::new(too_many, TaskId::NONE, FakeArch::new()).err(),
            Some(ConfigError::TooManyTasks {
                count: MAX_TASKS + 1
            })
        );

        let two: &'static _ = Box::leak(Box::new([desc(1, &[]), desc(1, &[])]));
        assert_eq!(
            Kernel::new(two, TaskId(2), FakeArch::new()).err(),
            Some(ConfigError::BadInterruptTask(TaskId(2)))
        );
        assert_eq!(
            Kernel::new(two, TaskId::ALL, FakeArch::new()).err(),
            Some(ConfigError::BadInterruptTask(TaskId::ALL))
        );
    }

    #[test]
    fn yield_round_robins_equal_priorities() {
        let mut k = boot([desc(1, &[]), desc(1, &[]), desc(1, &[])], TaskId::NONE);
        let mut seen = vec![k.current().0];
        for _ in 0..5 {
            seen.push(k.yield_task().0);
        }
        assert_eq!(seen, [0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn yield_never_passes_to_lower_priority() {
        let mut k = boot([desc(1, &[]), desc(2, &[])], TaskId::NONE);
        assert_eq!(k.current(), TaskId(1));
        assert_eq!(k.yield_task(), TaskId(1));
        assert_eq!(ready_ids(&k), [1, 0]);
    }

    #[test]
    fn wait_blocks_until_a_matching_send() {
        // 0 is the more important receiver; 1 sends.
        let mut k = boot([desc(2, &[1]), desc(1, &[])], TaskId::NONE);
        assert_eq!(k.current(), TaskId(0));

        let (r, next) = k.wait(MailboxMask::ALL);
        assert_eq!(r, Ok(()));
        assert_eq!(next, TaskId(1));
        assert!(!k.is_ready(TaskId(0)));
        // The mask was narrowed to what 0 accepts.
        assert_eq!(
            k.task(TaskId(0)).unwrap().waiting_mask(),
            MailboxMask::of(TaskId(1))
        );

        assert_eq!(k.mbx_send(TaskId(0), 42), Ok(()));
        // Sending doesn't switch tasks by itself...
        assert_eq!(k.current(), TaskId(1));
        assert!(k.is_ready(TaskId(0)));
        // ...but the next scheduling decision picks the receiver.
        assert_eq!(k.yield_task(), TaskId(0));

        assert_eq!(
            k.mbx_receive(),
            Ok(MailboxEntry {
                sender: TaskId(1),
                msg: 42
            })
        );
        assert_eq!(k.mbx_receive(), Err(MailboxError::FifoEmpty));
    }

    #[test]
    fn wait_satisfied_by_posted_message() {
        // 1 runs first and posts before 0 ever waits.
        let mut k = boot([desc(1, &[1]), desc(2, &[])], TaskId::NONE);
        assert_eq!(k.current(), TaskId(1));
        assert_eq!(k.mbx_send(TaskId(0), 7), Ok(()));
        // Nobody is waiting, so nothing changed in the ready list.
        assert_eq!(ready_ids(&k), [1, 0]);
        assert_eq!(k.exit(), TaskId(0));

        let (r, next) = k.wait(MailboxMask::of(TaskId(1)));
        assert_eq!(r, Ok(()));
        assert_eq!(next, TaskId(0));
        assert!(k.is_ready(TaskId(0)));
        assert_eq!(k.mbx_receive().map(|e| e.msg), Ok(7));
    }

    #[test]
    fn wait_on_nothing_is_a_yield() {
        let mut k = boot([desc(1, &[]), desc(1, &[])], TaskId::NONE);
        let (r, next) = k.wait(MailboxMask::EMPTY);
        assert_eq!(r, Ok(()));
        assert_eq!(next, TaskId(1));
        assert_eq!(ready_ids(&k), [1, 0]);
    }

    #[test]
    fn wait_drops_senders_without_permission() {
        // 0 only accepts 1, so waiting on 2 alone degrades to a yield.
        let mut k = boot(
            [desc(1, &[1]), desc(1, &[]), desc(1, &[])],
            TaskId::NONE,
        );
        let (_, next) = k.wait(MailboxMask::of(TaskId(2)));
        assert_eq!(next, TaskId(1));
        assert!(k.is_ready(TaskId(0)));
        assert_eq!(
            k.task(TaskId(0)).unwrap().waiting_mask(),
            MailboxMask::EMPTY
        );
    }

    #[test]
    fn send_to_non_waiting_task_leaves_it_blocked() {
        // 0 waits on 2 only; a message from 1 must not wake it.
        let mut k = boot(
            [desc(3, &[1, 2]), desc(2, &[]), desc(1, &[])],
            TaskId::NONE,
        );
        assert_eq!(k.wait(MailboxMask::of(TaskId(2))).1, TaskId(1));
        assert_eq!(k.mbx_send(TaskId(0), 1), Ok(()));
        assert!(!k.is_ready(TaskId(0)));

        assert_eq!(k.exit(), TaskId(2));
        assert_eq!(k.mbx_send(TaskId(0), 2), Ok(()));
        assert!(k.is_ready(TaskId(0)));
        assert_eq!(k.yield_task(), TaskId(0));

        // Receive skips the message from 1, which stays buffered.
        assert_eq!(
            k.mbx_receive(),
            Ok(MailboxEntry {
                sender: TaskId(2),
                msg: 2
            })
        );
        assert_eq!(k.mbx_receive(), Err(MailboxError::ReceiveMismatch));
        let left: Vec<_> =
            k.task(TaskId(0)).unwrap().mailbox().iter().copied().collect();
        assert_eq!(
            left,
            [MailboxEntry {
                sender: TaskId(1),
                msg: 1
            }]
        );
    }

    #[test]
    fn mailbox_fills_up() {
        let mut k = boot([desc(1, &[1]), desc(2, &[])], TaskId::NONE);
        for i in 0..abi::TASK_MBX_COUNT {
            assert_eq!(k.mbx_send(TaskId(0), i as MessageWord), Ok(()));
        }
        assert_eq!(k.mbx_send(TaskId(0), 99), Err(MailboxError::FifoFull));
        assert_eq!(
            k.task(TaskId(0)).unwrap().mailbox().len(),
            abi::TASK_MBX_COUNT
        );

        assert_eq!(k.exit(), TaskId(0));
        k.wait(MailboxMask::ALL);
        for i in 0..abi::TASK_MBX_COUNT {
            assert_eq!(k.mbx_receive().map(|e| e.msg), Ok(i as MessageWord));
        }
        assert_eq!(k.mbx_receive(), Err(MailboxError::FifoEmpty));
    }

    #[test]
    fn receive_makes_room() {
        // 0 runs first and accepts only 1; 1 is the sender.
        let mut k = boot([desc(2, &[1]), desc(1, &[])], TaskId::NONE);
        assert_eq!(k.wait(MailboxMask::ALL).1, TaskId(1));
        for i in 0..abi::TASK_MBX_COUNT {
            assert_eq!(k.mbx_send(TaskId(0), i as MessageWord), Ok(()));
        }
        assert_eq!(k.mbx_send(TaskId(0), 50), Err(MailboxError::FifoFull));

        assert_eq!(k.yield_task(), TaskId(0));
        assert_eq!(k.mbx_receive().map(|e| e.msg), Ok(0));
        assert_eq!(k.wait(MailboxMask::ALL).1, TaskId(0));
        assert_eq!(k.exit(), TaskId(1));

        assert_eq!(k.mbx_send(TaskId(0), 60), Ok(()));
        assert_eq!(k.mbx_send(TaskId(0), 61), Err(MailboxError::FifoFull));
        let msgs: Vec<MessageWord> = k
            .task(TaskId(0))
            .unwrap()
            .mailbox()
            .iter()
            .map(|e| e.msg)
            .collect();
        let mut expected: Vec<MessageWord> =
            (1..abi::TASK_MBX_COUNT).map(|i| i as MessageWord).collect();
        expected.push(60);
        assert_eq!(msgs, expected);
    }

    #[test]
    fn denied_send_changes_nothing() {
        let mut k = boot([desc(3, &[]), desc(2, &[])], TaskId::NONE);
        k.wait(MailboxMask::ALL);
        // 0 accepts nobody, so its wait degraded to a yield.
        assert_eq!(k.current(), TaskId(0));
        assert_eq!(k.exit(), TaskId(1));

        let before: Vec<i8> = ready_ids(&k);
        assert_eq!(k.mbx_send(TaskId(0), 1), Err(MailboxError::Denied));
        assert!(k.task(TaskId(0)).unwrap().mailbox().is_empty());
        assert_eq!(ready_ids(&k), before);
    }

    #[test]
    fn send_to_bogus_task_is_bad_param() {
        let mut k = boot([desc(1, &[0])], TaskId::NONE);
        assert_eq!(k.mbx_send(TaskId(1), 0), Err(MailboxError::BadParam));
        assert_eq!(k.mbx_send(TaskId::NONE, 0), Err(MailboxError::BadParam));
        assert_eq!(k.mbx_send(TaskId(40), 0), Err(MailboxError::BadParam));
    }

    #[test]
    fn send_to_self() {
        let mut k = boot([desc(1, &[0])], TaskId::NONE);
        assert_eq!(k.mbx_send(TaskId(0), 3), Ok(()));
        assert_eq!(k.wait(MailboxMask::ALL).1, TaskId(0));
        assert_eq!(k.mbx_receive().map(|e| e.msg), Ok(3));
    }

    #[test]
    fn broadcast_reaches_permitting_tasks() {
        let n = 4;
        let mut k = boot(
            [
                desc(4, &[]),
                desc(1, &everyone(n)),
                desc(1, &[]),
                desc(1, &[0]),
            ],
            TaskId::NONE,
        );
        assert_eq!(k.mbx_send(TaskId::ALL, 9), Ok(()));
        let lens: Vec<usize> = k
            .tasks()
            .iter()
            .map(|t| t.mailbox().len())
            .collect();
        assert_eq!(lens, [0, 1, 0, 1]);

        // Fill them up; then everyone willing is full.
        for _ in 1..abi::TASK_MBX_COUNT {
            assert_eq!(k.mbx_send(TaskId::ALL, 9), Ok(()));
        }
        assert_eq!(k.mbx_send(TaskId::ALL, 9), Err(MailboxError::FifoFull));
    }

    #[test]
    fn broadcast_nobody_listening_is_denied() {
        let mut k = boot([desc(2, &[0]), desc(1, &[])], TaskId::NONE);
        // 0 may post to itself, but a broadcast skips the sender.
        assert_eq!(k.mbx_send(TaskId::ALL, 1), Err(MailboxError::Denied));
        assert!(k.task(TaskId(0)).unwrap().mailbox().is_empty());
    }

    #[test]
    fn broadcast_wakes_waiters() {
        let mut k = boot(
            [desc(3, &[2]), desc(3, &[2]), desc(1, &[])],
            TaskId::NONE,
        );
        assert_eq!(k.wait(MailboxMask::ALL).1, TaskId(1));
        assert_eq!(k.wait(MailboxMask::ALL).1, TaskId(2));
        assert_eq!(k.mbx_send(TaskId::ALL, 5), Ok(()));
        assert_eq!(ready_ids(&k), [0, 1, 2]);
    }

    #[test]
    fn exit_removes_for_good() {
        let mut k = boot([desc(2, &[1]), desc(1, &[])], TaskId::NONE);
        k.wait(MailboxMask::ALL);
        assert_eq!(k.current(), TaskId(1));
        // Wake 0 and let it exit.
        k.mbx_send(TaskId(0), 0).unwrap();
        assert_eq!(k.yield_task(), TaskId(0));
        assert_eq!(k.exit(), TaskId(1));
        assert!(!k.is_ready(TaskId(0)));

        // Further sends are buffered but don't bring it back.
        assert_eq!(k.mbx_send(TaskId(0), 1), Ok(()));
        assert!(!k.is_ready(TaskId(0)));
        assert_eq!(k.yield_task(), TaskId(1));
        assert_eq!(ready_ids(&k), [1]);
    }

    #[test]
    fn pending_interrupt_readies_interrupt_task() {
        let mut k = boot([desc(3, &[]), desc(1, &[])], TaskId(0));
        // The interrupt task parks itself.
        assert_eq!(k.exit(), TaskId(1));
        assert_eq!(k.yield_task(), TaskId(1));

        k.arch_mut().raise_interrupt();
        assert_eq!(k.yield_task(), TaskId(0));
        assert!(k.trace().iter().any(|e| e.payload
            == Trace::InterruptTaskReady(TaskId(0))));

        // Still pending, so parking again just readies it again.
        assert_eq!(k.exit(), TaskId(0));
        k.arch_mut().acknowledge_interrupt();
        assert_eq!(k.exit(), TaskId(1));
    }

    #[test]
    fn idle_until_interrupt() {
        let mut k = boot([desc(2, &[]), desc(1, &[])], TaskId(0));
        assert_eq!(k.exit(), TaskId(1));

        k.arch_mut().interrupt_during_idle();
        // 1 was the last ready task.
        assert_eq!(k.exit(), TaskId(0));
        assert_eq!(k.arch().idle_count, 1);
        assert_eq!(ready_ids(&k), [0]);
    }

    #[test]
    #[should_panic(expected = "idle with no interrupt scheduled")]
    fn nothing_ready_and_no_interrupt_idles_forever() {
        let mut k = boot([desc(1, &[])], TaskId::NONE);
        let _ = k.exit();
    }

    #[test]
    fn restart_brings_a_task_back() {
        let mut k = boot([desc(2, &[0, 1]), desc(1, &[])], TaskId::NONE);
        k.mbx_send(TaskId(0), 1).unwrap();
        assert_eq!(k.exit(), TaskId(1));
        assert_eq!(k.arch().contexts_created.len(), 2);

        assert_eq!(k.restart_task(TaskId(0)), Ok(TaskId(0)));
        let t0 = k.task(TaskId(0)).unwrap();
        assert!(t0.mailbox().is_empty());
        assert_eq!(k.arch().contexts_created.last(), Some(&TaskId(0)));
        assert_eq!(k.restart_task(TaskId(5)), Err(MailboxError::BadParam));
    }

    #[test]
    fn trace_records_operations() {
        let mut k = boot([desc(1, &[]), desc(1, &[])], TaskId::NONE);
        k.yield_task();
        k.yield_task();
        let yields = k
            .trace()
            .iter()
            .filter(|e| matches!(e.payload, Trace::Yield(_)))
            .count();
        assert_eq!(yields, 2);
        let last = k.trace().last_entry().unwrap();
        assert_eq!(last.payload, Trace::Yield(TaskId(1)));
    }
}
