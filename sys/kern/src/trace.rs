// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel event trace.
//!
//! A fixed-size ring of recent scheduler and mailbox events, intended to be
//! read out of RAM by a debugger (or by tests). Each entry records the source
//! line that produced it, and consecutive identical entries from the same
//! line are folded into one with a repeat count, so an idle loop doesn't wipe
//! out the history.

use abi::TaskId;

/// Number of entries kept.
pub const TRACE_DEPTH: usize = 32;

/// Records an event in a kernel's trace ring, tagged with the current line.
macro_rules! ktrace {
    ($trace:expr, $payload:expr) => {
        $trace.entry(line!() as u16, $payload)
    };
}

/// Things worth remembering.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Init { first: TaskId },
    Wait { task: TaskId, mask: u32, blocked: bool },
    Yield(TaskId),
    Exit(TaskId),
    Send { from: TaskId, to: TaskId, status: i32 },
    Receive { task: TaskId, sender: TaskId, status: i32 },
    Idle,
    InterruptTaskReady(TaskId),
    Switch { from: TaskId, to: TaskId },
    Restart(TaskId),
    BadSyscall { task: TaskId, nr: u32 },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TraceEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// Ring buffer of `N` trace entries.
#[derive(Clone, Debug)]
pub struct TraceBuf<T: Copy + PartialEq, const N: usize> {
    /// Index of the most recent entry, or `None` before the first.
    pub last: Option<usize>,
    pub buffer: [TraceEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> TraceBuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [TraceEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // Treating None as an out-of-range index lets the first insertion
        // land in slot 0 without a special case.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = TraceEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };
        self.last = Some(ndx);
    }

    /// The most recent entry.
    pub fn last_entry(&self) -> Option<&TraceEntry<T>> {
        self.buffer.get(self.last?)
    }

    /// Recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry<T>> + '_ {
        let start = self.last.map(|l| l + 1).unwrap_or(0);
        (0..N)
            .map(move |i| &self.buffer[(start + i) % N])
            .filter(|e| e.count != 0)
    }
}

pub type KernelTrace = TraceBuf<Trace, TRACE_DEPTH>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_entry_lands_in_slot_zero() {
        let mut t: TraceBuf<u8, 4> = TraceBuf::new(0);
        assert!(t.last_entry().is_none());
        t.entry(10, 1);
        assert_eq!(t.last, Some(0));
        assert_eq!(t.buffer[0].count, 1);
        assert_eq!(t.buffer[0].generation, 1);
    }

    #[test]
    fn repeats_are_folded() {
        let mut t: TraceBuf<u8, 4> = TraceBuf::new(0);
        t.entry(10, 1);
        t.entry(10, 1);
        t.entry(10, 1);
        t.entry(11, 1);
        assert_eq!(t.buffer[0].count, 3);
        assert_eq!(t.last_entry().map(|e| e.line), Some(11));
    }

    #[test]
    fn wraps_and_bumps_generation() {
        let mut t: TraceBuf<u8, 2> = TraceBuf::new(0);
        for p in 1..=3 {
            t.entry(1, p);
        }
        assert_eq!(t.last, Some(0));
        assert_eq!(t.buffer[0].payload, 3);
        assert_eq!(t.buffer[0].generation, 2);
        let payloads: Vec<u8> = t.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, [2, 3]);
    }
}
