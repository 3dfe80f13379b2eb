// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The ready list.
//!
//! Ready tasks are kept in a doubly linked list threaded through the task
//! table by index, so no storage beyond the `next`/`prev` fields of each
//! `Task` is needed. The list is ordered by priority, most important first,
//! and tasks of equal priority keep the order in which they became ready. The
//! head of the list is the task that should be running.
//!
//! A task is in the list exactly when it is the head or has a link that isn't
//! `TaskId::NONE`; removal resets both links.

use abi::TaskId;

use crate::task::Task;

#[derive(Clone, Debug)]
pub struct ReadyList {
    head: TaskId,
}

impl Default for ReadyList {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyList {
    pub const fn new() -> Self {
        Self { head: TaskId::NONE }
    }

    /// The most important ready task, or `TaskId::NONE`.
    pub fn head(&self) -> TaskId {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Forgets every member. Links inside `tasks` are left alone; callers
    /// reset those as part of resetting the tasks themselves.
    pub fn clear(&mut self) {
        self.head = TaskId::NONE;
    }

    pub fn contains(&self, tasks: &[Task], id: TaskId) -> bool {
        let Some(task) = id.index().and_then(|i| tasks.get(i)) else {
            return false;
        };
        self.head == id || !task.next.is_none() || !task.prev.is_none()
    }

    /// Makes `id` ready. It goes behind every task of greater or equal
    /// priority and ahead of every task of lower priority. Inserting a task
    /// that is already in the list does nothing.
    pub fn insert(&mut self, tasks: &mut [Task], id: TaskId) {
        let Some(index) = id.index() else {
            return;
        };
        uassert!(index < tasks.len());
        if self.contains(tasks, id) {
            return;
        }

        let priority = tasks[index].priority();

        // Find the first task we outrank; we go in front of it.
        let mut prev = TaskId::NONE;
        let mut cur = self.head;
        while let Some(c) = cur.index() {
            if priority.is_more_important_than(tasks[c].priority()) {
                break;
            }
            prev = cur;
            cur = tasks[c].next;
        }

        tasks[index].prev = prev;
        tasks[index].next = cur;
        match prev.index() {
            Some(p) => tasks[p].next = id,
            None => self.head = id,
        }
        if let Some(c) = cur.index() {
            tasks[c].prev = id;
        }
    }

    /// Takes `id` out of the list. Removing a task that isn't there does
    /// nothing.
    pub fn remove(&mut self, tasks: &mut [Task], id: TaskId) {
        if !self.contains(tasks, id) {
            return;
        }
        let Some(index) = id.index() else {
            return;
        };

        let (prev, next) = (tasks[index].prev, tasks[index].next);
        match prev.index() {
            Some(p) => tasks[p].next = next,
            None => self.head = next,
        }
        if let Some(n) = next.index() {
            tasks[n].prev = prev;
        }

        tasks[index].prev = TaskId::NONE;
        tasks[index].next = TaskId::NONE;
    }

    /// Walks the list from the head.
    pub fn iter<'a>(&self, tasks: &'a [Task]) -> ReadyIter<'a> {
        ReadyIter {
            tasks,
            cur: self.head,
        }
    }
}

pub struct ReadyIter<'a> {
    tasks: &'a [Task],
    cur: TaskId,
}

impl Iterator for ReadyIter<'_> {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        let id = self.cur;
        let task = self.tasks.get(id.index()?)?;
        self.cur = task.next;
        Some(id)
    }
}
