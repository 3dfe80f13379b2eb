// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application description, as written by humans in `app.toml`, and the
//! resolved kernel configuration derived from it.
//!
//! The kernel build script consumes a `KernelConfig`, either resolved here
//! from an app TOML file or handed over pre-resolved as RON.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Wildcard accepted in a task's `senders` list, meaning "every task."
pub const ALL_SENDERS: &str = "*";

/// Top-level contents of an `app.toml`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct AppConfig {
    pub name: String,
    #[serde(default)]
    pub kernel: KernelSection,
    /// Tasks in the app image. We use an `IndexMap` here because the order
    /// of tasks in the file is the order of the task table.
    pub tasks: IndexMap<String, TaskSection>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct KernelSection {
    /// Task made ready whenever an external interrupt is pending.
    pub interrupt_task: Option<String>,
    /// Interrupt lines that count as "an external interrupt."
    #[serde(default)]
    pub irqs: Vec<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct TaskSection {
    pub priority: u8,
    /// Names of tasks allowed to post to this task's mailbox.
    #[serde(default)]
    pub senders: Vec<String>,
    pub text: SectionConfig,
    pub bss: SectionConfig,
    pub stack: SectionConfig,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionConfig {
    pub address: u32,
    pub size: u32,
}

/// Application configuration passed into the kernel build.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Tasks in the app image. The order of tasks is significant.
    pub tasks: Vec<TaskConfig>,
    /// Index of the task that handles external interrupts, if any.
    pub interrupt_task: Option<usize>,
    pub irqs: Vec<u32>,
}

/// Record describing a single task.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub priority: u8,
    /// Bit `i` set means task `i` may post to this task.
    pub mailbox_permission: u32,
    pub text: SectionConfig,
    pub bss: SectionConfig,
    pub stack: SectionConfig,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn task_index(&self, name: &str) -> Option<usize> {
        self.tasks.get_index_of(name)
    }

    /// Checks the app description for consistency and turns names into the
    /// indices and masks the kernel works with.
    pub fn resolve(&self) -> Result<KernelConfig> {
        if self.tasks.is_empty() {
            bail!("app {} has no tasks", self.name);
        }
        if self.tasks.len() > abi::MAX_TASKS {
            bail!(
                "app {} has {} tasks, but at most {} are supported",
                self.name,
                self.tasks.len(),
                abi::MAX_TASKS
            );
        }

        let mut tasks = Vec::with_capacity(self.tasks.len());
        for (name, task) in &self.tasks {
            let mailbox_permission = self
                .sender_mask(&task.senders)
                .with_context(|| format!("task {name}"))?;

            for (section, config) in
                [("text", &task.text), ("bss", &task.bss), ("stack", &task.stack)]
            {
                if config.size == 0 {
                    bail!("task {name} has an empty {section} section");
                }
                if config.address.checked_add(config.size).is_none() {
                    bail!(
                        "task {name}: {section} section at {:#x} \
                         wraps the address space",
                        config.address
                    );
                }
            }

            tasks.push(TaskConfig {
                name: name.clone(),
                priority: task.priority,
                mailbox_permission,
                text: task.text,
                bss: task.bss,
                stack: task.stack,
            });
        }

        let interrupt_task = match &self.kernel.interrupt_task {
            Some(name) => Some(self.task_index(name).ok_or_else(|| {
                anyhow!("interrupt task {name} is not a task in this app")
            })?),
            None => None,
        };
        if interrupt_task.is_none() && !self.kernel.irqs.is_empty() {
            bail!("irqs are listed but no interrupt-task is named");
        }

        Ok(KernelConfig {
            tasks,
            interrupt_task,
            irqs: self.kernel.irqs.clone(),
        })
    }

    fn sender_mask(&self, senders: &[String]) -> Result<u32> {
        let mut mask = 0u32;
        for sender in senders {
            if sender == ALL_SENDERS {
                mask = !0;
                continue;
            }
            let index = self
                .task_index(sender)
                .ok_or_else(|| anyhow!("unknown sender {sender}"))?;
            mask |= 1 << index;
        }
        Ok(mask)
    }
}

impl KernelConfig {
    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string(self)?)
    }

    pub fn from_ron(text: &str) -> Result<Self> {
        Ok(ron::de::from_str(text)?)
    }

    /// Converts the config into the descriptors the kernel runs from.
    pub fn task_descs(&self) -> Vec<abi::TaskDesc> {
        let section = |s: &SectionConfig| abi::SectionDesc {
            virtual_address: s.address,
            size: s.size,
        };
        self.tasks
            .iter()
            .map(|t| abi::TaskDesc {
                priority: abi::Priority(t.priority),
                mailbox_permission: abi::MailboxMask(t.mailbox_permission),
                text: section(&t.text),
                bss: section(&t.bss),
                stack: section(&t.stack),
            })
            .collect()
    }
}
