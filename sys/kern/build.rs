// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use build_kconfig::{AppConfig, KernelConfig, SectionConfig};

fn main() -> anyhow::Result<()> {
    println!("cargo:rustc-check-cfg=cfg(moth_kconfig)");
    println!("cargo:rerun-if-env-changed=MOTH_KCONFIG");
    println!("cargo:rerun-if-env-changed=MOTH_APP_TOML");

    // Host builds (unit tests, mostly) run without a task table; the startup
    // code that needs one is compiled out in that case.
    let Some(kconfig) = load_kconfig()? else {
        return Ok(());
    };

    generate_statics(&kconfig)?;
    println!("cargo:rustc-cfg=moth_kconfig");

    Ok(())
}

/// Finds the kernel configuration, preferring an already-resolved RON
/// description over an app TOML that we have to resolve ourselves.
fn load_kconfig() -> anyhow::Result<Option<KernelConfig>> {
    if let Ok(text) = env::var("MOTH_KCONFIG") {
        let kconfig = ron::de::from_str(&text)
            .context("parsing MOTH_KCONFIG as RON")?;
        return Ok(Some(kconfig));
    }

    if let Some(path) = env::var_os("MOTH_APP_TOML") {
        let path = PathBuf::from(path);
        println!("cargo:rerun-if-changed={}", path.display());
        let app = AppConfig::from_file(&path)?;
        let kconfig = app
            .resolve()
            .with_context(|| format!("resolving {}", path.display()))?;
        return Ok(Some(kconfig));
    }

    Ok(None)
}

fn generate_statics(kconfig: &KernelConfig) -> anyhow::Result<()> {
    let out = &PathBuf::from(
        env::var_os("OUT_DIR").context("OUT_DIR not set")?,
    );
    let mut file = File::create(out.join("kconfig.rs"))?;

    writeln!(file, "// See build.rs for details")?;

    writeln!(
        file,
        "pub const MOTH_TASK_COUNT: usize = {};",
        kconfig.tasks.len()
    )?;
    writeln!(
        file,
        "pub const MOTH_INTERRUPT_TASK: abi::TaskId = abi::TaskId({});",
        kconfig.interrupt_task.map(|i| i as i8).unwrap_or(-1)
    )?;

    writeln!(
        file,
        "pub static MOTH_INTERRUPT_IRQS: [u32; {}] = {:?};",
        kconfig.irqs.len(),
        kconfig.irqs,
    )?;

    writeln!(
        file,
        "pub static MOTH_TASK_DESCS: [abi::TaskDesc; MOTH_TASK_COUNT] = ["
    )?;
    for task in &kconfig.tasks {
        writeln!(file, "    // {}", task.name)?;
        writeln!(file, "    abi::TaskDesc {{")?;
        writeln!(file, "        priority: abi::Priority({}),", task.priority)?;
        writeln!(
            file,
            "        mailbox_permission: abi::MailboxMask({:#010x}),",
            task.mailbox_permission
        )?;
        write_section(&mut file, "text", &task.text)?;
        write_section(&mut file, "bss", &task.bss)?;
        write_section(&mut file, "stack", &task.stack)?;
        writeln!(file, "    }},")?;
    }
    writeln!(file, "];")?;

    Ok(())
}

fn write_section(
    file: &mut File,
    name: &str,
    section: &SectionConfig,
) -> anyhow::Result<()> {
    writeln!(
        file,
        "        {name}: abi::SectionDesc {{ \
         virtual_address: {:#010x}, size: {:#x} }},",
        section.address, section.size
    )?;
    Ok(())
}
