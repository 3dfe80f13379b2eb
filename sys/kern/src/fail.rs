// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the kernel does when it can't go on.
//!
//! The only expected way here is a task table that `init` rejects, or a
//! kernel panic. Either way `die` leaves a note for the debugger and parks the
//! CPU:
//!
//! - `KERNEL_HAS_FAILED` becomes true.
//! - `KERNEL_EPITAPH` receives the message as UTF-8, truncated to fit, with
//!   NUL padding after it.

use core::fmt::{Display, Write};
use core::sync::atomic::{fence, Ordering};

const EPITAPH_LEN: usize = 128;

#[used]
static mut KERNEL_HAS_FAILED: bool = false;

#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

/// Records `msg` and never returns.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    record(&msg);
    halt()
}

#[inline(never)]
fn record(msg: &dyn Display) {
    // Safety: the kernel runs with interrupts off, so nothing else can be in
    // here; the flag catches us coming back through a nested panic.
    let already = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if already {
        // Formatting the first message failed. Keep whatever it managed.
        return;
    }

    // Safety: only the first failure gets past the check above.
    let buf = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) };
    let mut epitaph = Epitaph { buf, len: 0 };
    write!(epitaph, "{msg}").ok();
}

fn halt() -> ! {
    loop {
        fence(Ordering::SeqCst);
    }
}

/// Fills a byte buffer front to back, dropping what doesn't fit.
struct Epitaph<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl Write for Epitaph<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = &mut self.buf[self.len..];
        let n = s.len().min(room.len());
        room[..n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epitaph_truncates() {
        let mut buf = [0u8; 8];
        let mut e = Epitaph {
            buf: &mut buf,
            len: 0,
        };
        write!(e, "task {} failed", 3).unwrap();
        assert_eq!(e.len, 8);
        assert_eq!(&buf, b"task 3 f");
    }

    #[test]
    fn epitaph_pads_short_messages() {
        let mut buf = [0u8; 8];
        let mut e = Epitaph {
            buf: &mut buf,
            len: 0,
        };
        e.write_str("oops").unwrap();
        assert_eq!(&buf, b"oops\0\0\0\0");
    }
}
