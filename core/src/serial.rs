//! Serial output primitives.
//!
//! Minimal, no-allocation output to COM1 (0x3F8). Port I/O only happens on
//! bare-metal x86_64 targets; elsewhere output is discarded.

use core::fmt;

/// Serial port base address (COM1).
const SERIAL_PORT: u16 = 0x3F8;

/// Write a single byte to COM1 serial port.
#[cfg(all(target_arch = "x86_64", any(target_os = "none", target_os = "uefi")))]
#[inline]
pub fn write_byte(byte: u8) {
    unsafe {
        // Wait for transmit buffer empty (bounded)
        let mut retries = 0u32;
        loop {
            let status: u8;
            core::arch::asm!(
                "in al, dx",
                in("dx") SERIAL_PORT + 5,
                out("al") status,
                options(nomem, nostack, preserves_flags)
            );
            if status & 0x20 != 0 {
                break;
            }
            retries += 1;
            if retries > 100 {
                return; // Port not responding
            }
            core::hint::spin_loop();
        }
        core::arch::asm!(
            "out dx, al",
            in("dx") SERIAL_PORT,
            in("al") byte,
            options(nomem, nostack, preserves_flags)
        );
    }
}

#[cfg(not(all(target_arch = "x86_64", any(target_os = "none", target_os = "uefi"))))]
#[inline]
pub fn write_byte(_byte: u8) {
    let _ = SERIAL_PORT;
}

/// Write a string to serial port.
#[inline]
pub fn print(s: &str) {
    for byte in s.bytes() {
        write_byte(byte);
    }
}

/// Write a string with newline.
#[inline]
pub fn println(s: &str) {
    print(s);
    print("\r\n");
}

/// `core::fmt` sink for the serial port.
pub struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        print(s);
        Ok(())
    }
}
