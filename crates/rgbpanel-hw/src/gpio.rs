//! Memory-mapped access to the Raspberry Pi GPIO register block.

use crate::{Error, Result};
use std::ffi::CString;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Device exposing the GPIO registers without root.
pub const GPIO_DEVICE: &str = "/dev/gpiomem";

const BLOCK_SIZE: usize = 4096;

// Register word offsets.
const GPSET0: usize = 0x1C / 4;
const GPCLR0: usize = 0x28 / 4;

/// Highest GPIO on the 40 pin header.
const MAX_GPIO_BIT: u32 = 27;

/// Sleeps shorter than this are busy waited.
const NANOSLEEP_OVERHEAD: Duration = Duration::from_micros(12);
const MINIMUM_NANOSLEEP: Duration = Duration::from_micros(5);

/// Exclusive handle on the GPIO registers.
///
/// The device is locked with `flock`, so a second driver process fails
/// with [`Error::GpioBusy`] instead of garbling the panel.
pub struct Gpio {
    fd: libc::c_int,
    registers: *mut u32,
    slowdown: u8,
    output_bits: u32,
}

// The mapping is owned by the handle and only touched through &mut self
// or by the single refresh thread that owns it.
unsafe impl Send for Gpio {}

impl Gpio {
    /// Opens, locks and maps the GPIO register block.
    pub fn acquire(slowdown: u8) -> Result<Self> {
        let path = CString::new(GPIO_DEVICE).map_err(|e| Error::HardwareAccess {
            device: GPIO_DEVICE.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;

        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(Error::HardwareAccess {
                device: GPIO_DEVICE.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(Error::GpioBusy(GPIO_DEVICE.to_string()));
            }
            return Err(Error::HardwareAccess {
                device: GPIO_DEVICE.to_string(),
                source: err,
            });
        }

        let mapped = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                BLOCK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if mapped == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::HardwareAccess {
                device: GPIO_DEVICE.to_string(),
                source: err,
            });
        }

        info!("Mapped GPIO registers from {}", GPIO_DEVICE);
        Ok(Self {
            fd,
            registers: mapped as *mut u32,
            slowdown,
            output_bits: 0,
        })
    }

    /// Configures the given pins as outputs. Returns the pins that were newly
    /// configured.
    pub fn init_outputs(&mut self, bits: u32) -> u32 {
        let bits = bits & !self.output_bits;
        for pin in 0..=MAX_GPIO_BIT {
            if bits & (1 << pin) == 0 {
                continue;
            }
            let word = (pin / 10) as usize;
            let shift = (pin % 10) * 3;
            unsafe {
                let fsel = self.registers.add(word);
                // Input first, then output.
                let value = std::ptr::read_volatile(fsel) & !(7 << shift);
                std::ptr::write_volatile(fsel, value);
                std::ptr::write_volatile(fsel, value | (1 << shift));
            }
        }
        self.output_bits |= bits;
        debug!("GPIO outputs: {:#010x}", self.output_bits);
        bits
    }

    /// Sets the pins that are 1 in `bits`.
    #[inline]
    pub fn set_bits(&mut self, bits: u32) {
        if bits == 0 {
            return;
        }
        self.write_register(GPSET0, bits);
        self.delay();
    }

    /// Clears the pins that are 1 in `bits`.
    #[inline]
    pub fn clear_bits(&mut self, bits: u32) {
        if bits == 0 {
            return;
        }
        self.write_register(GPCLR0, bits);
        self.delay();
    }

    /// Writes the pins selected by `mask` to the values in `bits`.
    #[inline]
    pub fn write_masked_bits(&mut self, bits: u32, mask: u32) {
        self.write_register(GPCLR0, !bits & mask);
        self.write_register(GPSET0, bits & mask);
        self.delay();
    }

    #[inline]
    fn write_register(&mut self, word: usize, value: u32) {
        unsafe { std::ptr::write_volatile(self.registers.add(word), value) };
    }

    #[inline]
    fn delay(&mut self) {
        for _ in 0..self.slowdown {
            self.write_register(GPCLR0, 0);
        }
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.registers as *mut libc::c_void, BLOCK_SIZE);
            libc::close(self.fd);
        }
        debug!("Released {}", GPIO_DEVICE);
    }
}

/// Waits for `nanos` nanoseconds, sleeping for the bulk of long waits and
/// busy waiting the remainder.
pub fn sleep_nanos(nanos: u64) {
    let wanted = Duration::from_nanos(nanos);
    let start = Instant::now();
    if wanted > NANOSLEEP_OVERHEAD + MINIMUM_NANOSLEEP {
        std::thread::sleep(wanted - NANOSLEEP_OVERHEAD);
    }
    while start.elapsed() < wanted {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_nanos_waits_at_least() {
        for nanos in [0u64, 500, 20_000, 200_000] {
            let start = Instant::now();
            sleep_nanos(nanos);
            assert!(start.elapsed() >= Duration::from_nanos(nanos));
        }
    }

    #[test]
    #[ignore = "requires a Raspberry Pi with /dev/gpiomem"]
    fn test_acquire_is_exclusive() {
        let mut gpio = Gpio::acquire(1).unwrap();
        assert!(matches!(Gpio::acquire(1), Err(Error::GpioBusy(_))));
        assert_eq!(gpio.init_outputs(1 << 18), 1 << 18);
        assert_eq!(gpio.init_outputs(1 << 18), 0);
        drop(gpio);
        assert!(Gpio::acquire(1).is_ok());
    }
}
