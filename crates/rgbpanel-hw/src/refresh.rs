//! Refresh thread and vsync-synchronized buffer exchange.
//!
//! The refresh thread owns the active [`FrameBuffer`] and renders it through
//! a [`Panel`] over and over. Every completed cycle is a vsync pulse. A
//! buffer handed to [`RefreshEngine::swap_on_vsync`] is parked as pending
//! and taken over at the end of the first cycle whose pulse index is a
//! multiple of the requested frame rate fraction, so the panel never shows
//! a half-written frame.

use crate::config::HardwareConfig;
use crate::framebuffer::FrameBuffer;
use crate::panel::Panel;
use crate::{Error, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the refresh thread.
pub const THREAD_NAME: &str = "rgbpanel-refresh";

/// Timing behavior of the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshOptions {
    /// Upper bound for refresh cycles per second; 0 is unlimited.
    pub limit_refresh_rate_hz: u32,
    /// Busy wait instead of sleeping while rate limited.
    pub busy_wait: bool,
    /// Log the measured refresh rate once per second.
    pub show_refresh_rate: bool,
}

impl RefreshOptions {
    pub fn from_config(config: &HardwareConfig) -> Self {
        Self {
            limit_refresh_rate_hz: config.limit_refresh_rate_hz,
            busy_wait: !config.disable_busy_waiting,
            show_refresh_rate: config.show_refresh_rate,
        }
    }

    fn min_cycle_time(&self) -> Option<Duration> {
        match self.limit_refresh_rate_hz {
            0 => None,
            hz => Some(Duration::from_secs(1) / hz),
        }
    }
}

/// State exchanged between callers and the refresh thread.
#[derive(Default)]
struct SwapState {
    /// Buffer waiting to become active, with its frame rate fraction.
    pending: Option<(FrameBuffer, u32)>,
    /// Buffer that was replaced, waiting for the swapping caller.
    previous: Option<FrameBuffer>,
    /// Completed refresh cycles.
    cycles: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<SwapState>,
    vsync: Condvar,
}

/// Handle on the refresh thread.
pub struct RefreshEngine {
    shared: Arc<Shared>,
    swap_lock: Mutex<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshEngine {
    /// Starts refreshing `initial` on `panel`.
    pub fn start(panel: Box<dyn Panel>, initial: FrameBuffer, options: RefreshOptions) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SwapState::default()),
            vsync: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || refresh_loop(thread_shared, panel, initial, options))
            .map_err(Error::Thread)?;

        info!(
            "Refresh thread started{}",
            match options.limit_refresh_rate_hz {
                0 => String::new(),
                hz => format!(", limited to {} Hz", hz),
            }
        );
        Ok(Self {
            shared,
            swap_lock: Mutex::new(()),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Makes `next` active at the next qualifying vsync pulse and returns the
    /// buffer it replaced.
    ///
    /// Only pulses whose index is a multiple of `frame_rate_fraction` qualify;
    /// 0 is treated as 1. Blocks until the exchange happened or the engine
    /// stopped, in which case `next` is dropped and [`Error::Closed`] is
    /// returned.
    pub fn swap_on_vsync(&self, next: FrameBuffer, frame_rate_fraction: u32) -> Result<FrameBuffer> {
        let fraction = frame_rate_fraction.max(1);
        let _serial = self.swap_lock.lock().unwrap();

        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            return Err(Error::Closed);
        }
        state.pending = Some((next, fraction));
        loop {
            if let Some(previous) = state.previous.take() {
                return Ok(previous);
            }
            if state.closed {
                state.pending = None;
                return Err(Error::Closed);
            }
            state = self.shared.vsync.wait(state).unwrap();
        }
    }

    /// Number of completed refresh cycles.
    pub fn refresh_count(&self) -> u64 {
        self.shared.state.lock().unwrap().cycles
    }

    /// Returns true until the engine was stopped.
    pub fn is_running(&self) -> bool {
        !self.shared.state.lock().unwrap().closed
    }

    /// Stops the refresh thread and waits for it to blank the panel.
    ///
    /// Blocked swaps return [`Error::Closed`]. Calling this again is a no-op.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
        }
        self.shared.vsync.notify_all();

        if let Some(handle) = self.handle.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("Refresh thread panicked");
            }
            debug!("Refresh thread stopped");
        }
    }
}

impl Drop for RefreshEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Marks the engine closed when the refresh thread ends, also by panic,
/// so no swap waits on a thread that is gone.
struct CloseOnExit<'a>(&'a Shared);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        let mut state = self
            .0
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !state.closed && std::thread::panicking() {
            warn!("Refresh thread died, closing");
        }
        state.closed = true;
        drop(state);
        self.0.vsync.notify_all();
    }
}

fn refresh_loop(
    shared: Arc<Shared>,
    mut panel: Box<dyn Panel>,
    mut current: FrameBuffer,
    options: RefreshOptions,
) {
    let _close = CloseOnExit(&shared);
    if panel.wants_realtime() {
        raise_thread_priority();
    }

    let min_cycle_time = options.min_cycle_time();
    let mut cycle: u64 = 0;
    let mut consecutive_errors: u32 = 0;
    let mut last_error_log = Instant::now();
    let mut rate_start = Instant::now();
    let mut rate_cycles: u32 = 0;

    loop {
        let cycle_start = Instant::now();
        if let Err(e) = panel.refresh(&current, cycle) {
            consecutive_errors += 1;
            // Only log errors once per second or on first error
            let elapsed = last_error_log.elapsed();
            if consecutive_errors == 1 || elapsed >= Duration::from_secs(1) {
                if consecutive_errors > 1 {
                    warn!(
                        "Refresh error (repeated {} times in {:?}): {}",
                        consecutive_errors, elapsed, e
                    );
                } else {
                    warn!("Refresh error: {}", e);
                }
                last_error_log = Instant::now();
                consecutive_errors = 0;
            }
        } else {
            consecutive_errors = 0;
        }

        if let Some(min) = min_cycle_time {
            wait_until(cycle_start + min, options.busy_wait);
        }

        cycle += 1;
        if options.show_refresh_rate {
            rate_cycles += 1;
            let elapsed = rate_start.elapsed();
            if elapsed >= Duration::from_secs(1) {
                info!(
                    "Refresh rate: {:.1} Hz ({:.2} ms/frame)",
                    rate_cycles as f64 / elapsed.as_secs_f64(),
                    elapsed.as_secs_f64() * 1000.0 / rate_cycles as f64
                );
                rate_start = Instant::now();
                rate_cycles = 0;
            }
        }

        let mut state = shared.state.lock().unwrap();
        state.cycles = cycle;
        if state.closed {
            break;
        }
        if let Some((next, fraction)) = state.pending.take() {
            if cycle % fraction as u64 == 0 {
                state.previous = Some(std::mem::replace(&mut current, next));
            } else {
                state.pending = Some((next, fraction));
            }
        }
        drop(state);
        shared.vsync.notify_all();
    }

    panel.blank();
}

fn wait_until(deadline: Instant, busy_wait: bool) {
    if busy_wait {
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    } else {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Realtime priority on a CPU of its own, as far as the system allows.
fn raise_thread_priority() {
    const PRIORITY: libc::c_int = 99;
    const CPU: usize = 3;

    let param = libc::sched_param {
        sched_priority: PRIORITY,
    };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        warn!(
            "Could not set realtime priority: {}",
            std::io::Error::from_raw_os_error(rc)
        );
    }

    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    if cpus > CPU {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(CPU, &mut set);
            if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
                warn!(
                    "Could not pin refresh thread to CPU {}: {}",
                    CPU,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}
