//! Matrix controller: buffer factory and vsync swap front end.

use crate::canvas::Canvas;
use crate::color::RenderSettings;
use crate::config::{HardwareConfig, RuntimeConfig};
use crate::framebuffer::FrameBuffer;
use crate::gpio::Gpio;
use crate::mapper::PixelMap;
use crate::panel::{EmulatedPanel, GpioPanel, Panel};
use crate::refresh::{RefreshEngine, RefreshOptions};
use crate::runtime::{daemonize, drop_privileges};
use crate::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Creating this many buffers usually means a loop allocates per frame.
const BUFFER_WARNING_INTERVAL: usize = 500;

/// Owner of the refresh engine for one chain of panels.
///
/// A controller only exists fully set up: construction either validates,
/// acquires the hardware and starts refreshing, or fails. After
/// [`MatrixController::close`] every fallible operation returns
/// [`Error::Closed`].
pub struct MatrixController {
    config: HardwareConfig,
    pixel_map: Arc<PixelMap>,
    defaults: Mutex<RenderSettings>,
    created: AtomicUsize,
    engine: RefreshEngine,
}

impl MatrixController {
    /// Validates the configuration, sets up the hardware and starts
    /// refreshing a blank frame.
    pub fn create_from_config(config: HardwareConfig, runtime: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        runtime.validate()?;
        let map = PixelMap::for_config(&config)?;

        let gpio = if runtime.do_gpio_init {
            Some(Gpio::acquire(runtime.gpio_slowdown)?)
        } else {
            info!("GPIO initialization disabled, using emulated panel");
            None
        };

        // Threads do not survive the fork, so detach before starting one.
        if runtime.daemon {
            daemonize();
        }

        let panel: Box<dyn Panel> = match gpio {
            Some(gpio) => Box::new(GpioPanel::new(gpio, &config, &map)?),
            None => Box::new(EmulatedPanel::new(&config, &map)?),
        };
        let controller = Self::start(config, map, panel)?;

        if runtime.do_gpio_init && runtime.drop_privileges {
            drop_privileges(&runtime.drop_priv_user, &runtime.drop_priv_group)?;
        }
        Ok(controller)
    }

    /// Starts refreshing on a caller supplied panel.
    pub fn with_panel(config: HardwareConfig, panel: Box<dyn Panel>) -> Result<Self> {
        config.validate()?;
        let map = PixelMap::for_config(&config)?;
        Self::start(config, map, panel)
    }

    fn start(config: HardwareConfig, map: PixelMap, panel: Box<dyn Panel>) -> Result<Self> {
        let defaults = RenderSettings {
            pwm_bits: config.pwm_bits,
            luminance_correct: true,
            brightness: config.brightness,
        };
        let pixel_map = Arc::new(map);

        let mut active = FrameBuffer::new(Arc::clone(&pixel_map), defaults);
        active.clear();
        let engine = RefreshEngine::start(panel, active, RefreshOptions::from_config(&config))?;

        info!(
            "Matrix {}x{} ({} chained, {} parallel, {}x{} panels)",
            pixel_map.width(),
            pixel_map.height(),
            config.chain_length,
            config.parallel,
            config.cols,
            config.rows
        );
        Ok(Self {
            config,
            pixel_map,
            defaults: Mutex::new(defaults),
            created: AtomicUsize::new(0),
            engine,
        })
    }

    /// Creates a blank off-screen buffer with the current default
    /// rendering parameters.
    pub fn create_offscreen_buffer(&self) -> Result<FrameBuffer> {
        self.ensure_open()?;
        let count = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        if count % BUFFER_WARNING_INTERVAL == 0 {
            warn!(
                "{} frame buffers created. Usually two are enough; reuse the one returned by swap",
                count
            );
        }
        Ok(FrameBuffer::new(
            Arc::clone(&self.pixel_map),
            *self.defaults.lock().unwrap(),
        ))
    }

    /// Makes `buffer` active at the next vsync pulse whose index is a
    /// multiple of `frame_rate_fraction` and returns the previously active
    /// buffer, which is then free to draw on.
    ///
    /// On error `buffer` is dropped; create a new one with
    /// [`MatrixController::create_offscreen_buffer`] if the controller is
    /// still open.
    pub fn swap(&self, buffer: FrameBuffer, frame_rate_fraction: u32) -> Result<FrameBuffer> {
        self.ensure_open()?;
        if !Arc::ptr_eq(buffer.pixel_map(), &self.pixel_map) && **buffer.pixel_map() != *self.pixel_map
        {
            return Err(Error::DimensionMismatch {
                expected_width: self.width(),
                expected_height: self.height(),
                width: buffer.width(),
                height: buffer.height(),
            });
        }
        self.engine.swap_on_vsync(buffer, frame_rate_fraction)
    }

    /// Sets the PWM bit planes for buffers created afterwards.
    pub fn set_pwm_bits(&self, bits: u8) -> bool {
        if !self.engine.is_running() || !RenderSettings::valid_pwm_bits(bits) {
            return false;
        }
        self.defaults.lock().unwrap().pwm_bits = bits;
        true
    }

    pub fn pwm_bits(&self) -> u8 {
        self.defaults.lock().unwrap().pwm_bits
    }

    /// Sets luminance correction for buffers created afterwards.
    pub fn set_luminance_correct(&self, on: bool) -> bool {
        if !self.engine.is_running() {
            return false;
        }
        self.defaults.lock().unwrap().luminance_correct = on;
        true
    }

    pub fn luminance_correct(&self) -> bool {
        self.defaults.lock().unwrap().luminance_correct
    }

    /// Sets brightness in percent for buffers created afterwards.
    pub fn set_brightness(&self, percent: u8) -> bool {
        if !self.engine.is_running() || !RenderSettings::valid_brightness(percent) {
            return false;
        }
        self.defaults.lock().unwrap().brightness = percent;
        true
    }

    pub fn brightness(&self) -> u8 {
        self.defaults.lock().unwrap().brightness
    }

    /// Visible width in pixels.
    pub fn width(&self) -> usize {
        self.pixel_map.width()
    }

    /// Visible height in pixels.
    pub fn height(&self) -> usize {
        self.pixel_map.height()
    }

    /// Completed refresh cycles since start.
    pub fn refresh_count(&self) -> u64 {
        self.engine.refresh_count()
    }

    /// The configuration the controller was built from.
    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    /// Returns true until the controller was closed.
    pub fn is_open(&self) -> bool {
        self.engine.is_running()
    }

    /// Stops refreshing, blanks the panel and releases the hardware.
    pub fn close(&self) -> Result<()> {
        self.ensure_open()?;
        self.engine.stop();
        info!("Matrix controller closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.engine.is_running() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Rgb;
    use std::time::Duration;

    /// Records the top left pixel of every refreshed frame.
    struct RecordingPanel {
        seen: Arc<Mutex<Vec<(u64, Rgb)>>>,
    }

    impl Panel for RecordingPanel {
        fn refresh(&mut self, frame: &FrameBuffer, cycle: u64) -> Result<()> {
            let pixel = frame.get_pixel(0, 0).unwrap_or_default();
            self.seen.lock().unwrap().push((cycle, pixel));
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        }
    }

    fn emulated(config: &HardwareConfig) -> MatrixController {
        let map = PixelMap::for_config(config).unwrap();
        let panel = EmulatedPanel::new(config, &map)
            .unwrap()
            .with_frame_time(Duration::from_millis(1));
        MatrixController::with_panel(config.clone(), Box::new(panel)).unwrap()
    }

    #[test]
    fn test_32x32_scenario() {
        let controller =
            MatrixController::create_from_config(HardwareConfig::default(), &RuntimeConfig::emulated())
                .unwrap();
        assert_eq!((controller.width(), controller.height()), (32, 32));

        let mut buffer = controller.create_offscreen_buffer().unwrap();
        assert_eq!((buffer.width(), buffer.height()), (32, 32));
        buffer.set_pixel(0, 0, 255, 0, 0);
        buffer.set_pixel(31, 31, 0, 0, 255);

        let previous = controller.swap(buffer, 1).unwrap();
        assert_eq!((previous.width(), previous.height()), (32, 32));
        assert!(previous.physical_pixels().iter().all(|&p| p == Rgb::BLACK));
        controller.close().unwrap();
    }

    #[test]
    fn test_rejects_empty_topology() {
        let runtime = RuntimeConfig::emulated();
        for config in [
            HardwareConfig {
                rows: 0,
                ..Default::default()
            },
            HardwareConfig {
                chain_length: 0,
                ..Default::default()
            },
        ] {
            let err = MatrixController::create_from_config(config, &runtime).err().unwrap();
            assert!(err.is_configuration(), "{}", err);
        }
    }

    #[test]
    fn test_ping_pong() {
        let controller = emulated(&HardwareConfig::default());
        let mut a = controller.create_offscreen_buffer().unwrap();
        let mut b = controller.create_offscreen_buffer().unwrap();
        a.fill(1, 0, 0);
        b.fill(2, 0, 0);

        let initial = controller.swap(a, 1).unwrap();
        assert_eq!(initial.get_pixel(0, 0), Some(Rgb::BLACK));
        let a = controller.swap(b, 1).unwrap();
        assert_eq!(a.get_pixel(0, 0), Some(Rgb::new(1, 0, 0)));
        let b = controller.swap(a, 1).unwrap();
        assert_eq!(b.get_pixel(0, 0), Some(Rgb::new(2, 0, 0)));
    }

    #[test]
    fn test_frame_rate_fraction_gating() {
        const FRACTION: u64 = 3;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let controller = MatrixController::with_panel(
            HardwareConfig::default(),
            Box::new(RecordingPanel {
                seen: Arc::clone(&seen),
            }),
        )
        .unwrap();

        let mut buffer = controller.create_offscreen_buffer().unwrap();
        for shade in 1..=5u8 {
            buffer.fill(shade, shade, shade);
            buffer = controller.swap(buffer, FRACTION as u32).unwrap();
        }
        // Let the last frame reach the panel.
        let target = controller.refresh_count() + 2;
        while controller.refresh_count() < target {
            std::thread::sleep(Duration::from_millis(1));
        }
        controller.close().unwrap();

        let seen = seen.lock().unwrap();
        let mut transitions = 0;
        for pair in seen.windows(2) {
            let ((_, before), (cycle, after)) = (pair[0], pair[1]);
            if before != after {
                transitions += 1;
                assert_eq!(cycle % FRACTION, 0, "frame changed at cycle {}", cycle);
            }
        }
        assert_eq!(transitions, 5);
    }

    #[test]
    fn test_defaults_apply_to_new_buffers() {
        let controller = emulated(&HardwareConfig {
            pwm_bits: 8,
            brightness: 60,
            ..Default::default()
        });
        let before = controller.create_offscreen_buffer().unwrap();
        assert_eq!(before.pwm_bits(), 8);
        assert_eq!(before.brightness(), 60);

        assert!(controller.set_pwm_bits(5));
        assert!(!controller.set_pwm_bits(12));
        assert!(controller.set_brightness(30));
        assert!(!controller.set_brightness(101));
        assert!(controller.set_luminance_correct(false));

        let after = controller.create_offscreen_buffer().unwrap();
        assert_eq!(after.pwm_bits(), 5);
        assert_eq!(after.brightness(), 30);
        assert!(!after.luminance_correct());
        // Existing buffers keep their parameters.
        assert_eq!(before.pwm_bits(), 8);
    }

    #[test]
    fn test_swap_rejects_foreign_buffer() {
        let controller = emulated(&HardwareConfig::default());
        let foreign = FrameBuffer::with_dimensions(16, 16);
        assert!(matches!(
            controller.swap(foreign, 1),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_close_semantics() {
        let controller = emulated(&HardwareConfig::default());
        let mut buffer = controller.create_offscreen_buffer().unwrap();
        controller.close().unwrap();
        assert!(!controller.is_open());

        assert!(matches!(controller.close(), Err(Error::Closed)));
        assert!(matches!(controller.create_offscreen_buffer(), Err(Error::Closed)));
        assert!(!controller.set_brightness(50));

        // Buffers stay plain memory.
        buffer.fill(3, 3, 3);
        assert_eq!(buffer.get_pixel(2, 2), Some(Rgb::new(3, 3, 3)));
        assert!(matches!(controller.swap(buffer, 1), Err(Error::Closed)));
    }

    #[test]
    fn test_close_releases_blocked_swap() {
        let controller = Arc::new(emulated(&HardwareConfig::default()));
        let buffer = controller.create_offscreen_buffer().unwrap();
        let waiter = {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || controller.swap(buffer, u32::MAX))
        };
        std::thread::sleep(Duration::from_millis(20));
        controller.close().unwrap();
        assert!(matches!(waiter.join().unwrap(), Err(Error::Closed)));
    }

    #[test]
    fn test_concurrent_swaps_conserve_buffers() {
        const THREADS: u8 = 3;
        const SWAPS: usize = 20;
        let controller = Arc::new(emulated(&HardwareConfig::default()));

        let workers: Vec<_> = (1..=THREADS)
            .map(|tag| {
                let controller = Arc::clone(&controller);
                let mut buffer = controller.create_offscreen_buffer().unwrap();
                buffer.fill(tag, 0, 0);
                std::thread::spawn(move || {
                    for _ in 0..SWAPS {
                        let given = buffer.get_pixel(0, 0).unwrap().r;
                        buffer = controller.swap(buffer, 1).unwrap();
                        assert_ne!(buffer.get_pixel(0, 0).unwrap().r, given);
                    }
                    buffer
                })
            })
            .collect();

        let mut tags: Vec<u8> = workers
            .into_iter()
            .map(|worker| worker.join().unwrap().get_pixel(0, 0).unwrap().r)
            .collect();
        let mut spare = controller.create_offscreen_buffer().unwrap();
        spare.fill(99, 0, 0);
        let active = controller.swap(spare, 1).unwrap();
        tags.push(active.get_pixel(0, 0).unwrap().r);
        tags.sort_unstable();
        assert_eq!(tags, vec![0, 1, 2, 3]);
    }

    /// Panics during the third refresh cycle.
    struct PanickingPanel;

    impl Panel for PanickingPanel {
        fn refresh(&mut self, _frame: &FrameBuffer, cycle: u64) -> Result<()> {
            if cycle == 3 {
                panic!("panel fault");
            }
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        }
    }

    #[test]
    fn test_dead_refresh_thread_closes_controller() {
        let controller = Arc::new(
            MatrixController::with_panel(HardwareConfig::default(), Box::new(PanickingPanel))
                .unwrap(),
        );
        let buffer = controller.create_offscreen_buffer().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let (tx, rx) = std::sync::mpsc::channel();
        {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || {
                let _ = tx.send(controller.swap(buffer, 1));
            });
        }
        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(result, Err(Error::Closed)));
        assert!(!controller.is_open());
    }
}
