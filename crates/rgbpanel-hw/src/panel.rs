//! Output stage the refresh engine renders frames into.
//!
//! [`GpioPanel`] shifts bit planes out to HUB75 panels through the GPIO
//! registers. [`EmulatedPanel`] renders the same output levels into memory
//! and sleeps for as long as the hardware would take, so code written
//! against a controller behaves the same without a panel attached.

use crate::color::{OutputFormat, MAX_PWM_BITS};
use crate::config::HardwareConfig;
use crate::framebuffer::FrameBuffer;
use crate::gpio::{sleep_nanos, Gpio};
use crate::mapper::PixelMap;
use crate::mapping::HardwareMapping;
use crate::{Error, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cost of clocking one column into the shift registers.
const COLUMN_CLOCK_NANOS: u64 = 25;

/// First bit plane shown for each frame of a four frame dither cycle,
/// indexed by dither bits.
const DITHER_START_BITS: [[u8; 4]; 3] = [[0, 0, 0, 0], [0, 1, 0, 1], [0, 1, 2, 2]];

/// Sink for refresh cycles.
pub trait Panel: Send {
    /// Shows `frame` once. `cycle` counts refresh cycles since start.
    fn refresh(&mut self, frame: &FrameBuffer, cycle: u64) -> Result<()>;

    /// Turns all LEDs off.
    fn blank(&mut self) {}

    /// Returns true if refresh timing benefits from realtime scheduling.
    fn wants_realtime(&self) -> bool {
        false
    }
}

/// Physical scan geometry shared by both panel kinds.
#[derive(Debug, Clone, Copy)]
struct ScanGeometry {
    /// Physical columns across the chain.
    columns: usize,
    /// Rows lit at once per chain.
    double_rows: usize,
    parallel: usize,
    pwm_lsb_nanos: u64,
    dither_bits: u8,
}

impl ScanGeometry {
    fn new(config: &HardwareConfig, map: &PixelMap) -> Self {
        let parallel = config.parallel.max(1) as usize;
        Self {
            columns: map.physical_width(),
            double_rows: map.physical_height() / parallel / 2,
            parallel,
            pwm_lsb_nanos: config.pwm_lsb_nanoseconds as u64,
            dither_bits: config.pwm_dither_bits.min(2),
        }
    }

    /// Lowest bit plane transmitted in this cycle.
    fn start_plane(&self, min_plane: u8, cycle: u64) -> u8 {
        let dither = DITHER_START_BITS[self.dither_bits as usize][(cycle % 4) as usize];
        (min_plane + dither).min(MAX_PWM_BITS - 1)
    }

    /// Time to show all planes from `start` on every row.
    fn frame_time(&self, start: u8) -> Duration {
        let per_row: u64 = (start..MAX_PWM_BITS)
            .map(|plane| (self.pwm_lsb_nanos << plane) + self.columns as u64 * COLUMN_CLOCK_NANOS)
            .sum();
        Duration::from_nanos(per_row * self.double_rows as u64)
    }
}

/// In-memory panel for running without hardware.
pub struct EmulatedPanel {
    format: OutputFormat,
    geometry: ScanGeometry,
    levels: Vec<[u16; 3]>,
    frame_time: Option<Duration>,
}

impl EmulatedPanel {
    /// Creates an emulated panel for the given configuration.
    pub fn new(config: &HardwareConfig, map: &PixelMap) -> Result<Self> {
        Ok(Self {
            format: OutputFormat {
                inverse: config.inverse_colors,
                order: config.channel_order()?,
            },
            geometry: ScanGeometry::new(config, map),
            levels: Vec::new(),
            frame_time: None,
        })
    }

    /// Uses a fixed refresh cycle duration instead of the modeled one.
    pub fn with_frame_time(mut self, frame_time: Duration) -> Self {
        self.frame_time = Some(frame_time);
        self
    }

    /// Output levels of the last refresh, in physical pixel order.
    pub fn levels(&self) -> &[[u16; 3]] {
        &self.levels
    }
}

impl Panel for EmulatedPanel {
    fn refresh(&mut self, frame: &FrameBuffer, cycle: u64) -> Result<()> {
        self.format.render(frame, &mut self.levels);
        let start = self
            .geometry
            .start_plane(frame.render_settings().min_plane(), cycle);
        let frame_time = self
            .frame_time
            .unwrap_or_else(|| self.geometry.frame_time(start));
        std::thread::sleep(frame_time);
        Ok(())
    }

    fn blank(&mut self) {
        self.levels.iter_mut().for_each(|l| *l = [0; 3]);
    }
}

/// How row addresses reach the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAddressing {
    /// Binary address on lines A..E.
    Direct,
    /// A clocks a shift register fed from B.
    ShiftRegister,
    /// One select line per row.
    DirectSelect,
}

impl RowAddressing {
    /// Converts from the configuration value.
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => RowAddressing::ShiftRegister,
            2 => RowAddressing::DirectSelect,
            3 => {
                warn!("ABC shift register addressing is driven as AB shift register");
                RowAddressing::ShiftRegister
            }
            _ => RowAddressing::Direct,
        }
    }
}

/// HUB75 panels on the GPIO header.
pub struct GpioPanel {
    gpio: Gpio,
    mapping: &'static HardwareMapping,
    format: OutputFormat,
    geometry: ScanGeometry,
    addressing: RowAddressing,
    interlaced: bool,
    row_order: Vec<usize>,
    last_row: Option<usize>,
    levels: Vec<[u16; 3]>,
}

impl GpioPanel {
    /// Sets up outputs and panel chips for the configured topology.
    pub fn new(mut gpio: Gpio, config: &HardwareConfig, map: &PixelMap) -> Result<Self> {
        let mapping = HardwareMapping::find(&config.hardware_mapping).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown hardware mapping '{}'",
                config.hardware_mapping
            ))
        })?;
        let geometry = ScanGeometry::new(config, map);
        let addressing = RowAddressing::from_byte(config.row_address_type);
        if addressing == RowAddressing::DirectSelect && geometry.double_rows > 5 {
            return Err(Error::Configuration(format!(
                "direct row select supports at most 5 double rows, panel has {}",
                geometry.double_rows
            )));
        }

        let row_lines = match addressing {
            RowAddressing::Direct => mapping.address_bits(geometry.double_rows),
            RowAddressing::ShiftRegister => mapping.a | mapping.b,
            RowAddressing::DirectSelect => mapping.address_lines()[..geometry.double_rows]
                .iter()
                .fold(0, |mask, &line| mask | line),
        };
        gpio.init_outputs(
            mapping.output_enable
                | mapping.clock
                | mapping.strobe
                | mapping.color_bits(geometry.parallel)
                | row_lines,
        );

        if config.disable_hardware_pulsing {
            debug!("Bit planes timed in software");
        } else {
            info!("No PWM peripheral access, timing bit planes in software");
        }

        let interlaced = config.scan_mode == 1;
        let row_order = (0..geometry.double_rows)
            .map(|i| scan_row(i, geometry.double_rows, interlaced))
            .collect();

        let mut panel = Self {
            gpio,
            mapping,
            format: OutputFormat {
                inverse: config.inverse_colors,
                order: config.channel_order()?,
            },
            geometry,
            addressing,
            interlaced,
            row_order,
            last_row: None,
            levels: Vec::new(),
        };

        if config.panel_type.eq_ignore_ascii_case("FM6126A") {
            panel.init_fm6126a();
        }
        debug!(
            "GPIO panel: {} columns, {} double rows, {} chains, {:?} addressing{}",
            geometry.columns,
            geometry.double_rows,
            geometry.parallel,
            addressing,
            if interlaced { ", interlaced" } else { "" }
        );
        Ok(panel)
    }

    /// Writes the two configuration registers of FM6126A driver chips.
    fn init_fm6126a(&mut self) {
        const REGISTER_12: &[u8; 16] = b"0111111111111111";
        const REGISTER_13: &[u8; 16] = b"0000000001000000";

        let m = self.mapping;
        let bits_off = m.a;
        let bits_on = m.color_bits(self.geometry.parallel) | m.a;
        let mask = bits_on | m.strobe;
        let columns = self.geometry.columns;

        self.gpio.clear_bits(m.output_enable | m.clock | m.strobe);
        for (register, latch) in [(REGISTER_12, 12), (REGISTER_13, 13)] {
            for i in 0..columns {
                let mut value = if register[i % 16] == b'0' {
                    bits_off
                } else {
                    bits_on
                };
                if i + latch >= columns {
                    value |= m.strobe;
                }
                self.gpio.write_masked_bits(value, mask);
                self.gpio.set_bits(m.clock);
                self.gpio.clear_bits(m.clock);
            }
            self.gpio.clear_bits(m.strobe);
        }
        info!("Initialized FM6126A panel registers");
    }

    fn set_row_address(&mut self, row: usize) {
        if self.last_row == Some(row) {
            return;
        }
        let m = self.mapping;
        match self.addressing {
            RowAddressing::Direct => {
                let lines = m.address_lines();
                let mut value = 0;
                for (bit, &line) in lines.iter().enumerate() {
                    if row & (1 << bit) != 0 {
                        value |= line;
                    }
                }
                self.gpio
                    .write_masked_bits(value, m.address_bits(self.geometry.double_rows));
            }
            RowAddressing::ShiftRegister => {
                let (clock, data) = (m.a, m.b);
                let double_rows = self.geometry.double_rows;
                for activate in 0..double_rows {
                    self.gpio.clear_bits(clock);
                    if activate == double_rows - 1 - row {
                        self.gpio.clear_bits(data);
                    } else {
                        self.gpio.set_bits(data);
                    }
                    self.gpio.set_bits(clock);
                }
                self.gpio.clear_bits(clock);
                self.gpio.set_bits(clock);
            }
            RowAddressing::DirectSelect => {
                let lines = m.address_lines();
                let mask = lines[..self.geometry.double_rows]
                    .iter()
                    .fold(0, |acc, &l| acc | l);
                self.gpio.write_masked_bits(lines[row], mask);
            }
        }
        self.last_row = Some(row);
    }

    /// Color pin bits for one column of one bit plane of a double row.
    fn column_bits(&self, row: usize, column: usize, plane: u8) -> u32 {
        let g = &self.geometry;
        let panel_rows = g.double_rows * 2;
        let mut bits = 0;
        for (chain, pins) in self.mapping.chains.iter().take(g.parallel).enumerate() {
            let upper = self.levels[(chain * panel_rows + row) * g.columns + column];
            let lower =
                self.levels[(chain * panel_rows + row + g.double_rows) * g.columns + column];
            let (top, bottom) = pins.halves();
            for ch in 0..3 {
                if (upper[ch] >> plane) & 1 != 0 {
                    bits |= top[ch];
                }
                if (lower[ch] >> plane) & 1 != 0 {
                    bits |= bottom[ch];
                }
            }
        }
        bits
    }
}

/// Row shown at scan position `index`.
fn scan_row(index: usize, double_rows: usize, interlaced: bool) -> usize {
    if !interlaced {
        return index;
    }
    let half = double_rows.div_ceil(2);
    if index < half {
        index * 2
    } else {
        (index - half) * 2 + 1
    }
}

impl Panel for GpioPanel {
    fn refresh(&mut self, frame: &FrameBuffer, cycle: u64) -> Result<()> {
        let g = self.geometry;
        if frame.physical_width() != g.columns
            || frame.physical_height() != g.double_rows * 2 * g.parallel
        {
            return Err(Error::DimensionMismatch {
                expected_width: g.columns,
                expected_height: g.double_rows * 2 * g.parallel,
                width: frame.physical_width(),
                height: frame.physical_height(),
            });
        }
        self.format.render(frame, &mut self.levels);
        let start = g.start_plane(frame.render_settings().min_plane(), cycle);

        let m = self.mapping;
        let color_clock_mask = m.color_bits(g.parallel) | m.clock;
        for i in 0..g.double_rows {
            let row = self.row_order[i];
            for plane in start..MAX_PWM_BITS {
                for column in 0..g.columns {
                    let bits = self.column_bits(row, column, plane);
                    self.gpio.write_masked_bits(bits, color_clock_mask);
                    self.gpio.set_bits(m.clock);
                }
                self.gpio.clear_bits(color_clock_mask);

                // Latch while dark, then light the plane for its weight.
                self.gpio.set_bits(m.output_enable);
                self.set_row_address(row);
                self.gpio.set_bits(m.strobe);
                self.gpio.clear_bits(m.strobe);

                self.gpio.clear_bits(m.output_enable);
                sleep_nanos(g.pwm_lsb_nanos << plane);
                self.gpio.set_bits(m.output_enable);
            }
        }
        Ok(())
    }

    fn blank(&mut self) {
        let m = self.mapping;
        self.gpio.set_bits(m.output_enable);
        self.gpio.clear_bits(m.color_bits(self.geometry.parallel));
        for _ in 0..self.geometry.columns {
            self.gpio.set_bits(m.clock);
            self.gpio.clear_bits(m.clock);
        }
        self.gpio.set_bits(m.strobe);
        self.gpio.clear_bits(m.strobe);
        debug!("Panel blanked");
    }

    fn wants_realtime(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::color::RenderSettings;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_scan_row_order() {
        let progressive: Vec<_> = (0..4).map(|i| scan_row(i, 4, false)).collect();
        assert_eq!(progressive, vec![0, 1, 2, 3]);
        let interlaced: Vec<_> = (0..8).map(|i| scan_row(i, 8, true)).collect();
        assert_eq!(interlaced, vec![0, 2, 4, 6, 1, 3, 5, 7]);
    }

    #[test]
    fn test_dither_start_plane() {
        let config = HardwareConfig {
            pwm_dither_bits: 2,
            ..Default::default()
        };
        let geometry = ScanGeometry::new(&config, &PixelMap::identity(32, 32));
        let starts: Vec<_> = (0..4).map(|c| geometry.start_plane(0, c)).collect();
        assert_eq!(starts, vec![0, 1, 2, 2]);
        assert_eq!(geometry.start_plane(10, 1), 10);
    }

    #[test]
    fn test_modeled_frame_time() {
        let config = HardwareConfig::default();
        let geometry = ScanGeometry::new(&config, &PixelMap::identity(32, 32));
        assert_eq!(geometry.double_rows, 16);
        let all = geometry.frame_time(0);
        let expected = 16 * (130 * 2047 + 11 * 32 * COLUMN_CLOCK_NANOS);
        assert_eq!(all, Duration::from_nanos(expected));
        // Fewer planes refresh faster.
        assert!(geometry.frame_time(4) < all);
    }

    #[test]
    fn test_emulated_panel_renders_levels() {
        let config = HardwareConfig {
            led_rgb_sequence: "BGR".to_string(),
            ..Default::default()
        };
        let map = Arc::new(PixelMap::for_config(&config).unwrap());
        let mut panel = EmulatedPanel::new(&config, &map)
            .unwrap()
            .with_frame_time(Duration::from_millis(1));

        let mut frame = FrameBuffer::new(map, RenderSettings {
            luminance_correct: false,
            ..Default::default()
        });
        frame.set_pixel(1, 0, 255, 0, 0);

        let start = Instant::now();
        panel.refresh(&frame, 0).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1));
        assert_eq!(panel.levels().len(), 32 * 32);
        assert_eq!(panel.levels()[1], [0, 0, 255 << 3]);

        panel.blank();
        assert!(panel.levels().iter().all(|l| *l == [0; 3]));
    }

    #[test]
    #[ignore = "requires a Raspberry Pi with a panel on the regular mapping"]
    fn test_gpio_panel_refresh() {
        let config = HardwareConfig::default();
        let map = Arc::new(PixelMap::for_config(&config).unwrap());
        let gpio = Gpio::acquire(1).unwrap();
        let mut panel = GpioPanel::new(gpio, &config, &map).unwrap();
        let mut frame = FrameBuffer::new(map, RenderSettings::default());
        frame.fill(0, 64, 0);
        for cycle in 0..100 {
            panel.refresh(&frame, cycle).unwrap();
        }
        panel.blank();
    }
}
