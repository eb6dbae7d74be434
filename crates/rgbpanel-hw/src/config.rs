//! Hardware and runtime configuration.
//!
//! Both structs deserialize with per-field defaults, so a configuration
//! file only needs the values that differ from a single 32x32 panel on the
//! regular wiring.

use crate::color::{ChannelOrder, MAX_PWM_BITS};
use crate::mapper::{MultiplexKind, PixelMap, MAX_PIXELS};
use crate::mapping::HardwareMapping;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Panel topology and PWM rendering parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Name of the GPIO wiring scheme.
    #[serde(default = "default_hardware_mapping")]
    pub hardware_mapping: String,

    /// Rows per panel (8..=64, even).
    #[serde(default = "default_rows")]
    pub rows: u32,

    /// Columns per panel.
    #[serde(default = "default_cols")]
    pub cols: u32,

    /// Number of daisy-chained panels.
    #[serde(default = "default_one")]
    pub chain_length: u32,

    /// Number of parallel chains (1..=3).
    #[serde(default = "default_one")]
    pub parallel: u32,

    /// PWM bit planes per color channel (1..=11).
    #[serde(default = "default_pwm_bits")]
    pub pwm_bits: u8,

    /// On-time of the least significant bit plane.
    #[serde(default = "default_pwm_lsb_nanoseconds")]
    pub pwm_lsb_nanoseconds: u32,

    /// Lower bit planes time-dithered across frames (0..=2).
    #[serde(default)]
    pub pwm_dither_bits: u8,

    /// Brightness in percent (1..=100).
    #[serde(default = "default_brightness")]
    pub brightness: u8,

    /// 0 = progressive, 1 = interlaced.
    #[serde(default)]
    pub scan_mode: u8,

    /// 0 = direct, 1 = AB shift register, 2 = direct row select, 3 = ABC shift register.
    #[serde(default)]
    pub row_address_type: u8,

    /// 0 = none, otherwise index into the multiplex mappers.
    #[serde(default)]
    pub multiplexing: u8,

    /// Time the bit planes in software instead of using the PWM peripheral.
    #[serde(default)]
    pub disable_hardware_pulsing: bool,

    /// Log the measured refresh rate.
    #[serde(default)]
    pub show_refresh_rate: bool,

    /// Panel lights LEDs on low levels.
    #[serde(default)]
    pub inverse_colors: bool,

    /// Channel order of the panel LEDs, e.g. "RGB" or "BGR".
    #[serde(default = "default_led_rgb_sequence")]
    pub led_rgb_sequence: String,

    /// Semicolon separated pixel mappers, e.g. "U-mapper;Rotate:90".
    #[serde(default)]
    pub pixel_mapper_config: String,

    /// Panel driver chip needing initialization, e.g. "FM6126A".
    #[serde(default)]
    pub panel_type: String,

    /// Upper bound for the refresh rate; 0 is unlimited.
    #[serde(default)]
    pub limit_refresh_rate_hz: u32,

    /// Sleep instead of busy waiting when limiting the refresh rate.
    #[serde(default)]
    pub disable_busy_waiting: bool,
}

/// Process-level hardware access behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// GPIO write repetitions for faster Pis / slower panels (0..=5).
    #[serde(default = "default_gpio_slowdown")]
    pub gpio_slowdown: u8,

    /// Detach into the background before starting the refresh thread.
    #[serde(default)]
    pub daemon: bool,

    /// Drop root privileges once the hardware is set up.
    #[serde(default = "default_true")]
    pub drop_privileges: bool,

    /// User to switch to (name or numeric id).
    #[serde(default = "default_priv_user")]
    pub drop_priv_user: String,

    /// Group to switch to (name or numeric id).
    #[serde(default = "default_priv_user")]
    pub drop_priv_group: String,

    /// Touch the GPIO hardware. Without it frames go to an emulated panel.
    #[serde(default = "default_true")]
    pub do_gpio_init: bool,
}

// Default value functions
fn default_hardware_mapping() -> String {
    "regular".to_string()
}

fn default_rows() -> u32 {
    32
}

fn default_cols() -> u32 {
    32
}

fn default_one() -> u32 {
    1
}

fn default_pwm_bits() -> u8 {
    MAX_PWM_BITS
}

fn default_pwm_lsb_nanoseconds() -> u32 {
    130
}

fn default_brightness() -> u8 {
    100
}

fn default_led_rgb_sequence() -> String {
    "RGB".to_string()
}

fn default_gpio_slowdown() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

fn default_priv_user() -> String {
    "daemon".to_string()
}

/// Panel driver chips that need an initialization sequence.
pub const PANEL_TYPES: &[&str] = &["FM6126A"];

/// Largest usable GPIO slowdown.
pub const MAX_GPIO_SLOWDOWN: u8 = 5;

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            hardware_mapping: default_hardware_mapping(),
            rows: default_rows(),
            cols: default_cols(),
            chain_length: default_one(),
            parallel: default_one(),
            pwm_bits: default_pwm_bits(),
            pwm_lsb_nanoseconds: default_pwm_lsb_nanoseconds(),
            pwm_dither_bits: 0,
            brightness: default_brightness(),
            scan_mode: 0,
            row_address_type: 0,
            multiplexing: 0,
            disable_hardware_pulsing: false,
            show_refresh_rate: false,
            inverse_colors: false,
            led_rgb_sequence: default_led_rgb_sequence(),
            pixel_mapper_config: String::new(),
            panel_type: String::new(),
            limit_refresh_rate_hz: 0,
            disable_busy_waiting: false,
        }
    }
}

impl HardwareConfig {
    /// Checks every parameter and reports all problems at once.
    ///
    /// Pixel mappers are resolved as well, so a configuration that passes
    /// can always be turned into a [`PixelMap`].
    pub fn validate(&self) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.rows < 8 || self.rows > 64 || self.rows % 2 != 0 {
            problems.push(format!(
                "rows per panel {} must be in range 8..64 and divisible by 2",
                self.rows
            ));
        }
        if self.cols < 16 {
            problems.push(format!(
                "columns per panel {} invalid, typically that is 32 or 64",
                self.cols
            ));
        }
        if self.chain_length < 1 {
            problems.push("chain length must be at least 1".to_string());
        }
        match self.pixel_count() {
            Some(n) if n <= MAX_PIXELS => {}
            _ => problems.push(format!(
                "{} chained {}x{} panels in {} parallel chains exceed {} pixels",
                self.chain_length, self.cols, self.rows, self.parallel, MAX_PIXELS
            )),
        }

        match HardwareMapping::find(&self.hardware_mapping) {
            None => problems.push(format!(
                "unknown hardware mapping '{}' (available: {})",
                self.hardware_mapping,
                HardwareMapping::names().join(", ")
            )),
            Some(mapping) => {
                if self.parallel < 1 || self.parallel > 3 {
                    problems.push(format!(
                        "parallel chains {} outside usable range 1..3",
                        self.parallel
                    ));
                } else if self.parallel as usize > mapping.max_parallel_chains() {
                    problems.push(format!(
                        "hardware mapping '{}' supports at most {} parallel chains, {} requested",
                        mapping.name,
                        mapping.max_parallel_chains(),
                        self.parallel
                    ));
                }
                if self.rows > 32 && mapping.e == 0 {
                    problems.push(format!(
                        "hardware mapping '{}' has no E address line for {} rows",
                        mapping.name, self.rows
                    ));
                }
            }
        }

        if self.multiplexing as usize > MultiplexKind::ALL.len() {
            problems.push(format!(
                "multiplexing can only be one of 0=direct; {}",
                MultiplexKind::describe_all()
            ));
        }
        if self.row_address_type > 3 {
            problems.push(
                "row address type can be 0 (direct), 1 (AB), 2 (direct row select) or 3 (ABC)"
                    .to_string(),
            );
        }
        if self.brightness < 1 || self.brightness > 100 {
            problems.push(format!("brightness {} outside range 1..100", self.brightness));
        }
        if self.pwm_bits < 1 || self.pwm_bits > MAX_PWM_BITS {
            problems.push(format!(
                "pwm bits {} outside range 1..{}",
                self.pwm_bits, MAX_PWM_BITS
            ));
        }
        if self.scan_mode > 1 {
            problems.push("scan mode can be 0 (progressive) or 1 (interlaced)".to_string());
        }
        if !(50..=3000).contains(&self.pwm_lsb_nanoseconds) {
            problems.push(format!(
                "pwm lsb nanoseconds {} outside range 50..3000",
                self.pwm_lsb_nanoseconds
            ));
        }
        if self.pwm_dither_bits > 2 {
            problems.push(format!(
                "pwm dither bits {} outside range 0..2",
                self.pwm_dither_bits
            ));
        }
        if let Err(e) = self.led_rgb_sequence.parse::<ChannelOrder>() {
            problems.push(e.to_string());
        }
        if !self.panel_type.is_empty()
            && !PANEL_TYPES
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&self.panel_type))
        {
            problems.push(format!(
                "unknown panel type '{}' (supported: {})",
                self.panel_type,
                PANEL_TYPES.join(", ")
            ));
        }

        if !problems.is_empty() {
            return Err(Error::Configuration(problems.join("; ")));
        }

        // Only meaningful once the topology itself is sane.
        PixelMap::for_config(self)?;
        Ok(())
    }

    /// Channel order of the panel LEDs.
    pub fn channel_order(&self) -> Result<ChannelOrder> {
        self.led_rgb_sequence.parse()
    }

    /// Number of physical pixels addressed by the topology.
    ///
    /// `None` if the product does not fit a `usize`.
    pub fn pixel_count(&self) -> Option<usize> {
        [self.cols, self.chain_length, self.parallel]
            .iter()
            .try_fold(self.rows as usize, |n, &f| n.checked_mul(f as usize))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gpio_slowdown: default_gpio_slowdown(),
            daemon: false,
            drop_privileges: default_true(),
            drop_priv_user: default_priv_user(),
            drop_priv_group: default_priv_user(),
            do_gpio_init: default_true(),
        }
    }
}

impl RuntimeConfig {
    /// Runtime settings for running without any hardware attached.
    pub fn emulated() -> Self {
        Self {
            do_gpio_init: false,
            drop_privileges: false,
            ..Default::default()
        }
    }

    /// Checks the runtime parameters.
    pub fn validate(&self) -> Result<()> {
        if self.gpio_slowdown > MAX_GPIO_SLOWDOWN {
            return Err(Error::Configuration(format!(
                "gpio slowdown {} is outside usable range 0..{}",
                self.gpio_slowdown, MAX_GPIO_SLOWDOWN
            )));
        }
        Ok(())
    }
}
