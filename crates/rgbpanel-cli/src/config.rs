//! Configuration file and `--led-*` flag handling.

use anyhow::{Context, Result};
use clap::Args;
use rgbpanel_hw::{HardwareConfig, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Panel topology and rendering
    #[serde(default)]
    pub matrix: HardwareConfig,

    /// Process level hardware access
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Demo loop settings
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Demo loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Show each frame for this many refresh cycles
    #[serde(default = "default_frame_rate_fraction")]
    pub frame_rate_fraction: u32,

    /// Color used by the fill and pulse demos
    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frame_rate_fraction: default_frame_rate_fraction(),
            color: default_color(),
        }
    }
}

fn default_frame_rate_fraction() -> u32 {
    1
}

fn default_color() -> String {
    "#ff0000".to_string()
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;
        Ok(())
    }
}

/// Matrix flags. Every flag given overrides the configuration file.
#[derive(Args, Debug, Default, Clone)]
pub struct MatrixArgs {
    /// Panel rows. Typically 8, 16, 32 or 64
    #[arg(long = "led-rows", value_name = "ROWS")]
    pub rows: Option<u32>,

    /// Panel columns. Typically 32 or 64
    #[arg(long = "led-cols", value_name = "COLS")]
    pub cols: Option<u32>,

    /// Number of daisy-chained panels
    #[arg(long = "led-chain", value_name = "CHAINED")]
    pub chain: Option<u32>,

    /// Parallel chains (1..3)
    #[arg(long = "led-parallel", value_name = "PARALLEL")]
    pub parallel: Option<u32>,

    /// Multiplexing type: 0=direct; 1=Stripe; 2=Checkered; 3=Spiral; 4=ZStripe
    #[arg(long = "led-multiplexing", value_name = "0..4")]
    pub multiplexing: Option<u8>,

    /// Semicolon-separated pixel mappers, e.g. "U-mapper;Rotate:90"
    #[arg(long = "led-pixel-mapper", value_name = "MAPPERS")]
    pub pixel_mapper: Option<String>,

    /// PWM bits (1..11)
    #[arg(long = "led-pwm-bits", value_name = "1..11")]
    pub pwm_bits: Option<u8>,

    /// Brightness in percent (1..100)
    #[arg(long = "led-brightness", value_name = "PERCENT")]
    pub brightness: Option<u8>,

    /// 0 = progressive, 1 = interlaced
    #[arg(long = "led-scan-mode", value_name = "0..1")]
    pub scan_mode: Option<u8>,

    /// 0 = default, 1 = AB-addressed panels, 2 = direct row select, 3 = ABC-addressed panels
    #[arg(long = "led-row-addr-type", value_name = "0..3")]
    pub row_addr_type: Option<u8>,

    /// Log the refresh rate
    #[arg(long = "led-show-refresh")]
    pub show_refresh: bool,

    /// Switch if your matrix has inverse colors on
    #[arg(long = "led-inverse")]
    pub inverse: bool,

    /// Switch if your matrix has LEDs swapped, e.g. "BGR"
    #[arg(long = "led-rgb-sequence", value_name = "SEQUENCE")]
    pub rgb_sequence: Option<String>,

    /// PWM nanoseconds for the least significant bit (50..3000)
    #[arg(long = "led-pwm-lsb-nanoseconds", value_name = "NANOS")]
    pub pwm_lsb_nanoseconds: Option<u32>,

    /// Time dithering of lower bit planes (0..2)
    #[arg(long = "led-pwm-dither-bits", value_name = "0..2")]
    pub pwm_dither_bits: Option<u8>,

    /// Don't use hardware pin pulse generation
    #[arg(long = "led-no-hardware-pulse")]
    pub no_hardware_pulse: bool,

    /// Panel chip that needs initialization, e.g. "FM6126A"
    #[arg(long = "led-panel-type", value_name = "NAME")]
    pub panel_type: Option<String>,

    /// Name of the GPIO mapping, e.g. "regular" or "adafruit-hat"
    #[arg(long = "led-gpio-mapping", value_name = "NAME")]
    pub gpio_mapping: Option<String>,

    /// Limit refresh rate to this frequency in Hz (0 = no limit)
    #[arg(long = "led-limit-refresh", value_name = "HZ")]
    pub limit_refresh: Option<u32>,

    /// Sleep instead of busy waiting when limiting the refresh rate
    #[arg(long = "led-no-busy-waiting")]
    pub no_busy_waiting: bool,

    /// Slow down writing to GPIO (0..5)
    #[arg(long = "led-slowdown-gpio", value_name = "0..5")]
    pub slowdown_gpio: Option<u8>,

    /// Run as daemon
    #[arg(long = "led-daemon")]
    pub daemon: bool,

    /// Don't drop privileges from 'root' after initializing the hardware
    #[arg(long = "led-no-drop-privs")]
    pub no_drop_privs: bool,

    /// Drop privileges to this user
    #[arg(long = "led-drop-priv-user", value_name = "USER")]
    pub drop_priv_user: Option<String>,

    /// Drop privileges to this group
    #[arg(long = "led-drop-priv-group", value_name = "GROUP")]
    pub drop_priv_group: Option<String>,

    /// Don't touch the GPIO; render into an emulated panel
    #[arg(long = "led-no-gpio-init")]
    pub no_gpio_init: bool,
}

impl MatrixArgs {
    /// Overrides configuration values with the flags that were given.
    pub fn apply(&self, matrix: &mut HardwareConfig, runtime: &mut RuntimeConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut matrix.rows, &self.rows);
        set(&mut matrix.cols, &self.cols);
        set(&mut matrix.chain_length, &self.chain);
        set(&mut matrix.parallel, &self.parallel);
        set(&mut matrix.multiplexing, &self.multiplexing);
        set(&mut matrix.pixel_mapper_config, &self.pixel_mapper);
        set(&mut matrix.pwm_bits, &self.pwm_bits);
        set(&mut matrix.brightness, &self.brightness);
        set(&mut matrix.scan_mode, &self.scan_mode);
        set(&mut matrix.row_address_type, &self.row_addr_type);
        set(&mut matrix.led_rgb_sequence, &self.rgb_sequence);
        set(&mut matrix.pwm_lsb_nanoseconds, &self.pwm_lsb_nanoseconds);
        set(&mut matrix.pwm_dither_bits, &self.pwm_dither_bits);
        set(&mut matrix.panel_type, &self.panel_type);
        set(&mut matrix.hardware_mapping, &self.gpio_mapping);
        set(&mut matrix.limit_refresh_rate_hz, &self.limit_refresh);
        set(&mut runtime.gpio_slowdown, &self.slowdown_gpio);
        set(&mut runtime.drop_priv_user, &self.drop_priv_user);
        set(&mut runtime.drop_priv_group, &self.drop_priv_group);

        matrix.show_refresh_rate |= self.show_refresh;
        matrix.inverse_colors |= self.inverse;
        matrix.disable_hardware_pulsing |= self.no_hardware_pulse;
        matrix.disable_busy_waiting |= self.no_busy_waiting;
        runtime.daemon |= self.daemon;
        if self.no_drop_privs {
            runtime.drop_privileges = false;
        }
        if self.no_gpio_init {
            runtime.do_gpio_init = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [matrix]
            rows = 16
            chain_length = 2
            led_rgb_sequence = "BGR"

            [runtime]
            gpio_slowdown = 3
            "#,
        )
        .unwrap();

        let args = MatrixArgs {
            rows: Some(64),
            no_gpio_init: true,
            inverse: true,
            ..Default::default()
        };
        args.apply(&mut config.matrix, &mut config.runtime);

        assert_eq!(config.matrix.rows, 64);
        assert_eq!(config.matrix.chain_length, 2);
        assert_eq!(config.matrix.led_rgb_sequence, "BGR");
        assert!(config.matrix.inverse_colors);
        assert_eq!(config.runtime.gpio_slowdown, 3);
        assert!(!config.runtime.do_gpio_init);
        assert!(config.runtime.drop_privileges);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.demo.frame_rate_fraction, 1);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("rgbpanel-config-{}.toml", std::process::id()));
        let mut config = Config::default();
        config.matrix.pixel_mapper_config = "U-mapper;Rotate:90".to_string();
        config.runtime.daemon = true;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load("/nonexistent/rgbpanel.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration file"));
    }
}
