//! Color pipeline from stored 8-bit pixels to PWM output levels.
//!
//! Panels show up to [`MAX_PWM_BITS`] bit planes per channel. A stored
//! channel value is scaled by brightness, optionally luminance corrected
//! (CIE1931), and left aligned to 11 bits. Only the `pwm_bits` most
//! significant planes are ever lit, so the lower ones are masked off here.

use crate::canvas::Rgb;
use crate::framebuffer::FrameBuffer;
use crate::{Error, Result};
use std::str::FromStr;
use std::sync::OnceLock;

/// Maximum usable bit planes.
pub const MAX_PWM_BITS: u8 = 11;

/// Largest output level.
const LEVEL_MAX: u16 = (1 << MAX_PWM_BITS) - 1;

/// Per-buffer rendering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    /// Bit planes per channel (1..=11).
    pub pwm_bits: u8,
    /// Apply CIE1931 luminance correction.
    pub luminance_correct: bool,
    /// Brightness in percent (0..=100).
    pub brightness: u8,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            pwm_bits: MAX_PWM_BITS,
            luminance_correct: true,
            brightness: 100,
        }
    }
}

impl RenderSettings {
    /// Returns true if `bits` is a usable PWM depth.
    pub fn valid_pwm_bits(bits: u8) -> bool {
        (1..=MAX_PWM_BITS).contains(&bits)
    }

    /// Returns true if `percent` is a usable brightness.
    pub fn valid_brightness(percent: u8) -> bool {
        percent <= 100
    }

    /// Lowest bit plane that is shown with the current PWM depth.
    pub fn min_plane(&self) -> u8 {
        MAX_PWM_BITS.saturating_sub(self.pwm_bits.max(1))
    }

    /// Maps one 8-bit channel value to its output level.
    pub fn level(&self, value: u8) -> u16 {
        let raw = if self.luminance_correct {
            luminance_table()[self.brightness.min(100) as usize][value as usize]
        } else {
            let scaled = value as u32 * self.brightness.min(100) as u32 / 100;
            (scaled << (MAX_PWM_BITS - 8)) as u16
        };
        raw & self.plane_mask()
    }

    fn plane_mask(&self) -> u16 {
        LEVEL_MAX & !((1u16 << self.min_plane()) - 1)
    }
}

/// CIE1931 lightness to luminance, scaled to the full output range.
fn luminance_cie1931(value: u8, brightness: u8) -> u16 {
    let out_factor = LEVEL_MAX as f64;
    let v = value as f64 * brightness as f64 / 255.0;
    let luminance = if v <= 8.0 {
        v / 902.3
    } else {
        ((v + 16.0) / 116.0).powi(3)
    };
    (out_factor * luminance).round() as u16
}

fn luminance_table() -> &'static [[u16; 256]] {
    static TABLE: OnceLock<Vec<[u16; 256]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..=100u8)
            .map(|brightness| {
                let mut row = [0u16; 256];
                for (value, slot) in row.iter_mut().enumerate() {
                    *slot = luminance_cie1931(value as u8, brightness);
                }
                row
            })
            .collect()
    })
}

/// Order in which the panel's LEDs expect the color channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOrder([usize; 3]);

impl ChannelOrder {
    pub const RGB: ChannelOrder = ChannelOrder([0, 1, 2]);

    /// Reorders R, G, B levels into the panel's wiring order.
    pub fn apply<T: Copy>(&self, channels: [T; 3]) -> [T; 3] {
        [
            channels[self.0[0]],
            channels[self.0[1]],
            channels[self.0[2]],
        ]
    }
}

impl Default for ChannelOrder {
    fn default() -> Self {
        ChannelOrder::RGB
    }
}

impl FromStr for ChannelOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::Configuration(format!(
                "LED sequence '{}' must be a permutation of the letters R, G and B",
                s
            ))
        };
        if s.chars().count() != 3 {
            return Err(invalid());
        }
        let mut order = [0usize; 3];
        let mut seen = [false; 3];
        for (slot, c) in order.iter_mut().zip(s.chars()) {
            let channel = match c.to_ascii_uppercase() {
                'R' => 0,
                'G' => 1,
                'B' => 2,
                _ => return Err(invalid()),
            };
            if seen[channel] {
                return Err(invalid());
            }
            seen[channel] = true;
            *slot = channel;
        }
        Ok(ChannelOrder(order))
    }
}

impl std::fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &channel in &self.0 {
            let letter = match channel {
                0 => 'R',
                1 => 'G',
                _ => 'B',
            };
            write!(f, "{}", letter)?;
        }
        Ok(())
    }
}

/// Matrix-wide output properties that apply to every buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputFormat {
    /// Panel LEDs are lit by a low level.
    pub inverse: bool,
    /// Channel wiring order.
    pub order: ChannelOrder,
}

impl OutputFormat {
    /// Output levels for one color under the given settings.
    pub fn levels(&self, settings: &RenderSettings, color: Rgb) -> [u16; 3] {
        let mut levels = color.channels().map(|c| settings.level(c));
        if self.inverse {
            let mask = settings.plane_mask();
            levels = levels.map(|l| (l ^ LEVEL_MAX) & mask);
        }
        self.order.apply(levels)
    }

    /// Renders a frame into physical-order output levels.
    ///
    /// `out` is resized to the frame's physical pixel count and reused
    /// between calls.
    pub fn render(&self, frame: &FrameBuffer, out: &mut Vec<[u16; 3]>) {
        let settings = frame.render_settings();
        out.clear();
        out.extend(
            frame
                .physical_pixels()
                .iter()
                .map(|&c| self.levels(&settings, c)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale_levels() {
        let linear = RenderSettings {
            luminance_correct: false,
            ..Default::default()
        };
        assert_eq!(linear.level(255), 255 << 3);
        assert_eq!(linear.level(0), 0);

        let corrected = RenderSettings::default();
        assert_eq!(corrected.level(255), LEVEL_MAX);
        assert_eq!(corrected.level(0), 0);
    }

    #[test]
    fn test_luminance_is_monotonic() {
        let settings = RenderSettings::default();
        let mut last = 0;
        for v in 0..=255u8 {
            let level = settings.level(v);
            assert!(level >= last, "level dropped at {}", v);
            last = level;
        }
        // Perceptual correction darkens the midtones.
        assert!(settings.level(128) < 128 << 3);
    }

    #[test]
    fn test_brightness_scales_output() {
        let half = RenderSettings {
            brightness: 50,
            luminance_correct: false,
            ..Default::default()
        };
        assert_eq!(half.level(200), 100 << 3);

        let off = RenderSettings {
            brightness: 0,
            ..Default::default()
        };
        assert_eq!(off.level(255), 0);
    }

    #[test]
    fn test_pwm_bits_mask_low_planes() {
        let settings = RenderSettings {
            pwm_bits: 1,
            luminance_correct: false,
            ..Default::default()
        };
        // Only the most significant plane survives.
        assert_eq!(settings.level(255), 1 << 10);
        assert_eq!(settings.level(127), 0);
        assert_eq!(settings.min_plane(), 10);
    }

    #[test]
    fn test_channel_order() {
        let order: ChannelOrder = "bgr".parse().unwrap();
        assert_eq!(order.apply([1, 2, 3]), [3, 2, 1]);
        assert_eq!(order.to_string(), "BGR");
        assert_eq!("RGB".parse::<ChannelOrder>().unwrap(), ChannelOrder::RGB);
        assert!("RGGB".parse::<ChannelOrder>().is_err());
        assert!("RRB".parse::<ChannelOrder>().is_err());
        assert!("RGX".parse::<ChannelOrder>().is_err());
    }

    #[test]
    fn test_inverse_output() {
        let format = OutputFormat {
            inverse: true,
            order: ChannelOrder::RGB,
        };
        let settings = RenderSettings::default();
        assert_eq!(
            format.levels(&settings, Rgb::BLACK),
            [LEVEL_MAX, LEVEL_MAX, LEVEL_MAX]
        );
        assert_eq!(format.levels(&settings, Rgb::WHITE), [0, 0, 0]);
    }
}
