//! RGB frame buffer with PWM rendering parameters.

use crate::canvas::{Canvas, Rgb};
use crate::color::RenderSettings;
use crate::mapper::PixelMap;
use crate::{Error, Result};
use std::sync::Arc;

/// Pixel storage for one full frame of the matrix.
///
/// Pixels are stored in physical order; the shared [`PixelMap`] translates
/// visible coordinates on write. The rendering parameters only change how
/// the refresh stage interprets the stored values.
pub struct FrameBuffer {
    map: Arc<PixelMap>,
    /// Pixel data in physical matrix order.
    pixels: Vec<Rgb>,
    settings: RenderSettings,
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.map.width())
            .field("height", &self.map.height())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl FrameBuffer {
    pub(crate) fn new(map: Arc<PixelMap>, settings: RenderSettings) -> Self {
        Self {
            pixels: vec![Rgb::BLACK; map.physical_len()],
            map,
            settings,
        }
    }

    /// Creates an unmapped frame buffer initialized to black.
    ///
    /// # Panics
    ///
    /// If `width * height` exceeds [`MAX_PIXELS`](crate::mapper::MAX_PIXELS).
    pub fn with_dimensions(width: usize, height: usize) -> Self {
        Self::new(
            Arc::new(PixelMap::identity(width, height)),
            RenderSettings::default(),
        )
    }

    /// Gets a pixel at the given visible coordinates.
    pub fn get_pixel(&self, x: i32, y: i32) -> Option<Rgb> {
        self.map.physical_index(x, y).map(|idx| self.pixels[idx])
    }

    /// Sets the number of PWM bit planes. Returns false if out of range.
    pub fn set_pwm_bits(&mut self, bits: u8) -> bool {
        if !RenderSettings::valid_pwm_bits(bits) {
            return false;
        }
        self.settings.pwm_bits = bits;
        true
    }

    /// Returns the number of PWM bit planes.
    pub fn pwm_bits(&self) -> u8 {
        self.settings.pwm_bits
    }

    /// Enables or disables CIE1931 luminance correction.
    pub fn set_luminance_correct(&mut self, on: bool) {
        self.settings.luminance_correct = on;
    }

    /// Returns true if luminance correction is enabled.
    pub fn luminance_correct(&self) -> bool {
        self.settings.luminance_correct
    }

    /// Sets brightness in percent. Returns false if above 100.
    pub fn set_brightness(&mut self, percent: u8) -> bool {
        if !RenderSettings::valid_brightness(percent) {
            return false;
        }
        self.settings.brightness = percent;
        true
    }

    /// Returns brightness in percent.
    pub fn brightness(&self) -> u8 {
        self.settings.brightness
    }

    /// Returns the rendering parameters.
    pub fn render_settings(&self) -> RenderSettings {
        self.settings
    }

    /// Returns the pixels in physical matrix order.
    pub fn physical_pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn physical_width(&self) -> usize {
        self.map.physical_width()
    }

    pub fn physical_height(&self) -> usize {
        self.map.physical_height()
    }

    /// Returns the visible-to-physical map.
    pub fn pixel_map(&self) -> &Arc<PixelMap> {
        &self.map
    }

    /// Copies the pixel content of `other`.
    ///
    /// Rendering parameters are left untouched. Buffers of a different
    /// visible size are rejected.
    pub fn copy_from(&mut self, other: &FrameBuffer) -> Result<()> {
        if self.width() != other.width() || self.height() != other.height() {
            return Err(Error::DimensionMismatch {
                expected_width: self.width(),
                expected_height: self.height(),
                width: other.width(),
                height: other.height(),
            });
        }

        if Arc::ptr_eq(&self.map, &other.map) || self.map == other.map {
            self.pixels.copy_from_slice(&other.pixels);
            return Ok(());
        }

        for y in 0..self.height() as i32 {
            for x in 0..self.width() as i32 {
                if let Some(color) = other.get_pixel(x, y) {
                    self.set(x, y, color);
                }
            }
        }
        Ok(())
    }

    /// Returns the pixel content as RGB byte triplets in physical order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.pixels.len() * 3);
        for pixel in &self.pixels {
            data.extend_from_slice(&pixel.channels());
        }
        data
    }

    /// Restores pixel content produced by [`FrameBuffer::serialize`] on a
    /// buffer of the same topology.
    pub fn deserialize(&mut self, data: &[u8]) -> Result<()> {
        let expected = self.pixels.len() * 3;
        if data.len() != expected {
            return Err(Error::FramebufferSize {
                expected,
                actual: data.len(),
            });
        }
        for (pixel, chunk) in self.pixels.iter_mut().zip(data.chunks_exact(3)) {
            *pixel = Rgb::new(chunk[0], chunk[1], chunk[2]);
        }
        Ok(())
    }
}

impl Canvas for FrameBuffer {
    fn width(&self) -> usize {
        self.map.width()
    }

    fn height(&self) -> usize {
        self.map.height()
    }

    #[inline]
    fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8) {
        if let Some(idx) = self.map.physical_index(x, y) {
            self.pixels[idx] = Rgb::new(r, g, b);
        }
    }

    fn clear(&mut self) {
        self.pixels.fill(Rgb::BLACK);
    }

    fn fill(&mut self, r: u8, g: u8, b: u8) {
        self.pixels.fill(Rgb::new(r, g, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;

    #[test]
    fn test_new_buffer_is_black() {
        let fb = FrameBuffer::with_dimensions(32, 16);
        assert_eq!((fb.width(), fb.height()), (32, 16));
        assert!(fb.physical_pixels().iter().all(|&p| p == Rgb::BLACK));
    }

    #[test]
    fn test_out_of_bounds_writes_are_ignored() {
        let mut fb = FrameBuffer::with_dimensions(8, 4);
        fb.fill(1, 2, 3);
        let before = fb.serialize();

        fb.set_pixel(-1, 0, 255, 255, 255);
        fb.set_pixel(0, -1, 255, 255, 255);
        fb.set_pixel(8, 0, 255, 255, 255);
        fb.set_pixel(0, 4, 255, 255, 255);
        fb.set_pixel(i32::MAX, i32::MIN, 255, 255, 255);
        assert_eq!(fb.serialize(), before);

        fb.set_pixel(7, 3, 9, 9, 9);
        assert_eq!(fb.get_pixel(7, 3), Some(Rgb::new(9, 9, 9)));
        assert_eq!(fb.get_pixel(8, 3), None);
    }

    #[test]
    fn test_clear_and_fill_are_idempotent() {
        let mut fb = FrameBuffer::with_dimensions(4, 4);
        fb.fill(10, 20, 30);
        fb.fill(10, 20, 30);
        assert!(fb
            .physical_pixels()
            .iter()
            .all(|&p| p == Rgb::new(10, 20, 30)));

        fb.clear();
        let once = fb.serialize();
        fb.clear();
        assert_eq!(fb.serialize(), once);
        assert!(once.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_render_parameters() {
        let mut fb = FrameBuffer::with_dimensions(4, 4);
        assert_eq!(fb.pwm_bits(), 11);
        assert!(fb.set_pwm_bits(7));
        assert!(!fb.set_pwm_bits(0));
        assert!(!fb.set_pwm_bits(12));
        assert_eq!(fb.pwm_bits(), 7);

        assert!(fb.set_brightness(0));
        assert!(!fb.set_brightness(101));
        assert_eq!(fb.brightness(), 0);

        fb.set_luminance_correct(false);
        assert!(!fb.luminance_correct());

        // Parameters never change the stored pixels.
        fb.set_pixel(1, 1, 200, 100, 50);
        fb.set_brightness(10);
        assert_eq!(fb.get_pixel(1, 1), Some(Rgb::new(200, 100, 50)));
    }

    #[test]
    fn test_copy_from() {
        let mut src = FrameBuffer::with_dimensions(8, 8);
        src.set_pixel(3, 4, 1, 2, 3);
        src.set_brightness(20);

        let mut dst = FrameBuffer::with_dimensions(8, 8);
        dst.fill(9, 9, 9);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.serialize(), src.serialize());
        assert_eq!(dst.brightness(), 100);

        // Copy is independent of the source afterwards.
        src.set_pixel(3, 4, 0, 0, 0);
        assert_eq!(dst.get_pixel(3, 4), Some(Rgb::new(1, 2, 3)));
    }

    #[test]
    fn test_copy_dimension_mismatch() {
        let src = FrameBuffer::with_dimensions(8, 4);
        let mut dst = FrameBuffer::with_dimensions(4, 8);
        let err = dst.copy_from(&src).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected_width: 4,
                expected_height: 8,
                width: 8,
                height: 4
            }
        ));
    }

    #[test]
    fn test_copy_across_pixel_maps() {
        let rotated = HardwareConfig {
            pixel_mapper_config: "Rotate:180".to_string(),
            ..Default::default()
        };
        let map = Arc::new(PixelMap::for_config(&rotated).unwrap());
        let mut src = FrameBuffer::new(map, RenderSettings::default());
        src.set_pixel(0, 0, 5, 6, 7);

        let mut dst = FrameBuffer::with_dimensions(32, 32);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.get_pixel(0, 0), Some(Rgb::new(5, 6, 7)));
        assert_eq!(dst.physical_pixels()[0], Rgb::new(5, 6, 7));
        assert_eq!(src.physical_pixels()[32 * 32 - 1], Rgb::new(5, 6, 7));
    }

    #[test]
    fn test_serialize_restores_content() {
        let mut fb = FrameBuffer::with_dimensions(4, 2);
        fb.set_pixel(1, 0, 10, 20, 30);
        let data = fb.serialize();
        assert_eq!(data.len(), 4 * 2 * 3);
        assert_eq!(&data[3..6], &[10, 20, 30]);

        let mut other = FrameBuffer::with_dimensions(4, 2);
        other.deserialize(&data).unwrap();
        assert_eq!(other.get_pixel(1, 0), Some(Rgb::new(10, 20, 30)));

        let err = other.deserialize(&data[..5]).unwrap_err();
        assert!(matches!(
            err,
            Error::FramebufferSize {
                expected: 24,
                actual: 5
            }
        ));
    }
}
