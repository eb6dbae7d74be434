//! Pixel-write capability shared by everything that can be drawn on.
//!
//! Coordinates are signed so that drawing code can hand in values that fall
//! off any edge of the display. Out-of-range writes are silently ignored and
//! never touch storage; a render loop should not have to handle a failure
//! for every pixel.

/// 8-bit per channel RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    /// Creates a color from its channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Returns the channels as an array in R, G, B order.
    pub fn channels(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Rgb::new(r, g, b)
    }
}

/// Parses a hex color string such as `#ff8000`.
pub fn parse_hex_color(hex: &str) -> Option<Rgb> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(hex.get(0..2)?, 16).ok()?;
    let g = u8::from_str_radix(hex.get(2..4)?, 16).ok()?;
    let b = u8::from_str_radix(hex.get(4..6)?, 16).ok()?;
    Some(Rgb::new(r, g, b))
}

/// A fixed-size grid of RGB pixels.
///
/// Width and height never change after construction. `set_pixel` outside
/// `[0, width) x [0, height)` is a no-op.
pub trait Canvas {
    /// Width in pixels.
    fn width(&self) -> usize;

    /// Height in pixels.
    fn height(&self) -> usize;

    /// Sets one pixel. Out-of-bounds coordinates are ignored.
    fn set_pixel(&mut self, x: i32, y: i32, r: u8, g: u8, b: u8);

    /// Sets every pixel to black.
    fn clear(&mut self);

    /// Sets every pixel to the given color.
    fn fill(&mut self, r: u8, g: u8, b: u8);

    /// Sets one pixel from an [`Rgb`] value.
    fn set(&mut self, x: i32, y: i32, color: Rgb) {
        self.set_pixel(x, y, color.r, color.g, color.b);
    }

    /// Fills a rectangle, clipped to the canvas.
    fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgb) {
        for dy in 0..height as i32 {
            for dx in 0..width as i32 {
                self.set(x.saturating_add(dx), y.saturating_add(dy), color);
            }
        }
    }

    /// Writes a `width` x `height` block of row-major colors at (x, y).
    ///
    /// Pixels of the block that fall outside the canvas are dropped, as is
    /// anything beyond the end of `colors`.
    fn set_pixels(&mut self, x: i32, y: i32, width: u32, height: u32, colors: &[Rgb]) {
        let mut colors = colors.iter();
        for dy in 0..height as i32 {
            for dx in 0..width as i32 {
                match colors.next() {
                    Some(c) => self.set(x.saturating_add(dx), y.saturating_add(dy), *c),
                    None => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FF0000"), Some(Rgb::new(255, 0, 0)));
        assert_eq!(parse_hex_color("00ff80"), Some(Rgb::new(0, 255, 128)));
        assert_eq!(parse_hex_color("#000000"), Some(Rgb::BLACK));
        assert_eq!(parse_hex_color("invalid"), None);
        assert_eq!(parse_hex_color("#12345"), None);
        assert_eq!(parse_hex_color("#ééé"), None);
    }

    #[test]
    fn test_rgb_from_tuple() {
        let c: Rgb = (1, 2, 3).into();
        assert_eq!(c.channels(), [1, 2, 3]);
    }
}
