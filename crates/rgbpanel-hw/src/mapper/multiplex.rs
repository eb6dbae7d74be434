//! Multiplex mappers for panels that scan more than two rows at a time.
//!
//! Such panels are internally wired as a wider, flatter matrix. Each mapper
//! handles a single panel; chains and parallel chains are composed by
//! [`MultiplexMapper`].

use super::PixelMapper;
use crate::Result;

/// Known panel multiplexing schemes, selected by 1-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexKind {
    Stripe,
    Checkered,
    Spiral,
    ZStripe,
}

impl MultiplexKind {
    /// All schemes in index order.
    pub const ALL: [MultiplexKind; 4] = [
        MultiplexKind::Stripe,
        MultiplexKind::Checkered,
        MultiplexKind::Spiral,
        MultiplexKind::ZStripe,
    ];

    /// Looks up a scheme by its configuration index (1-based; 0 is direct).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => None,
            n => Self::ALL.get(n as usize - 1).copied(),
        }
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            MultiplexKind::Stripe => "Stripe",
            MultiplexKind::Checkered => "Checkered",
            MultiplexKind::Spiral => "Spiral",
            MultiplexKind::ZStripe => "ZStripe",
        }
    }

    /// How much wider (and flatter) the physical panel is.
    pub fn stretch_factor(&self) -> usize {
        2
    }

    /// Human readable list such as `1=Stripe; 2=Checkered`.
    pub fn describe_all() -> String {
        Self::ALL
            .iter()
            .enumerate()
            .map(|(i, kind)| format!("{}={}", i + 1, kind.name()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Multiplexing for a chain of identical panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexMapper {
    kind: MultiplexKind,
    panel_cols: usize,
    panel_rows: usize,
}

impl MultiplexMapper {
    /// Creates a mapper for panels of the given visible size.
    pub fn new(kind: MultiplexKind, panel_cols: usize, panel_rows: usize) -> Self {
        Self {
            kind,
            panel_cols,
            panel_rows,
        }
    }

    /// Size of one panel as the refresh engine sees it.
    pub fn physical_panel_size(&self) -> (usize, usize) {
        let stretch = self.kind.stretch_factor();
        (self.panel_cols * stretch, self.panel_rows / stretch)
    }

    fn map_single_panel(&self, x: usize, y: usize) -> (usize, usize) {
        let cols = self.panel_cols;
        let rows = self.panel_rows;
        let striped_y = (y / (rows / 2)) * (rows / 4) + y % (rows / 4);
        let is_top = (y % (rows / 2)) < rows / 4;

        match self.kind {
            MultiplexKind::Stripe => (if is_top { x + cols } else { x }, striped_y),
            MultiplexKind::Checkered => {
                let is_left = x < cols / 2;
                let logic_x = match (is_top, is_left) {
                    (true, true) => x + cols / 2,
                    (true, false) => x + cols,
                    (false, true) => x,
                    (false, false) => x + cols / 2,
                };
                (logic_x, striped_y)
            }
            MultiplexKind::Spiral => {
                let quarter_width = cols / 4;
                let quarter = x / quarter_width;
                let offset = x % quarter_width;
                let logic_x = 2 * quarter * quarter_width
                    + if is_top {
                        quarter_width - 1 - offset
                    } else {
                        quarter_width + offset
                    };
                (logic_x, striped_y)
            }
            MultiplexKind::ZStripe => {
                let x_offset = 8 * (x / 8);
                let y_offset = (y % 8) / 4;
                (x + 8 * y_offset + x_offset, (y % 4) + 4 * (y / 8))
            }
        }
    }
}

impl PixelMapper for MultiplexMapper {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn visible_size(&self, matrix_width: usize, matrix_height: usize) -> Result<(usize, usize)> {
        let stretch = self.kind.stretch_factor();
        Ok((matrix_width / stretch, matrix_height * stretch))
    }

    fn map_visible_to_matrix(
        &self,
        _matrix_width: usize,
        _matrix_height: usize,
        x: usize,
        y: usize,
    ) -> (isize, isize) {
        let stretch = self.kind.stretch_factor();
        let chained_panel = x / self.panel_cols;
        let parallel_panel = y / self.panel_rows;
        let (new_x, new_y) =
            self.map_single_panel(x % self.panel_cols, y % self.panel_rows);

        let matrix_x = chained_panel * stretch * self.panel_cols + new_x;
        let matrix_y = parallel_panel * self.panel_rows / stretch + new_y;
        (matrix_x as isize, matrix_y as isize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_index() {
        assert_eq!(MultiplexKind::from_index(0), None);
        assert_eq!(MultiplexKind::from_index(1), Some(MultiplexKind::Stripe));
        assert_eq!(MultiplexKind::from_index(4), Some(MultiplexKind::ZStripe));
        assert_eq!(MultiplexKind::from_index(5), None);
    }

    #[test]
    fn test_describe_all() {
        assert_eq!(
            MultiplexKind::describe_all(),
            "1=Stripe; 2=Checkered; 3=Spiral; 4=ZStripe"
        );
    }

    #[test]
    fn test_stripe_layout() {
        let mux = MultiplexMapper::new(MultiplexKind::Stripe, 32, 16);
        assert_eq!(mux.physical_panel_size(), (64, 8));
        // Upper quarter of each half goes to the right half of the wide row.
        assert_eq!(mux.map_visible_to_matrix(64, 8, 0, 0), (32, 0));
        assert_eq!(mux.map_visible_to_matrix(64, 8, 0, 4), (0, 0));
        assert_eq!(mux.map_visible_to_matrix(64, 8, 0, 8), (32, 4));
    }
}
