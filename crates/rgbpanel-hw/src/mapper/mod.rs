//! Visible-to-physical pixel mapping.
//!
//! Panels are wired in all sorts of ways. The physical matrix the refresh
//! engine walks is `(cols * chain) x (rows * parallel)` in chain order, but
//! the coordinates application code draws in can differ: multiplexed panels
//! scan their rows in stripes, and chains of panels can be folded into
//! U or S shapes or rotated. Every mapper in the chain rewrites the
//! [`PixelMap`] that all buffers of a controller share, so `set_pixel` costs
//! one table lookup no matter how many mappers were applied.

mod multiplex;
mod named;

pub use multiplex::{MultiplexKind, MultiplexMapper};
pub use named::{available_pixel_mappers, find_pixel_mapper};

use crate::config::HardwareConfig;
use crate::{Error, Result};
use tracing::{debug, warn};

/// Largest number of pixels one controller drives.
pub const MAX_PIXELS: usize = 1 << 22;

/// Index value for visible pixels that have no physical pixel behind them.
const UNMAPPED: u32 = u32::MAX;

/// Transform from one coordinate space to a new visible one.
pub trait PixelMapper {
    /// Name used in pixel mapper configuration strings.
    fn name(&self) -> &str;

    /// Visible size for a matrix of the given size.
    fn visible_size(&self, matrix_width: usize, matrix_height: usize) -> Result<(usize, usize)>;

    /// Maps a visible coordinate to the coordinate in the matrix below.
    ///
    /// Results outside the matrix are reported and the pixel stays
    /// unmapped.
    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> (isize, isize);
}

/// Lookup table from visible coordinates to physical pixel index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMap {
    width: usize,
    height: usize,
    physical_width: usize,
    physical_height: usize,
    index: Vec<u32>,
}

impl PixelMap {
    /// One-to-one map of a physical matrix.
    ///
    /// # Panics
    ///
    /// If `width * height` exceeds [`MAX_PIXELS`].
    pub fn identity(width: usize, height: usize) -> Self {
        match Self::try_identity(width, height) {
            Ok(map) => map,
            Err(e) => panic!("{}", e),
        }
    }

    /// One-to-one map of a physical matrix, or a configuration error when
    /// it holds more than [`MAX_PIXELS`] pixels.
    pub fn try_identity(width: usize, height: usize) -> Result<Self> {
        let len = width
            .checked_mul(height)
            .filter(|&n| n <= MAX_PIXELS)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "{}x{} pixels exceed the supported maximum of {}",
                    width, height, MAX_PIXELS
                ))
            })?;
        Ok(Self {
            width,
            height,
            physical_width: width,
            physical_height: height,
            index: (0..len).collect(),
        })
    }

    /// Builds the map for a hardware configuration: the multiplex mapper
    /// first, followed by the named mappers in configuration order.
    pub fn for_config(config: &HardwareConfig) -> Result<Self> {
        let mut panel_cols = config.cols as usize;
        let mut panel_rows = config.rows as usize;

        let multiplexer = match config.multiplexing {
            0 => None,
            n => {
                let kind = MultiplexKind::from_index(n).ok_or_else(|| {
                    Error::Configuration(format!("Unknown multiplexing type {}", n))
                })?;
                Some(MultiplexMapper::new(kind, panel_cols, panel_rows))
            }
        };

        // Multiplexed panels have a different physical layout than visible.
        if let Some(mux) = &multiplexer {
            (panel_cols, panel_rows) = mux.physical_panel_size();
        }

        let width = panel_cols.checked_mul(config.chain_length as usize);
        let height = panel_rows.checked_mul(config.parallel as usize);
        let mut map = match (width, height) {
            (Some(width), Some(height)) => PixelMap::try_identity(width, height)?,
            _ => {
                return Err(Error::Configuration(format!(
                    "{} chained {}x{} panels exceed the supported size",
                    config.chain_length, config.cols, config.rows
                )))
            }
        };
        if let Some(mux) = &multiplexer {
            map = map.apply(mux)?;
        }

        for (name, param) in parse_mapper_config(&config.pixel_mapper_config) {
            let mapper = find_pixel_mapper(
                &name,
                config.chain_length as usize,
                config.parallel as usize,
                param.as_deref(),
            )?;
            map = map.apply(mapper.as_ref())?;
        }

        debug!(
            "Pixel map: visible {}x{}, physical {}x{}",
            map.width, map.height, map.physical_width, map.physical_height
        );
        Ok(map)
    }

    /// Visible width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Visible height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Width of the physical matrix.
    pub fn physical_width(&self) -> usize {
        self.physical_width
    }

    /// Height of the physical matrix.
    pub fn physical_height(&self) -> usize {
        self.physical_height
    }

    /// Number of physical pixels.
    pub fn physical_len(&self) -> usize {
        self.physical_width * self.physical_height
    }

    /// Physical index for a visible coordinate, `None` when out of range
    /// or unmapped.
    #[inline]
    pub fn physical_index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return None;
        }
        match self.index[y * self.width + x] {
            UNMAPPED => None,
            idx => Some(idx as usize),
        }
    }

    /// Returns a new map with `mapper` applied on top of this one.
    pub fn apply(&self, mapper: &dyn PixelMapper) -> Result<PixelMap> {
        let (new_width, new_height) = mapper.visible_size(self.width, self.height)?;
        if new_width == 0 || new_height == 0 {
            return Err(Error::MapperParameter {
                mapper: mapper.name().to_string(),
                reason: format!(
                    "{}x{} display maps to an empty {}x{} area",
                    self.width, self.height, new_width, new_height
                ),
            });
        }

        let mut index = vec![UNMAPPED; new_width * new_height];
        for y in 0..new_height {
            for x in 0..new_width {
                let (orig_x, orig_y) = mapper.map_visible_to_matrix(self.width, self.height, x, y);
                if orig_x < 0
                    || orig_y < 0
                    || orig_x as usize >= self.width
                    || orig_y as usize >= self.height
                {
                    warn!(
                        "Error in pixel mapper {}: ({}, {}) -> ({}, {}) [range: {}x{}]",
                        mapper.name(),
                        x,
                        y,
                        orig_x,
                        orig_y,
                        self.width,
                        self.height
                    );
                    continue;
                }
                index[y * new_width + x] =
                    self.index[orig_y as usize * self.width + orig_x as usize];
            }
        }

        Ok(PixelMap {
            width: new_width,
            height: new_height,
            physical_width: self.physical_width,
            physical_height: self.physical_height,
            index,
        })
    }
}

/// Splits a configuration such as `"U-mapper;Rotate:90"` into mapper names
/// and optional parameters.
pub fn parse_mapper_config(config: &str) -> Vec<(String, Option<String>)> {
    let mut mappers = Vec::new();
    for part in config.split(';') {
        let (name, param) = match part.split_once(':') {
            Some((name, param)) => (name.trim(), Some(param.trim())),
            None => (part.trim(), None),
        };
        if name.is_empty() {
            if let Some(param) = param.filter(|p| !p.is_empty()) {
                warn!("Stray parameter ':{}' without mapper name", param);
            }
            continue;
        }
        mappers.push((name.to_string(), param.map(str::to_string)));
    }
    mappers
}
