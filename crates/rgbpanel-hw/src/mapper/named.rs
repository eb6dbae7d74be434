//! Pixel mappers selectable by name in the pixel mapper configuration.

use super::PixelMapper;
use crate::{Error, Result};

/// Rotation by a multiple of 90 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotateMapper {
    angle: u32,
}

impl RotateMapper {
    fn with_parameter(param: Option<&str>) -> Result<Self> {
        let param = match param.map(str::trim) {
            None | Some("") => return Ok(Self { angle: 0 }),
            Some(p) => p,
        };
        let angle: i32 = param.parse().map_err(|_| Error::MapperParameter {
            mapper: "Rotate".to_string(),
            reason: format!("invalid rotate parameter '{}'", param),
        })?;
        if angle % 90 != 0 {
            return Err(Error::MapperParameter {
                mapper: "Rotate".to_string(),
                reason: "rotation needs to be a multiple of 90 degrees".to_string(),
            });
        }
        Ok(Self {
            angle: angle.rem_euclid(360) as u32,
        })
    }
}

impl PixelMapper for RotateMapper {
    fn name(&self) -> &str {
        "Rotate"
    }

    fn visible_size(&self, matrix_width: usize, matrix_height: usize) -> Result<(usize, usize)> {
        if self.angle % 180 == 0 {
            Ok((matrix_width, matrix_height))
        } else {
            Ok((matrix_height, matrix_width))
        }
    }

    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> (isize, isize) {
        let (w, h, x, y) = (
            matrix_width as isize,
            matrix_height as isize,
            x as isize,
            y as isize,
        );
        match self.angle {
            90 => (w - y - 1, x),
            180 => (w - x - 1, h - y - 1),
            270 => (y, h - x - 1),
            _ => (x, y),
        }
    }
}

/// Folds a long chain in half so that the second half of the panels
/// continues below the first, doubling the height:
///
/// ```text
///   [<][<][<][<] }- connector      [<][<] }- connector
///                           becomes [>][>]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UArrangementMapper {
    parallel: usize,
}

impl UArrangementMapper {
    fn new(chain: usize, parallel: usize) -> Result<Self> {
        if chain < 2 {
            return Err(Error::MapperParameter {
                mapper: "U-mapper".to_string(),
                reason: "need at least a chain of 4 for useful folding".to_string(),
            });
        }
        if chain % 2 != 0 {
            return Err(Error::MapperParameter {
                mapper: "U-mapper".to_string(),
                reason: "chain length needs to be divisible by two".to_string(),
            });
        }
        Ok(Self { parallel })
    }
}

impl PixelMapper for UArrangementMapper {
    fn name(&self) -> &str {
        "U-mapper"
    }

    fn visible_size(&self, matrix_width: usize, matrix_height: usize) -> Result<(usize, usize)> {
        if matrix_height % self.parallel != 0 {
            return Err(Error::MapperParameter {
                mapper: self.name().to_string(),
                reason: format!(
                    "height {} is not divisible by parallel {}",
                    matrix_height, self.parallel
                ),
            });
        }
        // Divide at a 32 pixel boundary.
        Ok(((matrix_width / 64) * 32, 2 * matrix_height))
    }

    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> (isize, isize) {
        let panel_height = (matrix_height / self.parallel) as isize;
        let visible_width = ((matrix_width / 64) * 32) as isize;
        let slab_height = 2 * panel_height;
        let (mut x, mut y) = (x as isize, y as isize);
        let base_y = (y / slab_height) * panel_height;
        y %= slab_height;
        if y < panel_height {
            x += matrix_width as isize / 2;
        } else {
            x = visible_width - x - 1;
            y = slab_height - y - 1;
        }
        (x, base_y + y)
    }
}

/// Stacks the panels of each chain vertically, reversing every other row
/// of panels:
///
/// ```text
///   [<][<] }- connector
///   [>][>]
///   [<][<]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SArrangementMapper {
    chain: usize,
    parallel: usize,
}

impl PixelMapper for SArrangementMapper {
    fn name(&self) -> &str {
        "S-mapper"
    }

    fn visible_size(&self, matrix_width: usize, matrix_height: usize) -> Result<(usize, usize)> {
        Ok((
            matrix_width / self.chain,
            (matrix_height / self.parallel) * self.chain,
        ))
    }

    fn map_visible_to_matrix(
        &self,
        matrix_width: usize,
        matrix_height: usize,
        x: usize,
        y: usize,
    ) -> (isize, isize) {
        let visible_width = (matrix_width / self.chain) as isize;
        let panel_height = (matrix_height / self.parallel) as isize;
        let (x, y) = (x as isize, y as isize);

        let base_y = y / panel_height;
        let mod_y = y % panel_height;
        let reversed = base_y % 2 == 1;

        let matrix_y = if reversed {
            panel_height - 1 - mod_y
        } else {
            mod_y
        };
        let matrix_x = base_y * visible_width
            + if reversed {
                visible_width - 1 - x
            } else {
                x
            };
        (matrix_x, matrix_y)
    }
}

/// Names of the registered pixel mappers.
pub fn available_pixel_mappers() -> &'static [&'static str] {
    &["Rotate", "U-mapper", "S-mapper"]
}

/// Looks up a pixel mapper by case-insensitive name and configures it.
pub fn find_pixel_mapper(
    name: &str,
    chain: usize,
    parallel: usize,
    param: Option<&str>,
) -> Result<Box<dyn PixelMapper>> {
    match name.to_lowercase().as_str() {
        "rotate" => Ok(Box::new(RotateMapper::with_parameter(param)?)),
        "u-mapper" => Ok(Box::new(UArrangementMapper::new(chain, parallel)?)),
        "s-mapper" => Ok(Box::new(SArrangementMapper {
            chain: chain.max(1),
            parallel: parallel.max(1),
        })),
        _ => Err(Error::UnknownMapper(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_parameters() {
        assert!(find_pixel_mapper("rotate", 1, 1, Some("90")).is_ok());
        assert!(find_pixel_mapper("ROTATE", 1, 1, None).is_ok());
        assert!(find_pixel_mapper("Rotate", 1, 1, Some("45")).is_err());
        assert!(find_pixel_mapper("Rotate", 1, 1, Some("ninety")).is_err());
        assert_eq!(
            RotateMapper::with_parameter(Some("-90")).unwrap().angle,
            270
        );
    }

    #[test]
    fn test_rotate_90() {
        let mapper = RotateMapper::with_parameter(Some("90")).unwrap();
        assert_eq!(mapper.visible_size(64, 32).unwrap(), (32, 64));
        // Visible origin lands in the top right corner of the matrix.
        assert_eq!(mapper.map_visible_to_matrix(64, 32, 0, 0), (63, 0));
        assert_eq!(mapper.map_visible_to_matrix(64, 32, 31, 63), (0, 31));
    }

    #[test]
    fn test_u_mapper_requires_even_chain() {
        assert!(find_pixel_mapper("U-mapper", 1, 1, None).is_err());
        assert!(find_pixel_mapper("U-mapper", 3, 1, None).is_err());
        assert!(find_pixel_mapper("u-mapper", 4, 1, None).is_ok());
    }

    #[test]
    fn test_s_mapper() {
        let mapper = find_pixel_mapper("S-mapper", 3, 1, None).unwrap();
        assert_eq!(mapper.visible_size(192, 32).unwrap(), (64, 96));
        assert_eq!(mapper.map_visible_to_matrix(192, 32, 0, 0), (0, 0));
        // Second panel row runs backwards and upside down.
        assert_eq!(mapper.map_visible_to_matrix(192, 32, 0, 32), (127, 31));
        assert_eq!(mapper.map_visible_to_matrix(192, 32, 5, 70), (133, 6));
    }

    #[test]
    fn test_available_mappers() {
        for name in available_pixel_mappers() {
            assert!(find_pixel_mapper(name, 4, 1, None).is_ok(), "{}", name);
        }
    }
}
