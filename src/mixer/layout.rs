//! Grid layout
//!
//! Splits the output canvas into equally sized cells, filled row by row in
//! slot order. With `columns == 0` the grid is as square as possible
//! (`ceil(sqrt(n))` columns).

/// Rectangle on the output canvas, in luma pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

/// Layout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayoutConfig {
    /// Fixed number of grid columns (0 = automatic)
    pub columns: u32,
}

impl LayoutConfig {
    /// Use a fixed column count
    pub fn columns(mut self, columns: u32) -> Self {
        self.columns = columns;
        self
    }

    /// Columns and rows for `count` cells
    pub fn grid(&self, count: usize) -> (u32, u32) {
        if count == 0 {
            return (0, 0);
        }
        let count = count as u32;
        let cols = if self.columns > 0 {
            self.columns.min(count)
        } else {
            let mut cols = 1;
            while cols * cols < count {
                cols += 1;
            }
            cols
        };
        let rows = count.div_ceil(cols);
        (cols, rows)
    }
}

/// Regions for `count` cells on a `width` x `height` canvas.
///
/// Cell origins and sizes are rounded down to even values so chroma planes
/// stay aligned.
pub fn grid_regions(layout: &LayoutConfig, count: usize, width: u32, height: u32) -> Vec<Region> {
    let (cols, rows) = layout.grid(count);
    if cols == 0 {
        return Vec::new();
    }

    let cell_w = (width / cols) & !1;
    let cell_h = (height / rows) & !1;

    (0..count as u32)
        .map(|i| Region {
            x: (i % cols) * cell_w,
            y: (i / cols) * cell_h,
            width: cell_w,
            height: cell_h,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shape() {
        let layout = LayoutConfig::default();
        assert_eq!(layout.grid(0), (0, 0));
        assert_eq!(layout.grid(1), (1, 1));
        assert_eq!(layout.grid(2), (2, 1));
        assert_eq!(layout.grid(3), (2, 2));
        assert_eq!(layout.grid(5), (3, 2));
        assert_eq!(layout.grid(9), (3, 3));
    }

    #[test]
    fn test_fixed_columns() {
        let layout = LayoutConfig::default().columns(4);
        assert_eq!(layout.grid(2), (2, 1));
        assert_eq!(layout.grid(6), (4, 2));
    }

    #[test]
    fn test_regions_tile_canvas() {
        let regions = grid_regions(&LayoutConfig::default(), 3, 640, 480);
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0], Region { x: 0, y: 0, width: 320, height: 240 });
        assert_eq!(regions[1], Region { x: 320, y: 0, width: 320, height: 240 });
        assert_eq!(regions[2], Region { x: 0, y: 240, width: 320, height: 240 });
    }

    #[test]
    fn test_regions_even_aligned() {
        for region in grid_regions(&LayoutConfig::default(), 3, 100, 70) {
            assert_eq!(region.x % 2, 0);
            assert_eq!(region.y % 2, 0);
            assert_eq!(region.width % 2, 0);
            assert_eq!(region.height % 2, 0);
        }
    }
}
