use crate::error::{SimError, SimResult};
use crate::grid::{Grid, GridViewMut};
use crate::image::{alpha, Image};

/// Alpha above this marks a solid obstacle pixel.
pub const ALPHA_THRESHOLD: f32 = 128.0;

/// Which boundary rule a field obeys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryKind {
    Scalar,
    Horizontal,
    Vertical,
}

/// Per-cell boundary direction vectors. A zero vector marks a free cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    bx: Grid,
    by: Grid,
}

impl Bounds {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            bx: Grid::new(width, height),
            by: Grid::new(width, height),
        }
    }

    /// Empty bounds for an `n`x`n` interior plus its ghost ring.
    pub fn for_interior(n: usize) -> Self {
        Self::new(n + 2, n + 2)
    }

    pub fn width(&self) -> usize {
        self.bx.width()
    }

    pub fn height(&self) -> usize {
        self.bx.height()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.bx.shape()
    }

    #[inline]
    pub fn direction(&self, x: usize, y: usize) -> (f32, f32) {
        (self.bx.get(x, y), self.by.get(x, y))
    }

    pub fn set_direction(&mut self, x: usize, y: usize, direction: (f32, f32)) {
        self.bx.set(x, y, direction.0);
        self.by.set(x, y, direction.1);
    }

    /// Number of interior cells carrying an obstacle direction.
    pub fn obstacle_cells(&self) -> usize {
        let mut count = 0;
        for y in 1..self.height().saturating_sub(1) {
            for x in 1..self.width().saturating_sub(1) {
                if self.direction(x, y) != (0.0, 0.0) {
                    count += 1;
                }
            }
        }
        count
    }

    pub(crate) fn check_shape(&self, what: &'static str, shape: (usize, usize)) -> SimResult<()> {
        if self.shape() != shape {
            return Err(SimError::DimensionMismatch {
                what,
                expected: shape,
                actual: self.shape(),
            });
        }
        Ok(())
    }
}

/// Points every border cell of the grid inward. Corners stay zero.
pub fn box_bounds(bounds: &mut Bounds) {
    let w = bounds.width();
    let h = bounds.height();
    for j in 1..h - 1 {
        bounds.set_direction(0, j, (1.0, 0.0));
        bounds.set_direction(w - 1, j, (-1.0, 0.0));
    }
    for i in 1..w - 1 {
        bounds.set_direction(i, 0, (0.0, 1.0));
        bounds.set_direction(i, h - 1, (0.0, -1.0));
    }
}

pub fn threshold(value: f32, cutoff: f32) -> f32 {
    if value > cutoff {
        1.0
    } else {
        0.0
    }
}

/// Copies the alpha channel of `image` into `target`, one cell per pixel.
pub fn alpha_to_grid(image: &Image, target: &mut GridViewMut<'_>) {
    debug_assert_eq!((target.width(), target.height()), image.shape());
    for y in 0..image.height() {
        for x in 0..image.width() {
            target.set(x, y, alpha(image.pixel(x, y)) as f32);
        }
    }
}

/// Derives obstacle edge directions from the alpha silhouette of `image`.
///
/// The image covers the interior of the padded grid. Alpha is thresholded to
/// a {0, 1} mask and each cell stores the forward differences of that mask,
/// so non-zero vectors only appear along silhouette edges.
pub fn bounds_from_image(bounds: &mut Bounds, image: &Image, cutoff: f32) -> SimResult<()> {
    let interior = (
        bounds.width().saturating_sub(2),
        bounds.height().saturating_sub(2),
    );
    if image.shape() != interior {
        return Err(SimError::DimensionMismatch {
            what: "obstacle image",
            expected: interior,
            actual: image.shape(),
        });
    }
    let mut mask = Grid::new(bounds.width(), bounds.height());
    // pixel (x, y) lands on interior cell (x + 1, y + 1), never on the ghost ring
    alpha_to_grid(image, &mut mask.pad_mut(1, 1));
    mask.filter(|value| threshold(value, cutoff));

    for j in 0..mask.height() - 1 {
        for i in 0..mask.width() - 1 {
            let dx = mask.get(i + 1, j) - mask.get(i, j);
            let dy = mask.get(i, j + 1) - mask.get(i, j);
            bounds.set_direction(i, j, (dx, dy));
        }
    }
    log::debug!(
        "obstacle mask: {} solid cells, {} edge cells",
        mask.sum(),
        bounds.obstacle_cells()
    );
    Ok(())
}

/// Re-derives ghost and obstacle cells of `grid` from their neighbours.
///
/// The outer ring copies the adjacent interior value, negated for the velocity
/// component normal to that wall. At interior cells with a non-zero direction
/// the direction points toward the solid side, so a velocity component along
/// a non-zero axis of it is zeroed when it points into the obstacle. Scalars
/// are left as they are there. Corners average their two edge neighbours.
pub fn set_bnd(kind: BoundaryKind, grid: &mut Grid, bounds: &Bounds) {
    assert_eq!(grid.shape(), bounds.shape(), "bounds shape mismatch");
    let w = grid.width();
    let h = grid.height();
    assert!(w >= 3 && h >= 3, "grid has no interior");
    let negate_x = if kind == BoundaryKind::Horizontal { -1.0 } else { 1.0 };
    let negate_y = if kind == BoundaryKind::Vertical { -1.0 } else { 1.0 };

    for j in 1..h - 1 {
        grid.set(0, j, negate_x * grid.get(1, j));
        grid.set(w - 1, j, negate_x * grid.get(w - 2, j));
    }
    for i in 1..w - 1 {
        grid.set(i, 0, negate_y * grid.get(i, 1));
        grid.set(i, h - 1, negate_y * grid.get(i, h - 2));
    }

    let normal_axis = |direction: (f32, f32)| match kind {
        BoundaryKind::Scalar => 0.0,
        BoundaryKind::Horizontal => direction.0,
        BoundaryKind::Vertical => direction.1,
    };
    for j in 1..h - 1 {
        for i in 1..w - 1 {
            let n = normal_axis(bounds.direction(i, j));
            if n != 0.0 && grid.get(i, j) * n > 0.0 {
                grid.set(i, j, 0.0);
            }
        }
    }

    grid.set(0, 0, 0.5 * (grid.get(1, 0) + grid.get(0, 1)));
    grid.set(0, h - 1, 0.5 * (grid.get(1, h - 1) + grid.get(0, h - 2)));
    grid.set(w - 1, 0, 0.5 * (grid.get(w - 2, 0) + grid.get(w - 1, 1)));
    grid.set(
        w - 1,
        h - 1,
        0.5 * (grid.get(w - 2, h - 1) + grid.get(w - 1, h - 2)),
    );
}
