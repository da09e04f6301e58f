use crate::error::{SimError, SimResult};
use rayon::prelude::*;
use std::sync::OnceLock;

const STRIDE_ALIGN: usize = 8;
const PAR_THRESHOLD_DEFAULT: usize = 262_144;
const PAR_MIN_WORK_PER_THREAD: usize = 4096;

fn parallel_threshold() -> usize {
    static THRESHOLD: OnceLock<usize> = OnceLock::new();
    *THRESHOLD.get_or_init(|| {
        std::env::var("SIM_PAR_THRESHOLD")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(PAR_THRESHOLD_DEFAULT)
    })
}

pub(crate) fn should_parallel(len: usize) -> bool {
    if len < parallel_threshold() {
        return false;
    }
    let threads = rayon::current_num_threads().max(1);
    len / threads >= PAR_MIN_WORK_PER_THREAD
}

fn aligned_stride(width: usize) -> usize {
    width.div_ceil(STRIDE_ALIGN) * STRIDE_ALIGN
}

/// Dense row-major `f32` grid. Rows are `stride` floats apart; the floats
/// past `width` in each row are padding and never part of the logical grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    width: usize,
    height: usize,
    stride: usize,
    data: Vec<f32>,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_stride(width, height, aligned_stride(width))
    }

    pub fn with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(width > 0, "width must be > 0");
        assert!(height > 0, "height must be > 0");
        assert!(stride >= width, "stride must be >= width");
        Self {
            width,
            height,
            stride,
            data: vec![0.0; stride * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut grid = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                grid.set(x, y, f(x, y));
            }
        }
        grid
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        debug_assert!(
            x < self.width && y < self.height,
            "cell ({x}, {y}) outside {}x{} grid",
            self.width,
            self.height
        );
        x + y * self.stride
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        let i = self.idx(x, y);
        self.data[i] = value;
    }

    /// Raw backing buffer, stride padding included.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn view(&self) -> GridView<'_> {
        GridView::new(&self.data, self.width, self.height, self.stride)
    }

    pub fn view_mut(&mut self) -> GridViewMut<'_> {
        GridViewMut::new(&mut self.data, self.width, self.height, self.stride)
    }

    /// Window that skips `px` columns and `py` rows on every side.
    pub fn pad(&self, px: usize, py: usize) -> GridView<'_> {
        self.view().pad(px, py)
    }

    pub fn pad_mut(&mut self, px: usize, py: usize) -> GridViewMut<'_> {
        let (offset, width, height) = pad_window(self.width, self.height, self.stride, px, py);
        GridViewMut::new(&mut self.data[offset..], width, height, self.stride)
    }

    pub fn fill(&mut self, value: f32) {
        self.view_mut().fill(value);
    }

    pub fn filter(&mut self, f: impl Fn(f32) -> f32 + Sync) {
        self.view_mut().filter(f);
    }

    pub fn copy_from(&mut self, other: &Self) {
        self.assert_same_shape(other);
        if self.stride == other.stride {
            self.data.copy_from_slice(&other.data);
            return;
        }
        let width = self.width;
        for y in 0..self.height {
            let dst = y * self.stride;
            let src = y * other.stride;
            self.data[dst..dst + width].copy_from_slice(&other.data[src..src + width]);
        }
    }

    pub fn sum(&self) -> f32 {
        self.view().sum()
    }

    pub fn abs_sum(&self) -> f32 {
        self.view().abs_sum()
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.view().min_max()
    }

    pub fn count_non_finite(&self) -> usize {
        self.view()
            .rows()
            .flatten()
            .filter(|value| !value.is_finite())
            .count()
    }

    pub(crate) fn assert_same_shape(&self, other: &Self) {
        assert_eq!(self.shape(), other.shape(), "grid shape mismatch");
    }
}

fn pad_window(
    width: usize,
    height: usize,
    stride: usize,
    px: usize,
    py: usize,
) -> (usize, usize, usize) {
    assert!(
        2 * px < width && 2 * py < height,
        "padding ({px}, {py}) leaves no cells in a {width}x{height} grid"
    );
    (px + py * stride, width - 2 * px, height - 2 * py)
}

/// Read-only window over a grid buffer.
#[derive(Clone, Copy, Debug)]
pub struct GridView<'a> {
    data: &'a [f32],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> GridView<'a> {
    fn new(data: &'a [f32], width: usize, height: usize, stride: usize) -> Self {
        debug_assert!((height - 1) * stride + width <= data.len());
        Self {
            data,
            width,
            height,
            stride,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        debug_assert!(x < self.width && y < self.height);
        self.data[x + y * self.stride]
    }

    pub fn row(&self, y: usize) -> &'a [f32] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    pub fn rows(self) -> impl Iterator<Item = &'a [f32]> {
        (0..self.height).map(move |y| self.row(y))
    }

    pub fn pad(&self, px: usize, py: usize) -> GridView<'a> {
        let (offset, width, height) = pad_window(self.width, self.height, self.stride, px, py);
        GridView::new(&self.data[offset..], width, height, self.stride)
    }

    pub fn sum(&self) -> f32 {
        self.rows().flatten().sum()
    }

    pub fn abs_sum(&self) -> f32 {
        self.rows().flatten().map(|value| value.abs()).sum()
    }

    pub fn min_max(&self) -> (f32, f32) {
        let mut iter = self.rows().flatten().filter(|value| value.is_finite());
        let Some(first) = iter.next() else {
            return (0.0, 0.0);
        };
        let mut min_value = *first;
        let mut max_value = *first;
        for value in iter {
            if *value < min_value {
                min_value = *value;
            }
            if *value > max_value {
                max_value = *value;
            }
        }
        (min_value, max_value)
    }
}

/// Mutable window over a grid buffer.
#[derive(Debug)]
pub struct GridViewMut<'a> {
    data: &'a mut [f32],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> GridViewMut<'a> {
    fn new(data: &'a mut [f32], width: usize, height: usize, stride: usize) -> Self {
        debug_assert!((height - 1) * stride + width <= data.len());
        Self {
            data,
            width,
            height,
            stride,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        debug_assert!(x < self.width && y < self.height);
        self.data[x + y * self.stride]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        debug_assert!(x < self.width && y < self.height);
        self.data[x + y * self.stride] = value;
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [f32] {
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    pub fn pad_mut(&mut self, px: usize, py: usize) -> GridViewMut<'_> {
        let (offset, width, height) = pad_window(self.width, self.height, self.stride, px, py);
        GridViewMut::new(&mut self.data[offset..], width, height, self.stride)
    }

    pub fn fill(&mut self, value: f32) {
        let width = self.width;
        if should_parallel(width * self.height) {
            self.data
                .par_chunks_mut(self.stride)
                .take(self.height)
                .for_each(|row| row[..width].fill(value));
        } else {
            for y in 0..self.height {
                self.row_mut(y).fill(value);
            }
        }
    }

    /// Applies `f` to every logical cell in place.
    pub fn filter(&mut self, f: impl Fn(f32) -> f32 + Sync) {
        let width = self.width;
        if should_parallel(width * self.height) {
            self.data
                .par_chunks_mut(self.stride)
                .take(self.height)
                .for_each(|row| {
                    for value in &mut row[..width] {
                        *value = f(*value);
                    }
                });
        } else {
            for y in 0..self.height {
                for value in self.row_mut(y) {
                    *value = f(*value);
                }
            }
        }
    }

    /// Row-major fill from a generator, so seeded sequences stay reproducible.
    pub fn fill_with(&mut self, mut f: impl FnMut() -> f32) {
        for y in 0..self.height {
            for value in self.row_mut(y) {
                *value = f();
            }
        }
    }
}

/// Convolves `source` with an odd-sized `kernel` into `target`. Cells closer
/// to the edge than half the kernel are left untouched.
pub fn convolve(
    source: GridView<'_>,
    kernel: GridView<'_>,
    target: &mut GridViewMut<'_>,
) -> SimResult<()> {
    if (source.width(), source.height()) != (target.width(), target.height()) {
        return Err(SimError::DimensionMismatch {
            what: "convolution target",
            expected: (source.width(), source.height()),
            actual: (target.width(), target.height()),
        });
    }
    if kernel.width() % 2 == 0 || kernel.height() % 2 == 0 {
        return Err(SimError::EvenKernel {
            width: kernel.width(),
            height: kernel.height(),
        });
    }
    let half_x = kernel.width() / 2;
    let half_y = kernel.height() / 2;
    for y in half_y..source.height().saturating_sub(half_y) {
        for x in half_x..source.width().saturating_sub(half_x) {
            let mut acc = 0.0;
            for ky in 0..kernel.height() {
                for kx in 0..kernel.width() {
                    acc += kernel.get(kx, ky) * source.get(x + kx - half_x, y + ky - half_y);
                }
            }
            target.set(x, y, acc);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "outside")]
    fn get_past_width_panics() {
        let grid = Grid::new(4, 3);
        grid.get(4, 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "outside")]
    fn set_past_height_panics() {
        let mut grid = Grid::new(4, 3);
        grid.set(0, 3, 1.0);
    }

    #[test]
    fn new_grid_is_zeroed_with_aligned_stride() {
        let grid = Grid::new(10, 3);
        assert_eq!(grid.stride(), 16);
        assert_eq!(grid.as_slice().len(), 48);
        assert_eq!(grid.abs_sum(), 0.0);
    }

    #[test]
    fn from_fn_maps_coords() {
        let grid = Grid::from_fn(3, 2, |x, y| (x + y * 10) as f32);
        assert_close(grid.get(2, 1), 12.0, 1e-6);
        assert_eq!(grid.as_slice()[2 + grid.stride()], 12.0);
    }

    #[test]
    fn fill_leaves_stride_padding_alone() {
        let mut grid = Grid::with_stride(3, 2, 5);
        grid.as_mut_slice().fill(7.0);
        grid.fill(1.0);
        let data = grid.as_slice();
        assert_eq!(&data[0..5], &[1.0, 1.0, 1.0, 7.0, 7.0]);
        assert_eq!(&data[5..10], &[1.0, 1.0, 1.0, 7.0, 7.0]);
    }

    #[test]
    fn filter_applies_to_every_logical_cell() {
        let mut grid = Grid::from_fn(4, 4, |x, y| (x + y) as f32);
        grid.filter(|value| if value > 2.0 { 1.0 } else { 0.0 });
        assert_eq!(grid.get(0, 0), 0.0);
        assert_eq!(grid.get(1, 1), 0.0);
        assert_eq!(grid.get(2, 1), 1.0);
        assert_eq!(grid.sum(), 10.0);
    }

    #[test]
    fn pad_views_interior_without_copy() {
        let grid = Grid::from_fn(6, 5, |x, y| (x + y * 10) as f32);
        let inner = grid.pad(1, 1);
        assert_eq!(inner.width(), 4);
        assert_eq!(inner.height(), 3);
        assert_eq!(inner.get(0, 0), 11.0);
        assert_eq!(inner.get(3, 2), 34.0);
        assert_eq!(inner.row(1), &[21.0, 22.0, 23.0, 24.0]);
        let nested = inner.pad(1, 1);
        assert_eq!(nested.get(0, 0), 22.0);
    }

    #[test]
    fn pad_mut_writes_through_to_owner() {
        let mut grid = Grid::new(5, 5);
        grid.pad_mut(1, 1).fill(2.0);
        assert_eq!(grid.get(0, 0), 0.0);
        assert_eq!(grid.get(1, 1), 2.0);
        assert_eq!(grid.get(3, 3), 2.0);
        assert_eq!(grid.get(4, 3), 0.0);
        assert_eq!(grid.sum(), 18.0);
    }

    #[test]
    #[should_panic(expected = "leaves no cells")]
    fn pad_rejects_empty_window() {
        let grid = Grid::new(4, 4);
        let _ = grid.pad(2, 0);
    }

    #[test]
    fn copy_from_handles_different_strides() {
        let source = Grid::from_fn(3, 3, |x, y| (x * 3 + y) as f32);
        let mut target = Grid::with_stride(3, 3, 3);
        target.copy_from(&source);
        for y in 0..3 {
            for x in 0..3 {
                assert_eq!(target.get(x, y), source.get(x, y));
            }
        }
    }

    #[test]
    fn min_max_skips_non_finite() {
        let mut grid = Grid::from_fn(2, 2, |x, y| (x + y * 2) as f32 - 1.0);
        grid.set(0, 1, f32::NAN);
        let (min_value, max_value) = grid.min_max();
        assert_close(min_value, -1.0, 1e-6);
        assert_close(max_value, 2.0, 1e-6);
        assert_eq!(grid.count_non_finite(), 1);
    }

    #[test]
    fn convolve_with_identity_kernel_copies_interior() {
        let source = Grid::from_fn(5, 5, |x, y| (x * y) as f32);
        let kernel = Grid::from_fn(3, 3, |x, y| if x == 1 && y == 1 { 1.0 } else { 0.0 });
        let mut target = Grid::new(5, 5);
        convolve(source.view(), kernel.view(), &mut target.view_mut()).unwrap();
        assert_eq!(target.get(2, 3), 6.0);
        assert_eq!(target.get(3, 3), 9.0);
        assert_eq!(target.get(4, 4), 0.0);
    }

    #[test]
    fn convolve_box_kernel_sums_neighbourhood() {
        let source = Grid::from_fn(4, 3, |_, _| 1.0);
        let kernel = Grid::from_fn(3, 3, |_, _| 1.0);
        let mut target = Grid::new(4, 3);
        convolve(source.view(), kernel.view(), &mut target.view_mut()).unwrap();
        assert_eq!(target.get(1, 1), 9.0);
        assert_eq!(target.get(2, 1), 9.0);
        assert_eq!(target.get(0, 1), 0.0);
    }

    #[test]
    fn convolve_rejects_even_kernel() {
        let source = Grid::new(4, 4);
        let kernel = Grid::new(2, 3);
        let mut target = Grid::new(4, 4);
        let err = convolve(source.view(), kernel.view(), &mut target.view_mut()).unwrap_err();
        assert!(matches!(err, SimError::EvenKernel { width: 2, height: 3 }));
    }

    #[test]
    fn convolve_rejects_mismatched_target() {
        let source = Grid::new(4, 4);
        let kernel = Grid::new(3, 3);
        let mut target = Grid::new(5, 4);
        let err = convolve(source.view(), kernel.view(), &mut target.view_mut()).unwrap_err();
        assert!(matches!(err, SimError::DimensionMismatch { .. }));
    }
}
