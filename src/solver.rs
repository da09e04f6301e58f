use crate::bounds::{set_bnd, BoundaryKind, Bounds};
use crate::grid::{should_parallel, Grid};
use rayon::prelude::*;

/// Interior edge length `N` of a padded `(N+2)x(N+2)` grid.
fn interior_size(grid: &Grid) -> usize {
    assert_eq!(grid.width(), grid.height(), "solver grids must be square");
    assert!(grid.width() > 2, "grid has no interior");
    grid.width() - 2
}

/// `x += dt * s` over every logical cell.
pub fn add_source(x: &mut Grid, s: &Grid, dt: f32) {
    x.assert_same_shape(s);
    for y in 0..x.height() {
        for i in 0..x.width() {
            let value = x.get(i, y) + dt * s.get(i, y);
            x.set(i, y, value);
        }
    }
}

/// Gauss-Seidel relaxation of `c*x - a*(sum of 4 neighbours) = x0`.
///
/// Each of the `iterations` sweeps updates the interior in row-major order,
/// reading neighbours already updated in the same sweep, then re-applies the
/// boundary conditions before the next sweep. Values are never clamped.
pub fn lin_solve(
    kind: BoundaryKind,
    x: &mut Grid,
    x0: &Grid,
    a: f32,
    c: f32,
    iterations: usize,
    bounds: &Bounds,
) {
    x.assert_same_shape(x0);
    let n = interior_size(x);
    let stride = x.stride();
    let stride0 = x0.stride();
    for _ in 0..iterations {
        {
            let cells = x.as_mut_slice();
            let rhs = x0.as_slice();
            for j in 1..=n {
                let row = j * stride;
                let row0 = j * stride0;
                for i in 1..=n {
                    let idx = row + i;
                    let neighbours =
                        cells[idx - 1] + cells[idx + 1] + cells[idx - stride] + cells[idx + stride];
                    cells[idx] = (rhs[row0 + i] + a * neighbours) / c;
                }
            }
        }
        set_bnd(kind, x, bounds);
    }
}

/// Implicit diffusion of `x0` into `x`. A zero coefficient copies `x0`
/// through unchanged.
pub fn diffuse(
    kind: BoundaryKind,
    x: &mut Grid,
    x0: &Grid,
    diffusion: f32,
    dt: f32,
    iterations: usize,
    bounds: &Bounds,
) {
    let n = interior_size(x) as f32;
    if diffusion == 0.0 || dt == 0.0 {
        x.copy_from(x0);
        set_bnd(kind, x, bounds);
        return;
    }
    let a = dt * diffusion * n * n;
    lin_solve(kind, x, x0, a, 1.0 + 4.0 * a, iterations, bounds);
}

/// Removes the divergent part of `(u, v)`, using `p` and `div` as scratch.
pub fn project(
    u: &mut Grid,
    v: &mut Grid,
    p: &mut Grid,
    div: &mut Grid,
    iterations: usize,
    bounds: &Bounds,
) {
    u.assert_same_shape(v);
    u.assert_same_shape(p);
    u.assert_same_shape(div);
    let n = interior_size(u);
    let h = 1.0 / n as f32;
    for j in 1..=n {
        for i in 1..=n {
            let flux = u.get(i + 1, j) - u.get(i - 1, j) + v.get(i, j + 1) - v.get(i, j - 1);
            div.set(i, j, -0.5 * h * flux);
            p.set(i, j, 0.0);
        }
    }
    set_bnd(BoundaryKind::Scalar, div, bounds);
    set_bnd(BoundaryKind::Scalar, p, bounds);

    lin_solve(BoundaryKind::Scalar, p, div, 1.0, 4.0, iterations, bounds);

    for j in 1..=n {
        for i in 1..=n {
            let du = 0.5 * (p.get(i + 1, j) - p.get(i - 1, j)) / h;
            let dv = 0.5 * (p.get(i, j + 1) - p.get(i, j - 1)) / h;
            u.set(i, j, u.get(i, j) - du);
            v.set(i, j, v.get(i, j) - dv);
        }
    }
    set_bnd(BoundaryKind::Horizontal, u, bounds);
    set_bnd(BoundaryKind::Vertical, v, bounds);
}

/// Sum of absolute central-difference divergence over the interior.
pub fn divergence(u: &Grid, v: &Grid) -> f32 {
    u.assert_same_shape(v);
    let n = interior_size(u);
    let scale = 0.5 * n as f32;
    let mut total = 0.0;
    for j in 1..=n {
        for i in 1..=n {
            let flux = u.get(i + 1, j) - u.get(i - 1, j) + v.get(i, j + 1) - v.get(i, j - 1);
            total += (scale * flux).abs();
        }
    }
    total
}

/// Semi-Lagrangian transport of `d0` along `(u, v)` into `d`.
///
/// Each interior cell traces back by `dt * N * velocity`, clamps the trace to
/// `[0.5, N + 0.5]` and bilinearly samples `d0` there.
pub fn advect(
    kind: BoundaryKind,
    d: &mut Grid,
    d0: &Grid,
    u: &Grid,
    v: &Grid,
    dt: f32,
    bounds: &Bounds,
) {
    d.assert_same_shape(d0);
    d.assert_same_shape(u);
    d.assert_same_shape(v);
    let n = interior_size(d);
    let stride = d.stride();
    let tracer = Tracer {
        n,
        dt0: dt * n as f32,
        d0,
        u,
        v,
    };
    if should_parallel(n * n) {
        d.as_mut_slice()
            .par_chunks_mut(stride)
            .enumerate()
            .skip(1)
            .take(n)
            .for_each(|(j, row)| tracer.advect_row(j, row));
    } else {
        for (j, row) in d.as_mut_slice().chunks_mut(stride).enumerate().skip(1).take(n) {
            tracer.advect_row(j, row);
        }
    }
    set_bnd(kind, d, bounds);
}

struct Tracer<'a> {
    n: usize,
    dt0: f32,
    d0: &'a Grid,
    u: &'a Grid,
    v: &'a Grid,
}

impl Tracer<'_> {
    fn advect_row(&self, j: usize, row: &mut [f32]) {
        let max = self.n as f32 + 0.5;
        for (i, out) in row.iter_mut().enumerate().skip(1).take(self.n) {
            let x = (i as f32 - self.dt0 * self.u.get(i, j)).clamp(0.5, max);
            let y = (j as f32 - self.dt0 * self.v.get(i, j)).clamp(0.5, max);
            let i0 = x.floor() as usize;
            let j0 = y.floor() as usize;
            let s1 = x - i0 as f32;
            let s0 = 1.0 - s1;
            let t1 = y - j0 as f32;
            let t0 = 1.0 - t1;
            *out = s0 * (t0 * self.d0.get(i0, j0) + t1 * self.d0.get(i0, j0 + 1))
                + s1 * (t0 * self.d0.get(i0 + 1, j0) + t1 * self.d0.get(i0 + 1, j0 + 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::box_bounds;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn boxed(n: usize) -> Bounds {
        let mut bounds = Bounds::for_interior(n);
        box_bounds(&mut bounds);
        bounds
    }

    fn random_grid(size: usize, rng: &mut StdRng) -> Grid {
        let mut grid = Grid::new(size, size);
        grid.view_mut().fill_with(|| rng.gen_range(-1.0..1.0));
        grid
    }

    #[test]
    fn add_source_scales_by_dt() {
        let mut x = Grid::from_fn(4, 4, |_, _| 1.0);
        let s = Grid::from_fn(4, 4, |i, _| i as f32);
        add_source(&mut x, &s, 0.5);
        assert_eq!(x.get(0, 2), 1.0);
        assert_eq!(x.get(3, 1), 2.5);
    }

    #[test]
    fn lin_solve_with_zero_coupling_reproduces_rhs() {
        let bounds = boxed(6);
        let mut rng = StdRng::seed_from_u64(5);
        let x0 = random_grid(8, &mut rng);
        let mut x = Grid::new(8, 8);
        lin_solve(BoundaryKind::Scalar, &mut x, &x0, 0.0, 1.0, 3, &bounds);
        for j in 1..=6 {
            for i in 1..=6 {
                assert_eq!(x.get(i, j).to_bits(), x0.get(i, j).to_bits());
            }
        }
    }

    #[test]
    fn lin_solve_zero_iterations_leaves_output() {
        let bounds = boxed(3);
        let x0 = Grid::from_fn(5, 5, |_, _| 1.0);
        let mut x = Grid::new(5, 5);
        lin_solve(BoundaryKind::Scalar, &mut x, &x0, 1.0, 4.0, 0, &bounds);
        assert_eq!(x.abs_sum(), 0.0);
    }

    #[test]
    fn lin_solve_propagates_nan_in_sweep_order() {
        let bounds = boxed(4);
        let mut x0 = Grid::new(6, 6);
        x0.set(2, 2, f32::NAN);
        let mut x = Grid::new(6, 6);
        lin_solve(BoundaryKind::Scalar, &mut x, &x0, 1.0, 4.0, 1, &bounds);
        assert!(x.get(2, 2).is_nan());
        assert!(x.get(3, 2).is_nan());
        assert!(x.get(2, 3).is_nan());
        assert!(x.get(1, 1).is_finite());
        assert!(x.get(1, 2).is_finite());

        let mut again = Grid::new(6, 6);
        lin_solve(BoundaryKind::Scalar, &mut again, &x0, 1.0, 4.0, 1, &bounds);
        for j in 0..6 {
            for i in 0..6 {
                assert_eq!(x.get(i, j).is_nan(), again.get(i, j).is_nan());
            }
        }
    }

    #[test]
    fn lin_solve_carries_infinity_to_later_neighbours() {
        let bounds = boxed(4);
        let mut x0 = Grid::new(6, 6);
        x0.set(2, 2, f32::INFINITY);
        let solve = || {
            let mut x = Grid::new(6, 6);
            lin_solve(BoundaryKind::Scalar, &mut x, &x0, 1.0, 4.0, 1, &bounds);
            x
        };
        let x = solve();
        assert_eq!(x.get(2, 2), f32::INFINITY);
        assert_eq!(x.get(3, 2), f32::INFINITY);
        assert_eq!(x.get(2, 3), f32::INFINITY);
        assert!(x.get(1, 2).is_finite());
        assert!(x.count_non_finite() > 3);

        let again = solve();
        assert_eq!(x.count_non_finite(), again.count_non_finite());
        for j in 0..6 {
            for i in 0..6 {
                assert_eq!(x.get(i, j).is_finite(), again.get(i, j).is_finite());
            }
        }
    }

    #[test]
    fn diffuse_with_zero_coefficient_is_identity() {
        let bounds = boxed(6);
        let mut rng = StdRng::seed_from_u64(9);
        let x0 = random_grid(8, &mut rng);
        let mut x = Grid::new(8, 8);
        diffuse(BoundaryKind::Scalar, &mut x, &x0, 0.0, 0.1, 20, &bounds);
        for j in 1..=6 {
            for i in 1..=6 {
                assert_eq!(x.get(i, j).to_bits(), x0.get(i, j).to_bits());
            }
        }
    }

    #[test]
    fn diffuse_spreads_impulse_and_keeps_it_positive() {
        let bounds = boxed(8);
        let mut x0 = Grid::new(10, 10);
        x0.set(5, 5, 1.0);
        let mut x = Grid::new(10, 10);
        diffuse(BoundaryKind::Scalar, &mut x, &x0, 0.01, 0.1, 20, &bounds);
        assert!(x.get(5, 5) < 1.0);
        assert!(x.get(4, 5) > 0.0);
        assert!(x.get(5, 6) > 0.0);
        let (min_value, _) = x.min_max();
        assert!(min_value >= 0.0);
    }

    #[test]
    fn project_reduces_divergence_of_random_field() {
        let n = 16;
        let bounds = boxed(n);
        let mut rng = StdRng::seed_from_u64(1337);
        let mut u = random_grid(n + 2, &mut rng);
        let mut v = random_grid(n + 2, &mut rng);
        set_bnd(BoundaryKind::Horizontal, &mut u, &bounds);
        set_bnd(BoundaryKind::Vertical, &mut v, &bounds);
        let before = divergence(&u, &v);
        let mut p = Grid::new(n + 2, n + 2);
        let mut div = Grid::new(n + 2, n + 2);
        project(&mut u, &mut v, &mut p, &mut div, 20, &bounds);
        let after = divergence(&u, &v);
        assert!(before > 0.0);
        assert!(after < before, "divergence {after} not below {before}");
    }

    #[test]
    fn project_leaves_zero_field_alone() {
        let bounds = boxed(4);
        let mut u = Grid::new(6, 6);
        let mut v = Grid::new(6, 6);
        let mut p = Grid::new(6, 6);
        let mut div = Grid::new(6, 6);
        project(&mut u, &mut v, &mut p, &mut div, 20, &bounds);
        assert_eq!(u.abs_sum() + v.abs_sum(), 0.0);
    }

    #[test]
    fn advect_with_zero_velocity_keeps_interior() {
        let n = 6;
        let bounds = boxed(n);
        let mut rng = StdRng::seed_from_u64(2);
        let d0 = random_grid(n + 2, &mut rng);
        let zero = Grid::new(n + 2, n + 2);
        let mut d = Grid::new(n + 2, n + 2);
        advect(BoundaryKind::Scalar, &mut d, &d0, &zero, &zero, 0.1, &bounds);
        for j in 1..=n {
            for i in 1..=n {
                assert_eq!(d.get(i, j), d0.get(i, j));
            }
        }
    }

    #[test]
    fn advect_shifts_along_uniform_flow() {
        let n = 8;
        let bounds = boxed(n);
        let d0 = Grid::from_fn(n + 2, n + 2, |i, _| i as f32);
        let u = Grid::from_fn(n + 2, n + 2, |_, _| 1.0);
        let v = Grid::new(n + 2, n + 2);
        let mut d = Grid::new(n + 2, n + 2);
        // one cell per step: dt * N * u == 1
        advect(BoundaryKind::Scalar, &mut d, &d0, &u, &v, 1.0 / n as f32, &bounds);
        assert_eq!(d.get(4, 4), 3.0);
        assert_eq!(d.get(1, 4), 0.5);
    }

    #[test]
    fn advect_clamps_runaway_traces() {
        let n = 4;
        let bounds = boxed(n);
        let d0 = Grid::from_fn(n + 2, n + 2, |i, j| (i + j) as f32);
        let u = Grid::from_fn(n + 2, n + 2, |_, _| -1e6);
        let v = Grid::from_fn(n + 2, n + 2, |_, _| f32::INFINITY);
        let mut d = Grid::new(n + 2, n + 2);
        advect(BoundaryKind::Scalar, &mut d, &d0, &u, &v, 0.1, &bounds);
        assert_eq!(d.count_non_finite(), 0);
        // x clamps to N + 0.5, y to 0.5
        assert_eq!(d.get(2, 2), 0.5 * (4.0 + 5.0) * 0.5 + 0.5 * (5.0 + 6.0) * 0.5);
    }

    #[test]
    fn advect_propagates_nan_velocity() {
        let n = 4;
        let bounds = boxed(n);
        let d0 = Grid::from_fn(n + 2, n + 2, |_, _| 1.0);
        let mut u = Grid::new(n + 2, n + 2);
        u.set(2, 3, f32::NAN);
        let v = Grid::new(n + 2, n + 2);
        let mut d = Grid::new(n + 2, n + 2);
        advect(BoundaryKind::Scalar, &mut d, &d0, &u, &v, 0.1, &bounds);
        assert!(d.get(2, 3).is_nan());
        assert_eq!(d.get(3, 3), 1.0);
    }
}
