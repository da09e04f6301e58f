use crate::bounds::{BoundaryKind, Bounds};
use crate::error::{SimError, SimResult};
use crate::grid::{Grid, GridViewMut};
use crate::solver::{add_source, advect, diffuse, divergence, project};
use rand::Rng;
use std::mem::swap;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluidParams {
    /// Interior edge length; every grid is `(n + 2) x (n + 2)`.
    pub n: usize,
    pub viscosity: f32,
    pub diffusion: f32,
    pub dt: f32,
    /// Relaxation sweeps per linear solve.
    pub iterations: usize,
}

impl Default for FluidParams {
    fn default() -> Self {
        Self {
            n: 100,
            viscosity: 0.001,
            diffusion: 0.0,
            dt: 0.01,
            iterations: 20,
        }
    }
}

impl FluidParams {
    pub fn validate(&self) -> SimResult<()> {
        if self.n == 0 {
            return Err(invalid("n", "interior must hold at least one cell"));
        }
        for (name, value) in [
            ("dt", self.dt),
            ("viscosity", self.viscosity),
            ("diffusion", self.diffusion),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(name, format!("{value} is not a finite non-negative value")));
            }
        }
        Ok(())
    }

    pub fn grid_size(&self) -> usize {
        self.n + 2
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> SimError {
    SimError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

/// The six padded fields advanced each frame. `*_prev` grids double as
/// source input and as scratch space inside the steps.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationState {
    pub u: Grid,
    pub v: Grid,
    pub u_prev: Grid,
    pub v_prev: Grid,
    pub dens: Grid,
    pub dens_prev: Grid,
}

impl SimulationState {
    pub fn new(n: usize) -> Self {
        let size = n + 2;
        Self {
            u: Grid::new(size, size),
            v: Grid::new(size, size),
            u_prev: Grid::new(size, size),
            v_prev: Grid::new(size, size),
            dens: Grid::new(size, size),
            dens_prev: Grid::new(size, size),
        }
    }

    pub fn n(&self) -> usize {
        self.dens.width() - 2
    }

    pub fn clear_sources(&mut self) {
        self.u_prev.fill(0.0);
        self.v_prev.fill(0.0);
        self.dens_prev.fill(0.0);
    }
}

/// Advances the velocity field by one frame.
///
/// Forces are written straight into `u`/`v` beforehand; the swap below turns
/// that post-source field into the diffusion right-hand side. The order
/// diffuse, project, advect, project keeps the advected field divergence-free.
pub fn velocity_step(state: &mut SimulationState, bounds: &Bounds, params: &FluidParams) {
    let SimulationState {
        u, v, u_prev, v_prev, ..
    } = state;
    let dt = params.dt;
    let iterations = params.iterations;

    swap(u_prev, u);
    diffuse(BoundaryKind::Horizontal, u, u_prev, params.viscosity, dt, iterations, bounds);
    swap(v_prev, v);
    diffuse(BoundaryKind::Vertical, v, v_prev, params.viscosity, dt, iterations, bounds);
    project(u, v, u_prev, v_prev, iterations, bounds);

    swap(u_prev, u);
    swap(v_prev, v);
    advect(BoundaryKind::Horizontal, u, &*u_prev, &*u_prev, &*v_prev, dt, bounds);
    advect(BoundaryKind::Vertical, v, &*v_prev, &*u_prev, &*v_prev, dt, bounds);
    project(u, v, u_prev, v_prev, iterations, bounds);
}

/// Adds `dens_prev` as a source, diffuses, then advects along the current
/// velocity. Density is passive, so there is no projection.
pub fn density_step(state: &mut SimulationState, bounds: &Bounds, params: &FluidParams) {
    let SimulationState {
        u,
        v,
        dens,
        dens_prev,
        ..
    } = state;
    let dt = params.dt;

    add_source(dens, dens_prev, dt);
    swap(dens_prev, dens);
    diffuse(
        BoundaryKind::Scalar,
        dens,
        dens_prev,
        params.diffusion,
        dt,
        params.iterations,
        bounds,
    );
    swap(dens_prev, dens);
    advect(BoundaryKind::Scalar, dens, &*dens_prev, &*u, &*v, dt, bounds);
}

/// Overwrites row `y` with `mean` plus uniform noise of width `amplitude`.
pub fn inject_flow(grid: &mut Grid, y: usize, mean: f32, amplitude: f32, rng: &mut impl Rng) {
    for x in 0..grid.width() {
        grid.set(x, y, mean + amplitude * (rng.gen::<f32>() - 0.5));
    }
}

/// Fills the window with uniform noise in `[0, amplitude)`.
pub fn randomize(target: &mut GridViewMut<'_>, amplitude: f32, rng: &mut impl Rng) {
    target.fill_with(|| rng.gen::<f32>() * amplitude);
}

/// Owns the state, the obstacle bounds and the run parameters for a frame loop.
#[derive(Clone, Debug)]
pub struct Simulation {
    state: SimulationState,
    bounds: Bounds,
    params: FluidParams,
    frame: usize,
}

impl Simulation {
    pub fn new(params: FluidParams, bounds: Bounds) -> SimResult<Self> {
        params.validate()?;
        let size = params.grid_size();
        bounds.check_shape("bounds", (size, size))?;
        log::info!(
            "simulation {}x{} interior, visc={} diff={} dt={} iterations={}",
            params.n,
            params.n,
            params.viscosity,
            params.diffusion,
            params.dt,
            params.iterations
        );
        Ok(Self {
            state: SimulationState::new(params.n),
            bounds,
            params,
            frame: 0,
        })
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn params(&self) -> &FluidParams {
        &self.params
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Interactive source hook. There is no UI, so it only clears the
    /// source buffers.
    pub fn get_from_ui(&mut self) {
        self.state.clear_sources();
    }

    pub fn step(&mut self) {
        self.get_from_ui();
        velocity_step(&mut self.state, &self.bounds, &self.params);
        density_step(&mut self.state, &self.bounds, &self.params);
        self.frame += 1;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "frame {} density={:.4} divergence={:.4}",
                self.frame,
                self.state.dens.sum(),
                divergence(&self.state.u, &self.state.v)
            );
        }
    }
}
