mod bounds;
mod config;
mod error;
mod grid;
mod image;
mod sim;
mod sink;
mod solver;

pub use bounds::{
    alpha_to_grid, bounds_from_image, box_bounds, set_bnd, threshold, BoundaryKind, Bounds,
    ALPHA_THRESHOLD,
};
pub use config::{Inflow, RunConfig};
pub use error::{SimError, SimResult};
pub use grid::{convolve, Grid, GridView, GridViewMut};
pub use image::{
    alpha, blend_color, blit, center, draw_density, load_bgra, rgb, scale, Color, Image,
    OPAQUE_BLACK,
};
pub use sim::{
    density_step, inject_flow, randomize, velocity_step, FluidParams, Simulation,
    SimulationState,
};
pub use sink::{FrameSink, RawFrameWriter};
pub use solver::{add_source, advect, diffuse, divergence, lin_solve, project};
