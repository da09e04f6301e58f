use crate::bounds::ALPHA_THRESHOLD;
use crate::error::{SimError, SimResult};
use crate::image::Color;
use crate::sim::FluidParams;
use std::path::PathBuf;
use std::str::FromStr;

/// Mean and noise width of the velocity injected along the inflow row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Inflow {
    pub mean: f32,
    pub amplitude: f32,
}

/// Everything the demo driver needs for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub fluid: FluidParams,
    pub frames: usize,
    pub screen: (usize, usize),
    /// Raw BGRA obstacle of `n x n` pixels; `None` runs an empty box.
    pub obstacle: Option<PathBuf>,
    pub alpha_cutoff: f32,
    pub overlay_obstacle: bool,
    pub seed: u64,
    pub initial_density: f32,
    pub inflow_row: usize,
    pub inflow_u: Inflow,
    pub inflow_v: Inflow,
    pub background: Color,
}

impl Default for RunConfig {
    fn default() -> Self {
        let fluid = FluidParams::default();
        Self {
            fluid,
            frames: 100,
            screen: (506, 253),
            obstacle: Some(PathBuf::from("heart.bgra")),
            alpha_cutoff: ALPHA_THRESHOLD,
            overlay_obstacle: false,
            seed: 1337,
            initial_density: 1.0,
            inflow_row: fluid.n.saturating_sub(10),
            inflow_u: Inflow {
                mean: 0.0,
                amplitude: 45.0,
            },
            inflow_v: Inflow {
                mean: -5.0,
                amplitude: 5.0,
            },
            background: 0xff22_2222,
        }
    }
}

impl RunConfig {
    /// Defaults overridden by `SIM_*` environment variables.
    pub fn from_env() -> SimResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SimResult<Self> {
        let mut config = Self::default();
        let get = |key: &'static str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(n) = parse(get("SIM_N"), "SIM_N")? {
            config.fluid.n = n;
            config.inflow_row = usize::saturating_sub(n, 10);
        }
        set(&mut config.fluid.viscosity, get("SIM_VISCOSITY"), "SIM_VISCOSITY")?;
        set(&mut config.fluid.diffusion, get("SIM_DIFFUSION"), "SIM_DIFFUSION")?;
        set(&mut config.fluid.dt, get("SIM_DT"), "SIM_DT")?;
        set(&mut config.fluid.iterations, get("SIM_ITERATIONS"), "SIM_ITERATIONS")?;
        set(&mut config.frames, get("SIM_FRAMES"), "SIM_FRAMES")?;
        set(&mut config.seed, get("SIM_SEED"), "SIM_SEED")?;
        set(&mut config.alpha_cutoff, get("SIM_ALPHA_CUTOFF"), "SIM_ALPHA_CUTOFF")?;
        set(&mut config.inflow_row, get("SIM_INFLOW_ROW"), "SIM_INFLOW_ROW")?;
        set(&mut config.screen.0, get("SIM_SCREEN_WIDTH"), "SIM_SCREEN_WIDTH")?;
        set(&mut config.screen.1, get("SIM_SCREEN_HEIGHT"), "SIM_SCREEN_HEIGHT")?;
        if let Some(flag) = get("SIM_OVERLAY") {
            config.overlay_obstacle = flag != "0";
        }
        if let Some(path) = lookup("SIM_OBSTACLE") {
            config.obstacle = (!path.trim().is_empty()).then(|| PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        self.fluid.validate()?;
        if self.inflow_row >= self.fluid.grid_size() {
            return Err(SimError::InvalidParameter {
                name: "inflow_row",
                reason: format!(
                    "row {} outside a {} row grid",
                    self.inflow_row,
                    self.fluid.grid_size()
                ),
            });
        }
        if self.screen.0 == 0 || self.screen.1 == 0 {
            return Err(SimError::InvalidParameter {
                name: "screen",
                reason: format!("{}x{} has no pixels", self.screen.0, self.screen.1),
            });
        }
        Ok(())
    }
}

fn parse<T: FromStr>(value: Option<String>, key: &'static str) -> SimResult<Option<T>> {
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| SimError::InvalidParameter {
                name: key,
                reason: format!("cannot parse '{raw}'"),
            })
        })
        .transpose()
}

fn set<T: FromStr>(slot: &mut T, value: Option<String>, key: &'static str) -> SimResult<()> {
    if let Some(parsed) = parse(value, key)? {
        *slot = parsed;
    }
    Ok(())
}
