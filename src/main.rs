use anyhow::{Context, Result};
use log::{info, warn};
use rand::{rngs::StdRng, SeedableRng};
use stable_fluids::{
    blit, bounds_from_image, box_bounds, center, draw_density, inject_flow, load_bgra, randomize,
    scale, Bounds, FrameSink, Image, RawFrameWriter, RunConfig, Simulation,
};
use std::io::{self, BufWriter};

fn build_bounds(config: &RunConfig) -> Result<(Bounds, Option<Image>)> {
    let n = config.fluid.n;
    let mut bounds = Bounds::for_interior(n);
    let obstacle = match &config.obstacle {
        Some(path) => {
            let image = load_bgra(path, n, n)
                .with_context(|| format!("loading obstacle '{}'", path.display()))?;
            bounds_from_image(&mut bounds, &image, config.alpha_cutoff)?;
            Some(image)
        }
        None => None,
    };
    box_bounds(&mut bounds);
    Ok((bounds, obstacle))
}

fn render_frame(
    screen: &mut Image,
    density_image: &mut Image,
    sim: &Simulation,
    config: &RunConfig,
    overlay: Option<&Image>,
) -> Result<()> {
    screen.clear(config.background);
    draw_density(density_image, sim.state().dens.pad(1, 1))?;
    scale(screen, density_image);
    if let Some(obstacle) = overlay {
        let position = center(screen.shape(), obstacle.shape());
        blit(screen, obstacle, position);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let config = RunConfig::from_env().context("reading run configuration")?;
    let (bounds, obstacle) = build_bounds(&config)?;
    let mut sim = Simulation::new(config.fluid, bounds)?;
    let n = config.fluid.n;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let margin = if n > 2 { 2 } else { 1 };
    randomize(
        &mut sim.state_mut().dens.pad_mut(margin, margin),
        config.initial_density,
        &mut rng,
    );

    let mut screen = Image::new(config.screen.0, config.screen.1);
    let mut density_image = Image::new(n, n);
    let overlay = obstacle.as_ref().filter(|_| config.overlay_obstacle);
    let mut sink = RawFrameWriter::new(BufWriter::new(io::stdout().lock()));
    info!(
        "running {} frames, {}x{} output, obstacle {:?}",
        config.frames, config.screen.0, config.screen.1, config.obstacle
    );

    let mut reported_non_finite = false;
    for frame in 0..config.frames {
        let state = sim.state_mut();
        inject_flow(
            &mut state.u,
            config.inflow_row,
            config.inflow_u.mean,
            config.inflow_u.amplitude,
            &mut rng,
        );
        inject_flow(
            &mut state.v,
            config.inflow_row,
            config.inflow_v.mean,
            config.inflow_v.amplitude,
            &mut rng,
        );
        sim.step();

        let non_finite = sim.state().dens.count_non_finite();
        if non_finite > 0 && !reported_non_finite {
            warn!("frame {frame}: {non_finite} non-finite density cells");
            reported_non_finite = true;
        }

        render_frame(&mut screen, &mut density_image, &sim, &config, overlay)?;
        sink.write_frame(&screen)
            .with_context(|| format!("writing frame {frame}"))?;
    }
    sink.finish().context("flushing frame stream")?;
    info!("wrote {} frames", sink.frames());
    Ok(())
}
