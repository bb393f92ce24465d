//! Run a night of simulated observations through the executor.
//!
//! A trivial scheduler hands out targets one by one; the next target is
//! published as soon as the current one reports its last readout, so the
//! mount slew overlaps the final readout exactly as it would on the sky.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use executor::{
    CameraExecClient, ConnectionRegistry, EventBus, SimulatedRig, TelescopeExecClient,
};
use shared::config_storage::{ConfigStorage, ExecConfig};
use shared::{Command, DeviceKind, Equatorial, Event, EventKind, FixedTarget, ScriptStep, TargetRef};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Simulated observatory executor")]
struct Args {
    /// Executor config file (defaults to ~/.cf_config/exec_config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of targets to observe
    #[arg(short, long, default_value = "4")]
    targets: usize,

    /// Exposures per target on each camera
    #[arg(short, long, default_value = "3")]
    exposures: usize,

    /// Exposure time in seconds
    #[arg(long, default_value = "30")]
    exposure_secs: u64,

    /// Wall-clock delay between simulation steps in milliseconds (defaults to the
    /// configured readout time)
    #[arg(long)]
    step_delay_ms: Option<u64>,

    /// Publish KillAll after this many steps
    #[arg(long)]
    kill_after: Option<usize>,

    /// Give up after this many steps
    #[arg(long, default_value = "10000")]
    max_steps: usize,

    /// Write the effective config to the config store and exit
    #[arg(long)]
    save_config: bool,
}

fn load_config(args: &Args) -> anyhow::Result<ExecConfig> {
    if let Some(path) = &args.config {
        return ExecConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()));
    }

    let storage = ConfigStorage::new()?;
    match storage.get_exec_config() {
        Some(config) => Ok(config?),
        None => {
            info!("No exec config in {}, using defaults", storage.root_path().display());
            Ok(ExecConfig::default())
        }
    }
}

/// Targets spread around the sky, one of them south of the simulated mount's limit.
fn build_targets(args: &Args, config: &ExecConfig) -> Vec<TargetRef> {
    const DECS: [f64; 4] = [25.0, 60.0, -45.0, 5.0];

    let filter_wheel = config.devices_of(DeviceKind::FilterWheel).next();
    let cameras: Vec<&str> = config.devices_of(DeviceKind::Camera).collect();

    (0..args.targets)
        .map(|i| {
            let id = 1000 + i as i32;
            let pos = Equatorial::new(15.0 + 40.0 * i as f64, DECS[i % DECS.len()]);
            let mut target = FixedTarget::new(id, format!("field{i:02}"), pos)
                .with_tolerance(config.on_target_tolerance_deg);

            for (c, camera) in cameras.iter().enumerate() {
                let mut steps = Vec::new();
                // Only the first camera drives the shared filter wheel
                if let (0, Some(wheel)) = (c, filter_wheel) {
                    steps.push(ScriptStep::new(wheel, Command::Filter { filter: (i % 5) as u32 }));
                }
                steps.extend((0..args.exposures).map(|_| {
                    ScriptStep::new(
                        *camera,
                        Command::Expose {
                            exposure: Duration::from_secs(args.exposure_secs),
                            light: true,
                        },
                    )
                }));
                target = target.with_script(*camera, steps);
            }
            Rc::new(target) as TargetRef
        })
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    config.validate()?;

    if args.save_config {
        let path = ConfigStorage::new()?.save_exec_config(&config)?;
        println!("Saved config to {}", path.display());
        return Ok(());
    }

    let registry = Rc::new(ConnectionRegistry::from_config(&config)?);
    let mut sim = SimulatedRig::from_config(&config);
    sim.power_on(&registry);

    // Mounts first: they see every event before the cameras do
    let mut bus = EventBus::new();
    for name in config.devices_of(DeviceKind::Telescope) {
        bus.register(Box::new(TelescopeExecClient::new(name, &registry)?))?;
    }
    let cameras: Vec<&str> = config.devices_of(DeviceKind::Camera).collect();
    for name in &cameras {
        let camera = CameraExecClient::new(name, registry.clone())?.with_image_backlog(config.image_backlog);
        bus.register(Box::new(camera))?;
    }

    let step_delay = Duration::from_millis(args.step_delay_ms.unwrap_or(config.sim_readout_ms));
    let slew_delay = Duration::from_millis(config.sim_slew_ms);

    let mut queue = build_targets(&args, &config).into_iter();
    let mut observing = false;
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut killed = false;

    if let Some(target) = queue.next() {
        info!(target = target.id(), name = target.name(), "scheduling");
        bus.publish(Event::SetTarget(target));
        observing = true;
    }

    let mut steps = 0usize;
    while steps < args.max_steps {
        if !killed && args.kill_after == Some(steps) {
            warn!(steps, "killing all scripts");
            bus.publish(Event::KillAll);
            killed = true;
        }

        let slews_before = sim.stats().slews;
        let dispatch = sim.step(&mut bus, &registry)?;
        steps += 1;

        let advance = match &dispatch {
            Some(dispatch) => {
                debug!(events = ?dispatch.kinds(), "step");
                if dispatch.contains(EventKind::MoveFailed) {
                    failed += 1;
                }
                if dispatch.contains(EventKind::LastReadout) && observing {
                    completed += 1;
                }
                observing && (dispatch.contains(EventKind::LastReadout) || dispatch.contains(EventKind::MoveFailed))
            }
            // Nothing queued: whatever was running has finished or stalled
            None => true,
        };

        if advance && !killed {
            observing = false;
            if let Some(target) = queue.next() {
                info!(target = target.id(), name = target.name(), "scheduling");
                bus.publish(Event::SetTarget(target));
                observing = true;
            }
        }

        if dispatch.is_none() && (!observing || killed) {
            break;
        }

        let mut delay = step_delay;
        if sim.stats().slews > slews_before {
            delay += slew_delay;
        }
        tokio::time::sleep(delay).await;
    }

    let stats = sim.stats();
    println!();
    println!("Simulation finished after {steps} steps");
    println!("  Targets completed: {completed}");
    println!("  Failed slews:      {failed}");
    println!("  Exposures:         {}", stats.exposures);
    println!("  Images processed:  {}", stats.images_processed);
    println!("  Simulated end:     {}", sim.clock().format("%Y-%m-%d %H:%M:%S"));
    for name in &cameras {
        if let Some(camera) = bus.client::<CameraExecClient>(name) {
            println!(
                "  {name}: {} images held, {} dropped",
                camera.unprocessed_images().count(),
                camera.dropped_images()
            );
        }
    }
    Ok(())
}
