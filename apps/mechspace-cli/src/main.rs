mod scenes;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mechspace_joint::{
    BackendAdapter, GearboxJoint, HingeJoint, Joint, JointDescription, PhysicsEngine, Simulation,
};
use mechspace_kernel::WorldConfig;
use mechspace_maximal::{MaximalAdapter, MaximalConfig, MaximalEngine};
use mechspace_multibody::{MultibodyAdapter, MultibodyConfig, MultibodyEngine};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mechspace-cli", about = "CLI tool for mechspace mechanisms")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML file with `world`, `maximal` and `multibody` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Maximal,
    Multibody,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Swing a damped pendulum on one hinge
    Pendulum {
        #[arg(short, long, value_enum, default_value = "maximal")]
        backend: Backend,
        /// Number of steps to simulate
        #[arg(short, long, default_value = "1000")]
        steps: u64,
        /// Actuation applied every step
        #[arg(short, long, default_value = "0.0")]
        effort: f64,
        /// Release angle in radians
        #[arg(long, default_value = "0.3")]
        tilt: f64,
    },
    /// Drive a two-shaft reducer through a gearbox joint
    Gearbox {
        #[arg(short, long, value_enum, default_value = "maximal")]
        backend: Backend,
        /// Output rate over input rate
        #[arg(short, long, default_value = "2.0")]
        ratio: f64,
        /// Number of steps to simulate
        #[arg(short, long, default_value = "500")]
        steps: u64,
    },
    /// Check legacy JSON joint documents
    Validate {
        /// File holding one document or an array of them
        file: PathBuf,
        /// Model the joints belong to
        #[arg(short, long, default_value = "model")]
        model: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    world: WorldConfig,
    maximal: MaximalConfig,
    multibody: MultibodyConfig,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = serde_yaml::from_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        tracing::debug!(?config, "loaded config");
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("mechspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("kernel: {}", mechspace_kernel::crate_info());
            println!("joint: {}", mechspace_joint::crate_info());
            println!("maximal: {}", mechspace_maximal::crate_info());
            println!("multibody: {}", mechspace_multibody::crate_info());
            println!(
                "world: step_size={} gravity={:?}",
                config.world.step_size, config.world.gravity
            );
        }
        Commands::Pendulum {
            backend,
            steps,
            effort,
            tilt,
        } => {
            let (world, joint) = scenes::pendulum(config.world, tilt)?;
            println!("Pendulum on {backend:?}: steps={steps}, effort={effort}, tilt={tilt}");
            match backend {
                Backend::Maximal => run_pendulum::<MaximalAdapter>(
                    Simulation::new(world, MaximalEngine::new(config.maximal)),
                    joint,
                    steps,
                    effort,
                )?,
                Backend::Multibody => run_pendulum::<MultibodyAdapter>(
                    Simulation::new(world, MultibodyEngine::new(config.multibody)),
                    joint,
                    steps,
                    effort,
                )?,
            }
        }
        Commands::Gearbox {
            backend,
            ratio,
            steps,
        } => {
            let (world, reducer) = scenes::reducer(config.world, ratio)?;
            println!("Gearbox on {backend:?}: ratio={ratio}, steps={steps}");
            match backend {
                Backend::Maximal => run_gearbox::<MaximalAdapter>(
                    Simulation::new(world, MaximalEngine::new(config.maximal)),
                    reducer,
                    steps,
                )?,
                Backend::Multibody => run_gearbox::<MultibodyAdapter>(
                    Simulation::new(world, MultibodyEngine::new(config.multibody)),
                    reducer,
                    steps,
                )?,
            }
        }
        Commands::Validate { file, model } => validate(&file, &model)?,
    }

    Ok(())
}

fn report_interval(steps: u64) -> u64 {
    (steps / 10).max(1)
}

/// Advance one step and discard the world's event log, which nothing here
/// replays.
fn step<P: PhysicsEngine>(sim: &mut Simulation<P>) {
    sim.step();
    let events = sim.world_mut().drain_events();
    tracing::trace!(count = events.len(), "world events");
}

fn report_notices<A: BackendAdapter>(joint: &mut Joint<A>) {
    for notice in joint.drain_notices() {
        tracing::warn!(joint = %notice.joint, op = notice.op, "{}", notice.error);
    }
}

fn hinge<A: BackendAdapter>(
    sim: &mut Simulation<A::Physics>,
    description: JointDescription,
) -> anyhow::Result<HingeJoint<A>> {
    let mut joint = HingeJoint::new();
    joint.load(sim.world(), description)?;
    joint.init(sim)?;
    Ok(joint)
}

fn run_pendulum<A: BackendAdapter>(
    mut sim: Simulation<A::Physics>,
    description: JointDescription,
    steps: u64,
    effort: f64,
) -> anyhow::Result<()> {
    let mut joint = hinge::<A>(&mut sim, description)?;
    let every = report_interval(steps);
    for i in 1..=steps {
        joint.update(sim.world());
        if effort != 0.0 {
            joint.set_force(&mut sim, 0, effort);
        }
        step(&mut sim);
        if i % every == 0 {
            let wrench = joint.force_torque(&sim);
            println!(
                "t={:.3} angle={:+.4} rate={:+.4} bob_force={:.3?}",
                sim.world().sim_time(),
                joint.angle(&sim, 0),
                joint.velocity(&sim, 0),
                wrench.body2_force
            );
            report_notices(&mut joint);
        }
    }
    report_notices(&mut joint);
    Ok(())
}

fn run_gearbox<A: BackendAdapter>(
    mut sim: Simulation<A::Physics>,
    reducer: scenes::Reducer,
    steps: u64,
) -> anyhow::Result<()> {
    let mut input = hinge::<A>(&mut sim, reducer.input)?;
    let mut output = hinge::<A>(&mut sim, reducer.output)?;
    let mut gear = GearboxJoint::<A>::new();
    gear.load(sim.world(), reducer.gear)?;
    gear.init(&mut sim)?;

    let every = report_interval(steps);
    for i in 1..=steps {
        input.update(sim.world());
        output.update(sim.world());
        gear.update(sim.world());
        input.set_force(&mut sim, 0, 1.0);
        step(&mut sim);
        if i % every == 0 {
            let w_in = input.velocity(&sim, 0);
            let w_out = output.velocity(&sim, 0);
            let achieved = if w_in.abs() > f64::EPSILON {
                w_out / w_in
            } else {
                0.0
            };
            println!(
                "t={:.3} input={:+.4} output={:+.4} achieved_ratio={:.4}",
                sim.world().sim_time(),
                w_in,
                w_out,
                achieved
            );
            report_notices(&mut input);
            report_notices(&mut output);
            report_notices(&mut gear);
        }
    }
    if let Some(coupling) = gear.coupling(&sim) {
        println!(
            "coupling: ratio={} reference={:?} axes={:?}",
            coupling.ratio, coupling.reference, coupling.axes
        );
    }
    report_notices(&mut gear);
    Ok(())
}

#[allow(deprecated)]
fn validate(file: &Path, model: &str) -> anyhow::Result<()> {
    let text =
        std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parse {}", file.display()))?;
    let documents = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };
    let mut failed = 0;
    for (index, document) in documents.iter().enumerate() {
        match JointDescription::from_document(model, document).and_then(|d| d.validate().map(|_| d)) {
            Ok(d) => println!(
                "[{index}] {} ({:?}): parent={} child={} axes={}",
                d.name,
                d.kind,
                d.parent_link().unwrap_or("world"),
                d.child_link().unwrap_or("world"),
                d.axes.len()
            ),
            Err(e) => {
                failed += 1;
                println!("[{index}] invalid: {e}");
            }
        }
    }
    anyhow::ensure!(failed == 0, "{failed} of {} documents invalid", documents.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_sections_are_optional() {
        let config: CliConfig = serde_yaml::from_str("maximal:\n  iterations: 5\n").unwrap();
        assert_eq!(config.maximal.iterations, 5);
        assert_eq!(config.world, WorldConfig::default());
        assert!(!config.multibody.enforce_velocity_limits);
    }

    #[test]
    fn world_section_overrides_gravity() {
        let yaml = "world:\n  gravity: [0.0, 0.0, 0.0]\nmultibody:\n  enforce_velocity_limits: true\n";
        let config: CliConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.world.gravity, glam::DVec3::ZERO);
        assert!(config.multibody.enforce_velocity_limits);
    }

    #[test]
    fn stepping_drains_the_event_log() {
        let (world, _) = scenes::pendulum(WorldConfig::default(), 0.1).unwrap();
        let mut sim = Simulation::new(world, MaximalEngine::default());
        for _ in 0..3 {
            step(&mut sim);
        }
        assert!(sim.world().events().is_empty());
        assert_eq!(sim.world().tick(), 3);
    }

    #[test]
    fn report_interval_is_never_zero() {
        assert_eq!(report_interval(5), 1);
        assert_eq!(report_interval(1000), 100);
    }
}
