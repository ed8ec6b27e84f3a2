//! Demo mechanisms shared by the run commands.

use anyhow::Context;
use glam::{DQuat, DVec3};
use mechspace_common::Transform;
use mechspace_joint::{AxisDescription, JointDescription};
use mechspace_kernel::{Link, World, WorldConfig};

/// Pivot height above the ground plane.
const PIVOT: DVec3 = DVec3::new(0.0, 0.0, 1.0);

/// A welded base with a 2 kg bob on a 1 m arm, released `tilt` radians
/// away from hanging straight down.
pub fn pendulum(config: WorldConfig, tilt: f64) -> anyhow::Result<(World, JointDescription)> {
    let mut world = World::with_config(config);
    let m = world.spawn_model("pendulum", Transform::IDENTITY);
    world
        .spawn_link(Link::new("base", m, Transform::from_position(PIVOT), 1.0).kinematic())
        .context("spawn pendulum base")?;
    let bob = PIVOT + DQuat::from_rotation_x(tilt) * DVec3::NEG_Z;
    world
        .spawn_link(Link::new("bob", m, Transform::from_position(bob), 2.0))
        .context("spawn pendulum bob")?;
    let joint = JointDescription::hinge(
        "pivot",
        "pendulum",
        Some("base"),
        Some("bob"),
        AxisDescription::new(DVec3::X).with_damping(0.05),
    )
    .with_pose(Transform::from_position(PIVOT - bob));
    Ok((world, joint))
}

/// Descriptions for a two-shaft reducer.
pub struct Reducer {
    pub input: JointDescription,
    pub output: JointDescription,
    pub gear: JointDescription,
}

/// Input and output shafts on a welded housing, coupled by a gearbox
/// defined relative to the housing.
pub fn reducer(config: WorldConfig, ratio: f64) -> anyhow::Result<(World, Reducer)> {
    let mut world = World::with_config(config);
    let gears = world.spawn_model("gears", Transform::IDENTITY);
    world
        .spawn_link(Link::new("housing", gears, Transform::IDENTITY, 5.0).kinematic())
        .context("spawn housing")?;
    world
        .spawn_link(Link::new("input", gears, Transform::from_position(-DVec3::X), 1.0))
        .context("spawn input shaft")?;
    world
        .spawn_link(Link::new("output", gears, Transform::from_position(DVec3::X), 1.0))
        .context("spawn output shaft")?;

    let shaft = |name: &str, child: &str| {
        JointDescription::hinge(name, "gears", Some("housing"), Some(child), AxisDescription::new(DVec3::Z))
    };
    let gear = JointDescription::gearbox(
        "reducer",
        "gears",
        "input",
        "output",
        [AxisDescription::new(DVec3::Z), AxisDescription::new(DVec3::Z)],
        ratio,
        Some("housing"),
    );
    Ok((
        world,
        Reducer {
            input: shaft("input_shaft", "input"),
            output: shaft("output_shaft", "output"),
            gear,
        },
    ))
}
