//! Steering laws: from target/obstacle positions to a continuous vector.
//!
//! Image coordinates throughout: `+x` is right, `+y` is down. Every law
//! reacts to the current frame only; the task is the only thing that
//! persists between frames.

use crate::cv::vision::Blob;
use crate::error::Error;
use opencv::core::Point;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::debug;

/// Competition task, fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Task {
    /// Identification round; steers like [`Task::Avoid`].
    Identify = 0,
    Track = 1,
    Settle = 2,
    Avoid = 3,
}

impl TryFrom<u8> for Task {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Task::Identify),
            1 => Ok(Task::Track),
            2 => Ok(Task::Settle),
            3 => Ok(Task::Avoid),
            other => Err(Error::InvalidTask(other)),
        }
    }
}

impl From<Task> for u8 {
    fn from(task: Task) -> Self {
        task as u8
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// What one frame shows, reduced to what the laws need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scene {
    pub width: u32,
    pub height: u32,
    pub target: Option<Point>,
    pub obstacle: Option<Point>,
    pub obstacle_area: f64,
}

impl Scene {
    /// Blobs without a position count as absent.
    pub fn new(width: u32, height: u32, target: Option<&Blob>, obstacle: Option<&Blob>) -> Self {
        let obstacle_pos = obstacle.and_then(|b| b.position);
        Self {
            width,
            height,
            target: target.and_then(|b| b.position),
            obstacle: obstacle_pos,
            obstacle_area: obstacle.filter(|_| obstacle_pos.is_some()).map_or(0.0, |b| b.area),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.width / 2) as f64, (self.height / 2) as f64)
    }

    fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    /// Obstacle relative to the frame centre.
    fn obstacle_offset(&self) -> Option<(f64, f64)> {
        let (cx, cy) = self.center();
        self.obstacle.map(|o| (o.x as f64 - cx, o.y as f64 - cy))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Steering {
    pub vx: f64,
    pub vy: f64,
    /// Target distance from the frame centre, 0 without a target.
    pub distance: f64,
}

impl Steering {
    pub fn magnitude(&self) -> f64 {
        self.vx.hypot(self.vy)
    }
}

/// Target offset from the frame centre; `distance` is always positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bearing {
    pub dx: f64,
    pub dy: f64,
    pub distance: f64,
}

impl Bearing {
    fn unit(&self) -> (f64, f64) {
        (self.dx / self.distance, self.dy / self.distance)
    }
}

pub trait SteeringLaw {
    fn pursue(&self, scene: &Scene, bearing: Bearing) -> (f64, f64);
}

/// Task 1: the raw offset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Proportional;

impl SteeringLaw for Proportional {
    fn pursue(&self, _scene: &Scene, bearing: Bearing) -> (f64, f64) {
        (bearing.dx, bearing.dy)
    }
}

/// Task 2: offset scaled by a gain that shrinks near the target.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandedGain;

impl BandedGain {
    pub fn gain(distance: f64) -> f64 {
        match distance {
            d if d > 100.0 => 1.5,
            d if d > 50.0 => 1.0,
            d if d > 25.0 => 0.6,
            d if d > 10.0 => 0.4,
            _ => 0.25,
        }
    }
}

impl SteeringLaw for BandedGain {
    fn pursue(&self, _scene: &Scene, bearing: Bearing) -> (f64, f64) {
        let gain = Self::gain(bearing.distance);
        (gain * bearing.dx, gain * bearing.dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attraction {
    Constant(f64),
    /// `min(distance / divisor, cap)`
    Scaled { divisor: f64, cap: f64 },
}

impl Attraction {
    pub fn force(&self, distance: f64) -> f64 {
        match *self {
            Attraction::Constant(force) => force,
            Attraction::Scaled { divisor, cap } => (distance / divisor).min(cap),
        }
    }
}

/// Multiplier applied once the obstacle covers more than `ratio` of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boost {
    pub ratio: f64,
    pub factor: f64,
}

/// Parameters of one distance regime of the staged field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regime {
    /// Half-width of the square around the centre that triggers bypass.
    pub safety_half_width: f64,
    pub bypass_force: f64,
    /// Pull toward the target kept while bypassing.
    pub bypass_attraction: f64,
    pub attraction: Attraction,
    /// Obstacles farther than this from the centre exert no repulsion.
    pub repulsion_range: f64,
    pub repulsion_gain: f64,
    pub repulsion_min_distance: f64,
    pub repulsion_cap: Option<f64>,
    pub area_divisor: f64,
    pub area_cap: f64,
    /// Checked in order; the first tier exceeded applies.
    #[serde(default)]
    pub boost: Vec<Boost>,
}

impl Regime {
    pub fn far() -> Self {
        Self {
            safety_half_width: 150.0,
            bypass_force: 4000.0,
            bypass_attraction: 300.0,
            attraction: Attraction::Constant(600.0),
            repulsion_range: 250.0,
            repulsion_gain: 1200.0,
            repulsion_min_distance: 2.0,
            repulsion_cap: None,
            area_divisor: 300.0,
            area_cap: 10.0,
            boost: Vec::new(),
        }
    }

    pub fn mid() -> Self {
        Self {
            safety_half_width: 150.0,
            bypass_force: 3000.0,
            bypass_attraction: 200.0,
            attraction: Attraction::Scaled {
                divisor: 30.0,
                cap: 80.0,
            },
            repulsion_range: 180.0,
            repulsion_gain: 1500.0,
            repulsion_min_distance: 5.0,
            repulsion_cap: Some(80.0),
            area_divisor: 300.0,
            area_cap: 10.0,
            boost: Vec::new(),
        }
    }

    pub fn near() -> Self {
        Self {
            safety_half_width: 150.0,
            bypass_force: 2000.0,
            bypass_attraction: 100.0,
            attraction: Attraction::Scaled {
                divisor: 80.0,
                cap: 12.0,
            },
            repulsion_range: 120.0,
            repulsion_gain: 1200.0,
            repulsion_min_distance: 10.0,
            repulsion_cap: Some(60.0),
            area_divisor: 300.0,
            area_cap: 8.0,
            boost: vec![
                Boost {
                    ratio: 0.1,
                    factor: 5.0,
                },
                Boost {
                    ratio: 0.05,
                    factor: 3.0,
                },
            ],
        }
    }

    fn shields(&self, (ox, oy): (f64, f64)) -> bool {
        ox.abs() < self.safety_half_width && oy.abs() < self.safety_half_width
    }

    pub fn boost_factor(&self, area_ratio: f64) -> f64 {
        self.boost
            .iter()
            .find(|tier| area_ratio > tier.ratio)
            .map_or(1.0, |tier| tier.factor)
    }

    fn repulsion(&self, distance: f64, area: f64) -> f64 {
        let area_factor = (area / self.area_divisor).min(self.area_cap);
        let force = self.repulsion_gain / distance.max(self.repulsion_min_distance) * (1.0 + area_factor);
        match self.repulsion_cap {
            Some(cap) => force.min(cap),
            None => force,
        }
    }
}

/// Tasks 0 and 3: attraction plus obstacle repulsion, switching to a
/// sideways bypass when the obstacle sits near the aim point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedField {
    /// Distances above this use the far regime.
    pub far_beyond: f64,
    /// Distances above this (and not far) use the mid regime.
    pub near_within: f64,
    pub far: Regime,
    pub mid: Regime,
    pub near: Regime,
}

impl Default for StagedField {
    fn default() -> Self {
        Self {
            far_beyond: 150.0,
            near_within: 30.0,
            far: Regime::far(),
            mid: Regime::mid(),
            near: Regime::near(),
        }
    }
}

impl StagedField {
    pub fn regime(&self, distance: f64) -> &Regime {
        if distance > self.far_beyond {
            &self.far
        } else if distance > self.near_within {
            &self.mid
        } else {
            &self.near
        }
    }
}

/// Unit vector perpendicular to the bearing, on the side away from an
/// obstacle at offset `(ox, oy)`.
pub fn bypass_tangent(bearing: &Bearing, (ox, oy): (f64, f64)) -> (f64, f64) {
    let (dx, dy) = (bearing.dx, bearing.dy);
    let cross = dx * oy - dy * ox;
    let len = bearing.distance.max(1.0);
    if cross > 0.0 {
        (dy / len, -dx / len)
    } else {
        (-dy / len, dx / len)
    }
}

impl SteeringLaw for StagedField {
    fn pursue(&self, scene: &Scene, bearing: Bearing) -> (f64, f64) {
        let regime = self.regime(bearing.distance);
        let (ux, uy) = bearing.unit();

        if let Some(offset) = scene.obstacle_offset().filter(|o| regime.shields(*o)) {
            let (tx, ty) = bypass_tangent(&bearing, offset);
            debug!(tx, ty, "obstacle in safety zone, bypassing");
            return (
                regime.bypass_force * tx + regime.bypass_attraction * ux,
                regime.bypass_force * ty + regime.bypass_attraction * uy,
            );
        }

        let pull = regime.attraction.force(bearing.distance);
        let (mut vx, mut vy) = (pull * ux, pull * uy);

        if let Some((ox, oy)) = scene.obstacle_offset() {
            let away = (ox * ox + oy * oy).sqrt();
            if away > 0.0 && away < regime.repulsion_range {
                let push = regime.repulsion(away, scene.obstacle_area);
                vx -= push * ox / away;
                vy -= push * oy / away;

                let boost = regime.boost_factor(scene.obstacle_area / scene.area());
                vx *= boost;
                vy *= boost;
                debug!(push, boost, "obstacle repulsion");
            }
        }

        (vx, vy)
    }
}

/// Without a target, drift away from the obstacle.
const DRIFT_GAIN: f64 = 300.0;
const DRIFT_MIN_DISTANCE: f64 = 40.0;
const DRIFT_AREA_DIVISOR: f64 = 800.0;
const DRIFT_AREA_CAP: f64 = 4.0;
const DRIFT_CAP: f64 = 15.0;

fn drift(scene: &Scene) -> (f64, f64) {
    let Some((ox, oy)) = scene.obstacle_offset() else {
        return (0.0, 0.0);
    };
    let away = (ox * ox + oy * oy).sqrt();
    if away == 0.0 {
        return (0.0, 0.0);
    }

    let area_factor = (scene.obstacle_area / DRIFT_AREA_DIVISOR).min(DRIFT_AREA_CAP);
    let push = (DRIFT_GAIN / away.max(DRIFT_MIN_DISTANCE) * (1.0 + area_factor)).min(DRIFT_CAP);
    (-push * ox / away, -push * oy / away)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlLaw {
    Proportional(Proportional),
    BandedGain(BandedGain),
    StagedField(StagedField),
}

impl ControlLaw {
    pub fn for_task(task: Task, field: &StagedField) -> Self {
        match task {
            Task::Track => ControlLaw::Proportional(Proportional),
            Task::Settle => ControlLaw::BandedGain(BandedGain),
            Task::Identify | Task::Avoid => ControlLaw::StagedField(field.clone()),
        }
    }

    pub fn steer(&self, scene: &Scene) -> Steering {
        let Some(target) = scene.target else {
            let (vx, vy) = drift(scene);
            return Steering { vx, vy, distance: 0.0 };
        };

        let (cx, cy) = scene.center();
        let (dx, dy) = (target.x as f64 - cx, target.y as f64 - cy);
        let distance = (dx * dx + dy * dy).sqrt();
        if distance == 0.0 {
            return Steering::default();
        }

        let bearing = Bearing { dx, dy, distance };
        let (vx, vy) = match self {
            ControlLaw::Proportional(law) => law.pursue(scene, bearing),
            ControlLaw::BandedGain(law) => law.pursue(scene, bearing),
            ControlLaw::StagedField(law) => law.pursue(scene, bearing),
        };
        debug!(dx, dy, distance, vx, vy, "steering");

        Steering { vx, vy, distance }
    }
}
