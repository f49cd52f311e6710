//! Discrete turret commands and the quantizer that picks one per frame.

use crate::control::{Steering, Task};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Up,
    Down,
    Left,
    Right,
    /// Hold position. Still a reply, so the driver never waits on us.
    Noop,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Up => "UP",
            Command::Down => "DOWN",
            Command::Left => "LEFT",
            Command::Right => "RIGHT",
            Command::Noop => "NOOP",
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Command::Up),
            "DOWN" => Ok(Command::Down),
            "LEFT" => Ok(Command::Left),
            "RIGHT" => Ok(Command::Right),
            "NOOP" => Ok(Command::Noop),
            other => Err(format!("unknown command {other:?}")),
        }
    }
}

/// Smallest component that still moves the turret.
///
/// Tasks 1 and 2 work in raw pixels. The staged field is already attenuated
/// near the target, so its deadband is tiny and tightens with distance.
pub fn threshold(task: Task, distance: f64) -> f64 {
    match task {
        Task::Track => 1.0,
        Task::Settle => 1.5,
        Task::Identify | Task::Avoid => match distance {
            d if d > 100.0 => 0.001,
            d if d > 50.0 => 0.002,
            d if d > 20.0 => 0.003,
            d if d > 5.0 => 0.005,
            _ => 0.001,
        },
    }
}

/// Always yields a command; anything that is not a clear move is `Noop`.
pub fn quantize(steering: &Steering, task: Task) -> Command {
    let t = threshold(task, steering.distance);
    let Steering { vx, vy, .. } = *steering;

    if vx.abs() < t && vy.abs() < t {
        return Command::Noop;
    }

    if vx.abs() > vy.abs() {
        if vx > t {
            Command::Right
        } else if vx < -t {
            Command::Left
        } else {
            Command::Noop
        }
    } else if vy > t {
        Command::Down
    } else if vy < -t {
        Command::Up
    } else {
        Command::Noop
    }
}
