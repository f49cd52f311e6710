use crate::command::{quantize, Command};
use crate::control::{ControlLaw, Scene, StagedField, Steering, Task};
use crate::cv::vision::{Blob, Vision, RED, YELLOW};
use crate::cv::Frame;

pub mod command;
pub mod config;
pub mod control;
pub mod cv;
pub mod error;
pub mod protocol;

pub(crate) type Result<T> = std::result::Result<T, crate::error::Error>;

/// Everything decided about one frame.
#[derive(Debug, Clone)]
pub struct Aim {
    pub target: Option<Blob>,
    pub obstacle: Option<Blob>,
    pub steering: Steering,
    pub command: Command,
}

pub struct Turret {
    pub vision: Vision,
    task: Task,
    law: ControlLaw,
}

impl Turret {
    pub fn new(task: Task, field: &StagedField) -> Self {
        Self {
            vision: Vision::default(),
            task,
            law: ControlLaw::for_task(task, field),
        }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn aim(&self, frame: &Frame) -> crate::Result<Aim> {
        let [width, height] = frame.size();
        let target = self.vision.locate(frame, &RED)?;
        let obstacle = self.vision.locate(frame, &YELLOW)?;

        let scene = Scene::new(width, height, target.as_ref(), obstacle.as_ref());
        let steering = self.law.steer(&scene);
        let command = quantize(&steering, self.task);

        Ok(Aim {
            target,
            obstacle,
            steering,
            command,
        })
    }
}
