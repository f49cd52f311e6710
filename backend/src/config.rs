//! Session configuration, loadable from TOML.

use crate::control::{Attraction, Regime, StagedField, Task};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub task: Task,
    /// Announced to the driver in the handshake.
    pub debug: bool,
    /// Lines sent after the handshake in the identification task.
    pub identity: Vec<String>,
    /// Delete consumed `.png` inputs after each turn.
    pub discard_consumed: bool,
    /// Reply `NOOP` instead of staying silent when a frame cannot be read.
    pub noop_on_failure: bool,
    /// Frames between progress lines; 0 disables them.
    pub progress_interval: u64,
    pub field: StagedField,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task: Task::Identify,
            debug: true,
            identity: vec![String::from("turret-pilot")],
            discard_consumed: true,
            noop_on_failure: false,
            progress_interval: 50,
            field: StagedField::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.task == Task::Identify && self.identity.iter().all(|l| l.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "task 0 needs at least one identity line".into(),
            ));
        }
        if self.identity.iter().any(|l| l.contains('\n')) {
            return Err(Error::InvalidConfig("identity lines must be single lines".into()));
        }

        let field = &self.field;
        if !(field.far_beyond > field.near_within && field.near_within >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "regime bounds must satisfy far_beyond > near_within >= 0, got {} and {}",
                field.far_beyond, field.near_within
            )));
        }
        for (name, regime) in [("far", &field.far), ("mid", &field.mid), ("near", &field.near)] {
            check_regime(name, regime)?;
        }

        Ok(())
    }
}

fn check_regime(name: &str, regime: &Regime) -> crate::Result<()> {
    let bad = |what: &str| Err(Error::InvalidConfig(format!("{name} regime: {what}")));

    if !(regime.safety_half_width > 0.0) {
        return bad("safety_half_width must be positive");
    }
    if !(regime.area_divisor > 0.0 && regime.repulsion_min_distance > 0.0) {
        return bad("area_divisor and repulsion_min_distance must be positive");
    }
    if let Attraction::Scaled { divisor, .. } = regime.attraction {
        if !(divisor > 0.0) {
            return bad("attraction divisor must be positive");
        }
    }

    let mut numbers = vec![
        regime.safety_half_width,
        regime.bypass_force,
        regime.bypass_attraction,
        regime.repulsion_range,
        regime.repulsion_gain,
        regime.repulsion_min_distance,
        regime.area_divisor,
        regime.area_cap,
    ];
    numbers.extend(regime.repulsion_cap);
    numbers.extend(regime.boost.iter().flat_map(|b| [b.ratio, b.factor]));
    match regime.attraction {
        Attraction::Constant(force) => numbers.push(force),
        Attraction::Scaled { divisor, cap } => numbers.extend([divisor, cap]),
    }
    if numbers.iter().any(|n| !n.is_finite()) {
        return bad("parameters must be finite");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task, Task::Identify);
        assert_eq!(config.identity, ["turret-pilot"]);
        assert!(config.discard_consumed);
        assert!(!config.noop_on_failure);
        assert_eq!(config.progress_interval, 50);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            task = 3
            debug = false

            [field.near]
            safety_half_width = 40.0
            bypass_force = 2000.0
            bypass_attraction = 100.0
            attraction = { scaled = { divisor = 80.0, cap = 12.0 } }
            repulsion_range = 120.0
            repulsion_gain = 1200.0
            repulsion_min_distance = 10.0
            repulsion_cap = 60.0
            area_divisor = 300.0
            area_cap = 8.0
            "#,
        )
        .unwrap();

        assert_eq!(config.task, Task::Avoid);
        assert!(!config.debug);
        assert_eq!(config.field.near.safety_half_width, 40.0);
        assert!(config.field.near.boost.is_empty());
        assert_eq!(config.field.far, Regime::far());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_task_is_rejected() {
        assert!(toml::from_str::<Config>("task = 9").is_err());
    }

    #[test]
    fn identify_needs_identity() {
        let config = Config {
            task: Task::Identify,
            identity: vec![],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn non_positive_safety_zone_is_rejected() {
        let mut config = Config::default();
        config.field.mid.safety_half_width = 0.0;
        assert!(config.validate().is_err());

        config.field.mid.safety_half_width = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_regime_bounds_are_rejected() {
        let mut config = Config::default();
        config.field.near_within = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pilot.toml");
        std::fs::write(&path, "task = 2\nnoop_on_failure = true\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.task, Task::Settle);
        assert!(config.noop_on_failure);

        std::fs::write(&path, "task = ").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }
}
