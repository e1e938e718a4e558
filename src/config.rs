//! Run settings that override parts of a scene.

use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{SimError, SimResult};
use crate::mac::MacProtocol;
use crate::simulation::{Scene, validate_scene};

/// Settings read from a `config.toml` next to the scene or given explicitly.
///
/// Every field is optional; unset fields leave the scene as it is.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunConfig {
    pub rounds: Option<u32>,
    pub seed: Option<u64>,
    pub protocol: Option<MacProtocol>,
    pub slot_length_secs: Option<f64>,
    /// Console log level of the simulator's own records, e.g. `"debug"`.
    pub log_level: Option<String>,
}

impl RunConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> SimResult<Self> {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| SimError::InvalidConfig(format!("failed to read {}: {}", config_path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> SimResult<Self> {
        let config: RunConfig = toml::from_str(content).map_err(|e| SimError::InvalidConfig(e.to_string()))?;
        config.log_level()?;
        Ok(config)
    }

    /// Derive the config path from a scene file path.
    ///
    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &Path) -> PathBuf {
        scene_path.parent().unwrap_or(Path::new(".")).join("config.toml")
    }

    pub fn log_level(&self) -> SimResult<Option<LevelFilter>> {
        self.log_level
            .as_deref()
            .map(|level| LevelFilter::from_str(level).map_err(|_| SimError::InvalidConfig(format!("unknown log level '{}'", level))))
            .transpose()
    }

    /// Write the overrides into `scene` and validate the result.
    pub fn apply(&self, scene: &mut Scene) -> SimResult<()> {
        if let Some(rounds) = self.rounds {
            scene.rounds = rounds;
        }
        if let Some(seed) = self.seed {
            scene.seed = Some(seed);
        }
        if let Some(protocol) = self.protocol {
            scene.mac.protocol = protocol;
        }
        if let Some(slot_length) = self.slot_length_secs {
            scene.mac.slot_length_secs = slot_length;
        }
        validate_scene(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"{
        "devices": [
            {"kind": "gateway", "name": "gw", "x": 0.0, "y": 0.0},
            {"kind": "sensor", "name": "s1", "x": 10.0, "y": 0.0}
        ]
    }"#;

    #[test]
    fn overrides_are_applied() {
        let config = RunConfig::parse("rounds = 3\nseed = 9\nprotocol = \"csma\"\nlog-level = \"trace\"\n").unwrap();
        assert_eq!(config.log_level().unwrap(), Some(LevelFilter::Trace));
        let mut scene = Scene::from_json(SCENE).unwrap();
        config.apply(&mut scene).unwrap();
        assert_eq!(scene.rounds, 3);
        assert_eq!(scene.seed, Some(9));
        assert_eq!(scene.mac.protocol, MacProtocol::Csma);
    }

    #[test]
    fn empty_config_changes_nothing() {
        let config = RunConfig::parse("").unwrap();
        assert_eq!(config, RunConfig::default());
        let mut scene = Scene::from_json(SCENE).unwrap();
        config.apply(&mut scene).unwrap();
        assert_eq!(scene.rounds, 10);
        assert_eq!(scene.seed, None);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(RunConfig::parse("log-level = \"loud\""), Err(SimError::InvalidConfig(_))));
        assert!(matches!(RunConfig::parse("rounds = \"many\""), Err(SimError::InvalidConfig(_))));
        let mut scene = Scene::from_json(SCENE).unwrap();
        let zero = RunConfig { rounds: Some(0), ..RunConfig::default() };
        assert!(matches!(zero.apply(&mut scene), Err(SimError::InvalidScene(_))));
    }

    #[test]
    fn config_sits_next_to_the_scene() {
        assert_eq!(
            RunConfig::config_path_from_scene(Path::new("scenes/two_sensors.json")),
            PathBuf::from("scenes/config.toml")
        );
    }
}
