//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::Path;

use linkd_netlib::gnmiutils;
use linkd_netlib::proto::gnmi::TypedValue;
use linkd_netlib::proto::gnmi::typed_value::Value;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::controller::{Controller, State};

pub const EMIT_FREQUENCY_PATH: &str = "config/emitFrequency";
pub const MAX_LINK_AGE_PATH: &str = "config/maxLinkAge";
pub const PIPELINE_VALIDATION_FREQUENCY_PATH: &str =
    "config/pipelineValidationFrequency";
pub const PORT_REDISCOVERY_FREQUENCY_PATH: &str =
    "config/portRediscoveryFrequency";
pub const LINK_PRUNE_FREQUENCY_PATH: &str = "config/linkPruneFrequency";

/// Link discovery timing parameters, in seconds.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub emit_frequency: u64,
    pub max_link_age: u64,
    pub pipeline_validation_frequency: u64,
    pub port_rediscovery_frequency: u64,
    pub link_prune_frequency: u64,
}

// The on-disk layout nests the parameters under a top-level "config" map.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ConfigWrapper {
    config: AgentConfig,
}

// ===== impl AgentConfig =====

impl AgentConfig {
    /// Loads the configuration from the given YAML file, falling back to
    /// defaults if the file is missing or malformed.
    pub fn load(path: &Path) -> AgentConfig {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                match serde_yaml::from_str::<ConfigWrapper>(&contents) {
                    Ok(wrapper) => wrapper.config,
                    Err(error) => {
                        warn!(%error, "unable to parse config file, using defaults");
                        AgentConfig::default()
                    }
                }
            }
            Err(error) => {
                warn!(%error, "unable to load config file, using defaults");
                AgentConfig::default()
            }
        }
    }

    /// Persists the configuration to the given YAML file.
    pub fn save(&self, path: &Path) {
        let wrapper = ConfigWrapper {
            config: self.clone(),
        };
        let contents = match serde_yaml::to_string(&wrapper) {
            Ok(contents) => contents,
            Err(error) => {
                warn!(%error, "unable to serialize configuration");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(error) = std::fs::write(path, contents) {
            warn!(%error, "unable to save config file");
        }
    }
}

impl Default for AgentConfig {
    fn default() -> AgentConfig {
        AgentConfig {
            emit_frequency: 5,
            max_link_age: 30,
            pipeline_validation_frequency: 60,
            port_rediscovery_frequency: 60,
            link_prune_frequency: 2,
        }
    }
}

// ===== impl Controller =====

impl Controller {
    // Populates the "config/" branch of the tree with the cached
    // configuration values and creates the empty "state/" branch.
    pub(crate) fn populate_config_tree(&self) {
        let config = self.config();
        let tree = self.tree();
        for (path, value) in [
            (EMIT_FREQUENCY_PATH, config.emit_frequency),
            (MAX_LINK_AGE_PATH, config.max_link_age),
            (PIPELINE_VALIDATION_FREQUENCY_PATH, config.pipeline_validation_frequency),
            (PORT_REDISCOVERY_FREQUENCY_PATH, config.port_rediscovery_frequency),
            (LINK_PRUNE_FREQUENCY_PATH, config.link_prune_frequency),
        ] {
            tree.add_path(
                path,
                Some(TypedValue {
                    value: Some(Value::IntVal(value as i64)),
                }),
            );
        }
        tree.add_path("state", None);
    }

    // Reflects northbound configuration writes back into the cached
    // configuration, persists it and signals the ticker loop to rebuild.
    pub(crate) fn refresh_config(&self, changed: &[String]) {
        if !changed.iter().any(|path| path.starts_with("config/")) {
            return;
        }

        let tree = self.tree();
        {
            let mut shared = self.shared_mut();
            let config = &mut shared.config;
            for (path, value) in [
                (EMIT_FREQUENCY_PATH, &mut config.emit_frequency),
                (MAX_LINK_AGE_PATH, &mut config.max_link_age),
                (
                    PIPELINE_VALIDATION_FREQUENCY_PATH,
                    &mut config.pipeline_validation_frequency,
                ),
                (
                    PORT_REDISCOVERY_FREQUENCY_PATH,
                    &mut config.port_rediscovery_frequency,
                ),
                (LINK_PRUNE_FREQUENCY_PATH, &mut config.link_prune_frequency),
            ] {
                if let Some(new) = tree
                    .get_value(path)
                    .as_ref()
                    .and_then(gnmiutils::int_value)
                {
                    *value = new as u64;
                }
            }
            let config = shared.config.clone();
            config.save(self.config_file());
        }

        info!("configuration updated");
        self.set_state_if(State::Configured, State::Reconfigured);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("linkd-config-test-{name}.yaml"))
    }

    #[test]
    fn test_load_default_config() {
        let path = temp_config_file("missing");
        let _ = std::fs::remove_file(&path);
        let config = AgentConfig::load(&path);
        assert_eq!(config.emit_frequency, 5);
        assert_eq!(config.link_prune_frequency, 2);
    }

    #[test]
    fn test_save_and_load_config() {
        let path = temp_config_file("save-load");
        let mut config = AgentConfig::default();
        assert_eq!(config.emit_frequency, 5);

        config.emit_frequency = 7;
        config.save(&path);
        assert!(path.exists());

        let config = AgentConfig::load(&path);
        assert_eq!(config.emit_frequency, 7);
        assert_eq!(config.max_link_age, 30);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_wrapper_layout() {
        // The on-disk format nests everything under "config:".
        let config = AgentConfig::default();
        let contents = serde_yaml::to_string(&ConfigWrapper {
            config: config.clone(),
        })
        .unwrap();
        assert!(contents.starts_with("config:"));
        assert!(contents.contains("emitFrequency: 5"));
        assert!(contents.contains("maxLinkAge: 30"));
    }
}
