//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use linkd_discovery::Controller;
use linkd_discovery::tasks::Task;
use linkd_netlib::gnmiserver::{self, ServerConfig, TlsPaths};
use tracing::info;
use uuid::Uuid;

const CONFIG_FILE: &str = "config.yaml";
const ARGS_FILE: &str = "args";
const UUID_FILE: &str = "uuid";

// Name the served tree is addressed by in gNMI requests.
const GNMI_TARGET: &str = "linkd";

/// Daemon configuration assembled from the command line.
#[derive(Debug)]
pub struct Config {
    pub agent_uuid: Option<String>,
    pub target_address: Option<String>,
    pub bind_port: Option<u16>,
    pub no_tls: bool,
    pub ca_path: Option<String>,
    pub key_path: Option<String>,
    pub cert_path: Option<String>,
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
}

/// Single point of entry coordinating the lifecycle of the discovery
/// controller and the northbound gNMI service.
pub struct Manager {
    controller: Controller,
    run_task: Task<()>,
}

// Startup errors.
#[derive(Debug)]
pub enum StartError {
    ArgsFileRead(PathBuf, std::io::Error),
    ArgsFileParse(PathBuf),
    UuidPersist(PathBuf, std::io::Error),
}

// ===== impl Config =====

impl Default for Config {
    fn default() -> Config {
        Config {
            agent_uuid: None,
            target_address: None,
            bind_port: None,
            no_tls: false,
            ca_path: None,
            key_path: None,
            cert_path: None,
            config_dir: PathBuf::from("/etc/linkd"),
            state_dir: PathBuf::from("/var/lib/linkd"),
        }
    }
}

// ===== impl Manager =====

impl Manager {
    /// Initializes and starts the discovery controller and the northbound
    /// gNMI service.
    pub fn start(config: Config) -> Result<Manager, StartError> {
        info!("starting manager");

        // Load (or generate and persist) our UUID.
        let agent_uuid = match config.agent_uuid {
            Some(uuid) if !uuid.is_empty() => uuid,
            _ => load_or_create_uuid(&config.state_dir.join(UUID_FILE))?,
        };

        // If the command line is incomplete, fall back to the args file.
        let (bind_port, target_address) =
            match (config.bind_port, config.target_address) {
                (Some(bind_port), Some(target_address)) => {
                    (bind_port, target_address)
                }
                _ => read_args_file(&config.config_dir.join(ARGS_FILE))?,
            };

        // Initialize and start the link discovery controller.
        let controller = Controller::new(
            &target_address,
            &agent_uuid,
            config.config_dir.join(CONFIG_FILE),
        );
        let run_task = controller.start();

        // Start the northbound gNMI server over the controller's tree.
        let address = SocketAddr::new(
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            bind_port,
        );
        let tls = match (config.no_tls, config.cert_path, config.key_path) {
            (false, Some(certificate), Some(key)) => Some(TlsPaths {
                certificate,
                key,
                ca: config.ca_path,
            }),
            _ => None,
        };
        gnmiserver::start(
            controller.tree(),
            GNMI_TARGET,
            ServerConfig { address, tls },
        );

        Ok(Manager {
            controller,
            run_task,
        })
    }

    /// Stops the discovery controller and waits for its driver to exit.
    pub async fn stop(self) {
        info!("stopping manager");
        self.controller.stop();
        let _ = self.run_task.await;
    }
}

// ===== impl StartError =====

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::ArgsFileRead(path, ..) => {
                write!(f, "unable to read args file {}", path.display())
            }
            StartError::ArgsFileParse(path) => {
                write!(f, "malformed args file {}", path.display())
            }
            StartError::UuidPersist(path, ..) => {
                write!(f, "unable to save UUID to {}", path.display())
            }
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::ArgsFileRead(_, error)
            | StartError::UuidPersist(_, error) => Some(error),
            StartError::ArgsFileParse(..) => None,
        }
    }
}

// ===== helper functions =====

// Loads the persisted agent UUID, generating and persisting a fresh one
// if the file is missing or empty. Failure to persist is fatal: an agent
// whose identity changes on every restart would confuse its neighbors.
fn load_or_create_uuid(path: &Path) -> Result<String, StartError> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        let uuid = contents.trim();
        if !uuid.is_empty() {
            return Ok(uuid.to_owned());
        }
    }

    let new_uuid = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::write(path, &new_uuid)
        .map_err(|error| StartError::UuidPersist(path.to_owned(), error))?;
    info!(uuid = %new_uuid, "generated new agent UUID");
    Ok(new_uuid)
}

// Reads `<bind-port> <target-address>` from the args file.
fn read_args_file(path: &Path) -> Result<(u16, String), StartError> {
    info!(path = %path.display(), "reading args from file");
    let contents = std::fs::read_to_string(path)
        .map_err(|error| StartError::ArgsFileRead(path.to_owned(), error))?;

    let mut args = contents.split_whitespace();
    let (Some(bind_port), Some(target_address)) = (args.next(), args.next())
    else {
        return Err(StartError::ArgsFileParse(path.to_owned()));
    };
    let bind_port = bind_port
        .parse()
        .map_err(|_| StartError::ArgsFileParse(path.to_owned()))?;
    Ok((bind_port, target_address.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("linkd-manager-test-{name}"))
    }

    #[test]
    fn test_read_args_file() {
        let path = temp_path("args");
        std::fs::write(&path, "28001 switch1:28000\n").unwrap();
        let (bind_port, target_address) = read_args_file(&path).unwrap();
        assert_eq!(bind_port, 28001);
        assert_eq!(target_address, "switch1:28000");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_read_args_file_malformed() {
        let path = temp_path("args-malformed");
        std::fs::write(&path, "28001\n").unwrap();
        assert!(matches!(
            read_args_file(&path),
            Err(StartError::ArgsFileParse(..))
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_read_args_file_missing() {
        let path = temp_path("args-missing");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            read_args_file(&path),
            Err(StartError::ArgsFileRead(..))
        ));
    }

    #[test]
    fn test_uuid_persisted_once() {
        let path = temp_path("uuid");
        let _ = std::fs::remove_file(&path);

        let first = load_or_create_uuid(&path).unwrap();
        assert!(Uuid::parse_str(&first).is_ok());

        // The second load returns the persisted identity.
        let second = load_or_create_uuid(&path).unwrap();
        assert_eq!(first, second);

        let _ = std::fs::remove_file(&path);
    }
}
