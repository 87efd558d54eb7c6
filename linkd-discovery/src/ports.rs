//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;

use linkd_netlib::gnmiutils;
use linkd_netlib::proto::gnmi::{self, GNmiClient};
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use crate::connection::Session;
use crate::controller::{Controller, Port, PortStatus, State};
use crate::tasks::Task;

const INTERFACES_STATE_PATH: &str = "interfaces/interface[name=...]/state";

/// Auxiliary state tracking the port-status subscription task.
#[derive(Debug, Default)]
pub(crate) struct PortMonitor {
    task: Option<Task<()>>,
    port_count: usize,
}

// ===== impl PortMonitor =====

impl PortMonitor {
    // Starts the monitor if it isn't running yet or if the port set
    // cardinality changed since the last enumeration.
    pub(crate) fn start(
        &mut self,
        controller: &Controller,
        gnmi: GNmiClient<Channel>,
        port_count: usize,
    ) {
        if self.task.is_none() || self.port_count != port_count {
            self.port_count = port_count;
            self.stop();
            info!("starting port status monitor");
            let controller = controller.clone();
            self.task = Some(Task::spawn(async move {
                controller.monitor_port_status(gnmi).await;
            }));
        }
    }

    pub(crate) fn stop(&mut self) {
        if self.task.take().is_some() {
            info!("stopping port status monitor");
        }
    }
}

// ===== impl Controller =====

impl Controller {
    // Enumerates the device's ports via gNMI and replaces the port map
    // atomically. Runs both on election and on the rediscovery ticker.
    pub(crate) async fn discover_ports(&self, session: &mut Session) {
        info!("discovering ports");
        let request = gnmi::GetRequest {
            path: vec![gnmiutils::to_path(INTERFACES_STATE_PATH)],
            ..Default::default()
        };
        let response = match session.gnmi.get(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                warn!(error = %status, "unable to request port list");
                self.set_state_if(State::Elected, State::Disconnected);
                return;
            }
        };
        let Some(notification) = response.notification.first() else {
            warn!("no port data received");
            return;
        };

        let mut ports = HashMap::new();
        for update in &notification.update {
            let Some(path) = &update.path else {
                continue;
            };
            let Some(name) = gnmiutils::elem_key(path, 1, "name") else {
                continue;
            };
            let Some(val) = &update.val else {
                continue;
            };

            let port = ports
                .entry(name.to_owned())
                .or_insert_with(|| Port::new(name));
            match gnmiutils::last_elem_name(path) {
                Some("id") => {
                    if let Some(id) = gnmiutils::uint_value(val) {
                        port.number = id as u32;
                    }
                }
                Some("oper-status") => {
                    if let Some(status) = gnmiutils::string_value(val) {
                        port.status = PortStatus::from_oper_status(status);
                    }
                }
                Some("last-change") => {
                    port.last_change = gnmiutils::uint_value(val);
                }
                _ => (),
            }
        }

        let port_count = ports.len();
        self.shared_mut().ports = ports;

        // Once ports are known, kick off a port-status monitor if needed.
        self.0
            .monitor
            .lock()
            .unwrap()
            .start(self, session.gnmi.clone(), port_count);

        self.set_state_if(State::Elected, State::PortsDiscovered);
        info!(count = port_count, "ports discovered");
    }

    // Subscribes to every known port's oper-status and feeds transitions
    // into the port map. Exits when the subscription stream breaks; the
    // next enumeration restarts it if the port set changed.
    pub(crate) async fn monitor_port_status(
        &self,
        mut gnmi: GNmiClient<Channel>,
    ) {
        info!("port status monitor started");

        let subscription = self
            .shared()
            .ports
            .keys()
            .map(|name| gnmi::Subscription {
                path: Some(gnmiutils::to_path(&format!(
                    "interfaces/interface[name={name}]/state/oper-status"
                ))),
                ..Default::default()
            })
            .collect();
        let request = gnmi::SubscribeRequest {
            request: Some(gnmi::subscribe_request::Request::Subscribe(
                gnmi::SubscriptionList {
                    subscription,
                    mode: gnmi::subscription_list::Mode::Stream as i32,
                    ..Default::default()
                },
            )),
        };

        let mut stream =
            match gnmi.subscribe(tokio_stream::once(request)).await {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    warn!(error = %status, "unable to subscribe for port state updates");
                    return;
                }
            };

        loop {
            match stream.message().await {
                Ok(Some(response)) => {
                    let Some(gnmi::subscribe_response::Response::Update(
                        notification,
                    )) = response.response
                    else {
                        continue;
                    };
                    debug!(?notification, "got port status update");
                    for update in &notification.update {
                        let Some(path) = &update.path else {
                            continue;
                        };
                        if gnmiutils::last_elem_name(path)
                            != Some("oper-status")
                        {
                            continue;
                        }
                        let Some(name) = gnmiutils::elem_key(path, 1, "name")
                        else {
                            continue;
                        };
                        let Some(status) = update
                            .val
                            .as_ref()
                            .and_then(gnmiutils::string_value)
                        else {
                            continue;
                        };
                        self.process_port_status_update(name, status);
                    }
                }
                Ok(None) => {
                    info!("port status monitor stopped");
                    return;
                }
                Err(status) => {
                    warn!(error = %status, "unable to read port state update");
                    return;
                }
            }
        }
    }

    // An UP to DOWN transition takes the port's ingress link down with
    // it; every other transition only records the new status.
    pub(crate) fn process_port_status_update(
        &self,
        port_name: &str,
        new_status: &str,
    ) {
        let new_status = PortStatus::from_oper_status(new_status);
        let mut shared = self.shared_mut();

        let port = shared
            .ports
            .entry(port_name.to_owned())
            .or_insert_with(|| Port::new(port_name));
        let old_status = port.status;
        let port_number = port.number;
        port.status = new_status;

        if old_status == PortStatus::Up && new_status == PortStatus::Down {
            info!(port = port_number, "port went down, deleting ingress link");
            self.delete_link_locked(&mut shared, port_number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_controller(name: &str) -> Controller {
        let config_file = std::env::temp_dir()
            .join(format!("linkd-ports-test-{name}.yaml"));
        let _ = std::fs::remove_file(&config_file);
        Controller::new("127.0.0.1:28000", "agent-test-uuid", config_file)
    }

    fn add_port(
        controller: &Controller,
        name: &str,
        number: u32,
        status: PortStatus,
    ) {
        controller.shared_mut().ports.insert(
            name.to_owned(),
            Port {
                id: name.to_owned(),
                number,
                status,
                last_change: None,
            },
        );
    }

    #[test]
    fn test_port_down_deletes_link() {
        let controller = test_controller("down");
        add_port(&controller, "swp1", 1, PortStatus::Up);
        controller.update_ingress_link(1, 7, "devA");
        assert_eq!(controller.links().len(), 1);

        controller.process_port_status_update("swp1", "DOWN");
        assert!(controller.links().is_empty());
        assert_eq!(controller.ports()[0].status, PortStatus::Down);

        // The mirrored subtree is gone as well.
        assert!(controller.tree().get_leaves("state/link[port=1]").is_empty());
    }

    #[test]
    fn test_port_up_keeps_link() {
        let controller = test_controller("up");
        add_port(&controller, "swp1", 1, PortStatus::Down);
        controller.update_ingress_link(1, 7, "devA");

        // DOWN -> UP must not touch the link table.
        controller.process_port_status_update("swp1", "UP");
        assert_eq!(controller.links().len(), 1);
        assert_eq!(controller.ports()[0].status, PortStatus::Up);
    }

    #[test]
    fn test_unknown_port_status() {
        let controller = test_controller("unknown");
        add_port(&controller, "swp1", 1, PortStatus::Up);

        controller.process_port_status_update("swp1", "TESTING");
        assert_eq!(controller.ports()[0].status, PortStatus::Unknown);
    }
}
