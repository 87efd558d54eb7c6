//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::{Duration, Instant};

use linkd_netlib::gnmiutils;
use linkd_netlib::proto::gnmi;
use linkd_netlib::proto::gnmi::typed_value::Value;
use tracing::info;

use crate::controller::{Controller, Link, Shared};

// ===== impl Controller =====

impl Controller {
    // Creates or refreshes the adjacency observed on an ingress port.
    //
    // A fresh link (new ingress port, or either egress field changed) is
    // inserted and mirrored as an ADD; an identical observation only
    // advances the freshness stamp.
    pub(crate) fn update_ingress_link(
        &self,
        ingress_port: u32,
        egress_port: u32,
        egress_device_id: &str,
    ) {
        let mut shared = self.shared_mut();

        match shared.links.get_mut(&ingress_port) {
            Some(link)
                if link.egress_port == egress_port
                    && link.egress_device_id == egress_device_id =>
            {
                link.last_update = Instant::now();
                return;
            }
            _ => (),
        }

        info!(
            ingress_port,
            egress_port,
            egress_device = egress_device_id,
            "new ingress link"
        );
        shared.links.insert(
            ingress_port,
            Link {
                ingress_port,
                egress_port,
                egress_device_id: egress_device_id.to_owned(),
                last_update: Instant::now(),
            },
        );
        self.add_link_to_tree(ingress_port, egress_port, egress_device_id);
    }

    // Drops every link whose freshness stamp fell behind the maximum
    // link age. Runs on the prune ticker.
    pub(crate) fn prune_links(&self) {
        let mut shared = self.shared_mut();
        let max_age = Duration::from_secs(shared.config.max_link_age);
        let now = Instant::now();

        let expired: Vec<u32> = shared
            .links
            .values()
            .filter(|link| now.duration_since(link.last_update) > max_age)
            .map(|link| link.ingress_port)
            .collect();
        for ingress_port in expired {
            info!(ingress_port, "pruning expired ingress link");
            shared.links.remove(&ingress_port);
            self.remove_link_from_tree(ingress_port);
        }
    }

    // Removes the link on the given ingress port, if any. The caller
    // already holds the shared write lock, keeping the map and its
    // mirror in lockstep with port status updates.
    pub(crate) fn delete_link_locked(
        &self,
        shared: &mut Shared,
        ingress_port: u32,
    ) {
        if shared.links.remove(&ingress_port).is_some() {
            self.remove_link_from_tree(ingress_port);
        }
    }

    // Mirrors a link into the tree and broadcasts the ADD northbound.
    fn add_link_to_tree(
        &self,
        ingress_port: u32,
        egress_port: u32,
        egress_device_id: &str,
    ) {
        let port_path = format!("state/link[port={ingress_port}]/egress-port");
        let port_val = gnmi::TypedValue {
            value: Some(Value::IntVal(egress_port as i64)),
        };
        let device_path =
            format!("state/link[port={ingress_port}]/egress-device");
        let device_val = gnmi::TypedValue {
            value: Some(Value::StringVal(egress_device_id.to_owned())),
        };

        let tree = self.tree();
        tree.add_path(&port_path, Some(port_val.clone()));
        tree.add_path(&device_path, Some(device_val.clone()));

        // Forward the add notification to any subscribe responders.
        tree.send_to_all_responders(gnmi::SubscribeResponse {
            response: Some(gnmi::subscribe_response::Response::Update(
                gnmi::Notification {
                    timestamp: gnmiutils::get_timestamp(),
                    update: vec![
                        gnmi::Update {
                            path: Some(gnmiutils::to_path(&port_path)),
                            val: Some(port_val),
                            duplicates: 0,
                        },
                        gnmi::Update {
                            path: Some(gnmiutils::to_path(&device_path)),
                            val: Some(device_val),
                            duplicates: 0,
                        },
                    ],
                    ..Default::default()
                },
            )),
        });
    }

    // Deletes a link's subtree and broadcasts the DELETE northbound.
    fn remove_link_from_tree(&self, ingress_port: u32) {
        let path = format!("state/link[port={ingress_port}]");
        let tree = self.tree();
        tree.delete_path(&path);

        // Forward the delete notification to any subscribe responders.
        tree.send_to_all_responders(gnmi::SubscribeResponse {
            response: Some(gnmi::subscribe_response::Response::Update(
                gnmi::Notification {
                    timestamp: gnmiutils::get_timestamp(),
                    delete: vec![gnmiutils::to_path(&path)],
                    ..Default::default()
                },
            )),
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use linkd_netlib::proto::gnmi::subscribe_response::Response;

    use super::*;
    use crate::controller::State;

    fn test_controller(name: &str) -> Controller {
        let config_file =
            std::env::temp_dir().join(format!("linkd-links-test-{name}.yaml"));
        let _ = std::fs::remove_file(&config_file);
        Controller::new("127.0.0.1:28000", "agent-test-uuid", config_file)
    }

    fn age_link(controller: &Controller, ingress_port: u32, age: Duration) {
        let mut shared = controller.shared_mut();
        let link = shared.links.get_mut(&ingress_port).unwrap();
        link.last_update = Instant::now() - age;
    }

    #[test]
    fn test_update_mirrors_into_tree() {
        let controller = test_controller("mirror");
        controller.update_ingress_link(1, 7, "devA");

        let links = controller.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].ingress_port, 1);
        assert_eq!(links[0].egress_port, 7);
        assert_eq!(links[0].egress_device_id, "devA");

        let tree = controller.tree();
        let val = tree.get_value("state/link[port=1]/egress-port").unwrap();
        assert_eq!(gnmiutils::int_value(&val), Some(7));
        let val = tree.get_value("state/link[port=1]/egress-device").unwrap();
        assert_eq!(gnmiutils::string_value(&val), Some("devA"));
    }

    #[test]
    fn test_identical_update_only_refreshes() {
        let controller = test_controller("refresh");
        let (tx, mut rx) = mpsc::channel(16);
        controller.tree().add_responder(tx);

        controller.update_ingress_link(1, 7, "devA");
        let before = controller.links()[0].last_update;

        // The first observation produces exactly one ADD notification.
        let response = rx.try_recv().unwrap().unwrap();
        let Some(Response::Update(notification)) = response.response else {
            panic!("expected update notification");
        };
        assert_eq!(notification.update.len(), 2);

        // An identical observation only advances the freshness stamp.
        controller.update_ingress_link(1, 7, "devA");
        assert!(rx.try_recv().is_err());
        assert_eq!(controller.links().len(), 1);
        assert!(controller.links()[0].last_update >= before);
    }

    #[test]
    fn test_changed_egress_replaces_link() {
        let controller = test_controller("replace");
        controller.update_ingress_link(1, 7, "devA");
        controller.update_ingress_link(1, 9, "devA");

        let links = controller.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].egress_port, 9);

        let tree = controller.tree();
        let val = tree.get_value("state/link[port=1]/egress-port").unwrap();
        assert_eq!(gnmiutils::int_value(&val), Some(9));
    }

    #[test]
    fn test_one_link_per_ingress_port() {
        let controller = test_controller("per-port");
        controller.update_ingress_link(1, 7, "devA");
        controller.update_ingress_link(2, 3, "devB");
        controller.update_ingress_link(1, 8, "devC");

        let links = controller.links();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].ingress_port, 1);
        assert_eq!(links[1].ingress_port, 2);
    }

    #[test]
    fn test_prune_expired_links() {
        let controller = test_controller("prune");
        let (tx, mut rx) = mpsc::channel(16);
        controller.tree().add_responder(tx);

        controller.update_ingress_link(1, 7, "devA");
        controller.update_ingress_link(2, 3, "devB");
        let _ = rx.try_recv();
        let _ = rx.try_recv();

        // Age only one of the two links past the maximum link age.
        age_link(&controller, 2, Duration::from_secs(60));
        controller.prune_links();

        let links = controller.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].ingress_port, 1);
        assert!(
            controller.tree().get_leaves("state/link[port=2]").is_empty()
        );

        // Exactly one DELETE notification went out.
        let response = rx.try_recv().unwrap().unwrap();
        let Some(Response::Update(notification)) = response.response else {
            panic!("expected delete notification");
        };
        assert_eq!(notification.delete.len(), 1);
        assert_eq!(
            notification.delete[0].to_string(),
            "state/link[port=2]"
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fresh_links_survive_prune() {
        let controller = test_controller("fresh");
        controller.update_ingress_link(1, 7, "devA");
        controller.prune_links();
        assert_eq!(controller.links().len(), 1);
    }

    #[test]
    fn test_reconfigured_is_one_shot() {
        let controller = test_controller("one-shot");
        for state in [
            State::Connected,
            State::PipelineAvailable,
            State::Elected,
            State::PortsDiscovered,
            State::Configured,
        ] {
            controller.set_state(state);
        }
        assert!(
            controller.set_state_if(State::Configured, State::Reconfigured)
        );
        assert!(
            controller.set_state_if(State::Reconfigured, State::Configured)
        );
        assert_eq!(controller.state(), State::Configured);
    }
}
