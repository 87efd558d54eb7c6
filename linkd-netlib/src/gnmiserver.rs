//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Reusable northbound gNMI service over a [`Configurable`] tree.
//!
//! `Get` and `Subscribe` read the tree; `Set` applies writes to it and
//! invokes its change callback. Subscribe streams receive an initial state
//! sync (unless `updates_only` is set), a sync response, and afterwards
//! every notification the tree owner broadcasts.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Server, ServerTlsConfig};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, trace};

use crate::configtree::Configurable;
use crate::gnmiutils;
use crate::proto::gnmi as proto;
use crate::proto::gnmi::{GNmi, GNmiServer};

const GNMI_VERSION: &str = "0.8.0";

// Size of the per-subscriber response buffer.
const RESPONDER_QUEUE_DEPTH: usize = 64;

pub struct GnmiService {
    tree: Arc<Configurable>,
    target: String,
}

/// Northbound server transport configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub tls: Option<TlsPaths>,
}

#[derive(Clone, Debug)]
pub struct TlsPaths {
    pub certificate: String,
    pub key: String,
    // CA bundle used to verify client certificates, if any.
    pub ca: Option<String>,
}

// ===== impl GnmiService =====

impl GnmiService {
    pub fn new(tree: Arc<Configurable>, target: &str) -> GnmiService {
        GnmiService {
            tree,
            target: target.to_owned(),
        }
    }

    fn notification_for(
        &self,
        path: &str,
    ) -> Option<proto::Notification> {
        let leaves = self.tree.get_leaves(path);
        if leaves.is_empty() {
            return None;
        }

        let update = leaves
            .into_iter()
            .map(|(path, val)| proto::Update {
                path: Some(gnmiutils::to_path(&path)),
                val: Some(val),
                duplicates: 0,
            })
            .collect();

        Some(proto::Notification {
            timestamp: gnmiutils::get_timestamp(),
            prefix: Some(proto::Path {
                target: self.target.clone(),
                ..Default::default()
            }),
            update,
            delete: vec![],
            atomic: false,
        })
    }
}

#[tonic::async_trait]
impl GNmi for GnmiService {
    type SubscribeStream =
        ReceiverStream<Result<proto::SubscribeResponse, Status>>;

    async fn capabilities(
        &self,
        grpc_request: Request<proto::CapabilityRequest>,
    ) -> Result<Response<proto::CapabilityResponse>, Status> {
        trace!("received Capabilities() request: {:?}", grpc_request);

        let reply = proto::CapabilityResponse {
            supported_models: vec![],
            supported_encodings: vec![
                proto::Encoding::Proto as i32,
                proto::Encoding::JsonIetf as i32,
            ],
            g_nmi_version: GNMI_VERSION.to_owned(),
        };

        Ok(Response::new(reply))
    }

    async fn get(
        &self,
        grpc_request: Request<proto::GetRequest>,
    ) -> Result<Response<proto::GetResponse>, Status> {
        let grpc_request = grpc_request.into_inner();
        debug!("received Get() request");
        trace!("{:?}", grpc_request);

        let mut notification = vec![];
        for entry in &grpc_request.path {
            let path =
                gnmiutils::join_paths(grpc_request.prefix.as_ref(), entry);
            match self.notification_for(&path) {
                Some(n) => notification.push(n),
                None => {
                    return Err(Status::not_found(format!(
                        "no data at path {path}"
                    )));
                }
            }
        }

        Ok(Response::new(proto::GetResponse { notification }))
    }

    async fn set(
        &self,
        grpc_request: Request<proto::SetRequest>,
    ) -> Result<Response<proto::SetResponse>, Status> {
        let grpc_request = grpc_request.into_inner();
        debug!("received Set() request");
        trace!("{:?}", grpc_request);

        let prefix = grpc_request.prefix.clone();
        let mut changed = vec![];
        let mut response = vec![];

        for entry in &grpc_request.delete {
            let path = gnmiutils::join_paths(prefix.as_ref(), entry);
            self.tree.delete_path(&path);
            changed.push(path);
            response.push(proto::UpdateResult {
                path: Some(entry.clone()),
                op: proto::update_result::Operation::Delete as i32,
            });
        }

        for (entries, op) in [
            (
                &grpc_request.replace,
                proto::update_result::Operation::Replace,
            ),
            (&grpc_request.update, proto::update_result::Operation::Update),
        ] {
            for entry in entries {
                let Some(entry_path) = &entry.path else {
                    return Err(Status::invalid_argument(
                        "update without a path",
                    ));
                };
                let path =
                    gnmiutils::join_paths(prefix.as_ref(), entry_path);
                self.tree.add_path(&path, entry.val.clone());
                changed.push(path);
                response.push(proto::UpdateResult {
                    path: Some(entry_path.clone()),
                    op: op as i32,
                });
            }
        }

        // Let the tree owner react to the configuration change.
        self.tree.config_changed(&changed);

        Ok(Response::new(proto::SetResponse {
            prefix,
            response,
            timestamp: gnmiutils::get_timestamp(),
        }))
    }

    async fn subscribe(
        &self,
        grpc_request: Request<Streaming<proto::SubscribeRequest>>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let mut request_stream = grpc_request.into_inner();
        debug!("received Subscribe() request");

        // The first message must carry the subscription list.
        let first = request_stream.message().await?.ok_or_else(|| {
            Status::invalid_argument("missing subscription request")
        })?;
        let Some(proto::subscribe_request::Request::Subscribe(list)) =
            first.request
        else {
            return Err(Status::invalid_argument(
                "first message must be a subscription list",
            ));
        };
        let mode = proto::subscription_list::Mode::try_from(list.mode)
            .map_err(|_| {
                Status::invalid_argument("invalid subscription mode")
            })?;

        let (responder_tx, responder_rx) =
            mpsc::channel(RESPONDER_QUEUE_DEPTH);

        // Initial state sync, unless the client asked for updates only.
        if !list.updates_only {
            for subscription in &list.subscription {
                let Some(sub_path) = &subscription.path else {
                    continue;
                };
                let path =
                    gnmiutils::join_paths(list.prefix.as_ref(), sub_path);
                if let Some(notification) = self.notification_for(&path) {
                    let response = proto::SubscribeResponse {
                        response: Some(
                            proto::subscribe_response::Response::Update(
                                notification,
                            ),
                        ),
                    };
                    let _ = responder_tx.send(Ok(response)).await;
                }
            }
        }
        let _ = responder_tx
            .send(Ok(proto::SubscribeResponse {
                response: Some(
                    proto::subscribe_response::Response::SyncResponse(true),
                ),
            }))
            .await;

        if mode != proto::subscription_list::Mode::Once {
            // Stream subscribers keep receiving whatever the tree owner
            // broadcasts until they disconnect.
            self.tree.add_responder(responder_tx);

            // Drain the request stream so client disconnects are observed.
            tokio::spawn(async move {
                while let Ok(Some(_)) = request_stream.message().await {}
            });
        }

        Ok(Response::new(ReceiverStream::new(responder_rx)))
    }
}

// ===== global functions =====

/// Starts the northbound gNMI server in the background.
pub fn start(tree: Arc<Configurable>, target: &str, config: ServerConfig) {
    let service = GnmiService::new(tree, target);

    let server = Server::builder();
    let mut server = match &config.tls {
        Some(tls) => {
            let cert = match std::fs::read(&tls.certificate) {
                Ok(value) => value,
                Err(error) => {
                    error!(%error, "failed to read TLS certificate");
                    return;
                }
            };
            let key = match std::fs::read(&tls.key) {
                Ok(value) => value,
                Err(error) => {
                    error!(%error, "failed to read TLS key");
                    return;
                }
            };

            let identity = tonic::transport::Identity::from_pem(cert, key);
            let mut tls_config = ServerTlsConfig::new().identity(identity);
            if let Some(ca) = &tls.ca {
                let ca = match std::fs::read(ca) {
                    Ok(value) => value,
                    Err(error) => {
                        error!(%error, "failed to read TLS CA certificate");
                        return;
                    }
                };
                tls_config = tls_config
                    .client_ca_root(tonic::transport::Certificate::from_pem(
                        ca,
                    ));
            }
            server
                .tls_config(tls_config)
                .expect("Failed to setup gNMI TLS")
        }
        None => server,
    };

    tokio::spawn(async move {
        server
            .add_service(GNmiServer::new(service))
            .serve(config.address)
            .await
            .expect("Failed to start gNMI service");
    });
}
