//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use linkd_netlib::p4utils::{
    self, PacketMetadataCodec, PacketOutMetadata,
};
use linkd_netlib::packet::{DecodeError, ETHERTYPE_LLDP, LldpFrame};
use linkd_netlib::proto::gnmi::GNmiClient;
use linkd_netlib::proto::p4::config::v1 as p4info;
use linkd_netlib::proto::p4::v1 as p4;
use linkd_netlib::proto::p4::v1::P4RuntimeClient;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::controller::{Controller, State};
use crate::error::Error;
use crate::tasks::Task;

// Name under which mastership for the LLDP intercept is arbitrated, and
// the agent id value carried in the packet-in filter and punt action.
const ROLE_NAME: &str = "link_local_agent";
const ROLE_AGENT_ID: &[u8] = &[0x03];

const ACL_TABLE: &str = "FabricIngress.acl.acl";
const PUNT_ACTION: &str = "FabricIngress.acl.punt_to_cpu";
const ETH_TYPE_FIELD: &str = "eth_type";
const ROLE_AGENT_ID_PARAM: &str = "set_role_agent_id";

const CONNECTION_RETRY_PAUSE: Duration = Duration::from_secs(5);
const PIPELINE_FETCH_RETRY_PAUSE: Duration = Duration::from_secs(5);
const MASTERSHIP_ARBITRATION_RETRY_PAUSE: Duration = Duration::from_secs(5);

// Outbound stream message buffer.
const STREAM_QUEUE_DEPTH: usize = 64;

/// Context of one southbound device connection.
///
/// Everything derived from the connection lives here so that dropping the
/// session aborts all in-flight RPCs and invalidates the pipeline binding
/// in one go.
pub(crate) struct Session {
    pub(crate) p4: P4RuntimeClient<Channel>,
    pub(crate) gnmi: GNmiClient<Channel>,
    // Device id reported by the winning mastership arbitration.
    pub(crate) device_id: u64,
    // Pipeline binding.
    pub(crate) cookie: u64,
    pub(crate) p4info: p4info::P4Info,
    pub(crate) codec: PacketMetadataCodec,
    pub(crate) role: Option<p4::Role>,
    pub(crate) election_id: p4::Uint128,
    // Stream channel halves. The receive half is handed over to the
    // receive task once the controller is configured.
    pub(crate) stream_tx: Option<mpsc::Sender<p4::StreamMessageRequest>>,
    pub(crate) stream_rx: Option<Streaming<p4::StreamMessageResponse>>,
}

// ===== impl Session =====

impl Session {
    fn new(channel: Channel) -> Session {
        Session {
            p4: P4RuntimeClient::new(channel.clone()),
            gnmi: GNmiClient::new(channel),
            device_id: 0,
            cookie: 0,
            p4info: p4info::P4Info::default(),
            codec: PacketMetadataCodec::default(),
            role: None,
            election_id: p4::Uint128::default(),
            stream_tx: None,
            stream_rx: None,
        }
    }
}

// ===== impl Controller =====

impl Controller {
    // Dials the device until a connection is established or the state
    // leaves `Disconnected`.
    pub(crate) async fn wait_for_device_connection(&self) -> Option<Session> {
        info!(target = %self.target_address(), "connecting to device");
        let mut state_rx = self.state_rx();
        while self.state() == State::Disconnected {
            let result = tokio::select! {
                result = connect(self.target_address()) => result,
                _ = state_rx.changed() => continue,
            };
            match result {
                Ok(channel) => {
                    self.set_state_if(State::Disconnected, State::Connected);
                    info!("connected");
                    return Some(Session::new(channel));
                }
                Err(error) => {
                    warn!(%error, "unable to connect to device");
                    self.pause_if(State::Disconnected, CONNECTION_RETRY_PAUSE)
                        .await;
                }
            }
        }
        None
    }

    // Fetches the installed pipeline and derives the role and metadata
    // codec from it. A zero cookie means no pipeline is installed yet, in
    // which case the fetch is retried until the state leaves `Connected`.
    pub(crate) async fn wait_for_pipeline_configuration(
        &self,
        session: &mut Session,
    ) {
        info!("retrieving pipeline configuration");
        while self.state() == State::Connected {
            let request = p4::GetForwardingPipelineConfigRequest {
                device_id: session.device_id,
                response_type:
                    p4::get_forwarding_pipeline_config_request::ResponseType::P4infoAndCookie
                        as i32,
            };
            match session.p4.get_forwarding_pipeline_config(request).await {
                Ok(response) => {
                    let config =
                        response.into_inner().config.unwrap_or_default();
                    let cookie =
                        config.cookie.map(|c| c.cookie).unwrap_or(0);
                    if cookie != 0 {
                        let p4info = config.p4info.unwrap_or_default();
                        let codec = PacketMetadataCodec::new(&p4info);
                        let role = p4utils::new_role(
                            ROLE_NAME,
                            codec.role_agent_id_metadata_id(),
                            ROLE_AGENT_ID,
                            true,
                            false,
                        );
                        session.cookie = cookie;
                        session.p4info = p4info;
                        session.codec = codec;
                        session.role = Some(role);
                        self.set_state_if(
                            State::Connected,
                            State::PipelineAvailable,
                        );
                        info!(
                            cookie = %format!("{cookie:#x}"),
                            "pipeline configuration obtained"
                        );
                    } else {
                        warn!(
                            "pipeline configuration not set yet on the device"
                        );
                    }
                }
                Err(status) => {
                    warn!(error = %status, "unable to retrieve pipeline configuration");
                }
            }
            self.pause_if(State::Connected, PIPELINE_FETCH_RETRY_PAUSE)
                .await;
        }
    }

    // Compares the device's pipeline cookie against the bound one; a
    // mismatch unwinds to `Connected` so the pipeline is re-fetched, the
    // intercept rule re-installed and the tickers rebuilt.
    pub(crate) async fn validate_pipeline_configuration(
        &self,
        session: &mut Session,
    ) {
        debug!("validating pipeline configuration");
        let request = p4::GetForwardingPipelineConfigRequest {
            device_id: session.device_id,
            response_type:
                p4::get_forwarding_pipeline_config_request::ResponseType::CookieOnly
                    as i32,
        };
        match session.p4.get_forwarding_pipeline_config(request).await {
            Ok(response) => {
                let cookie = response
                    .into_inner()
                    .config
                    .and_then(|config| config.cookie)
                    .map(|cookie| cookie.cookie)
                    .unwrap_or(0);
                if cookie != session.cookie {
                    info!("pipeline configuration changed");
                    self.set_state_if(State::Configured, State::Connected);
                }
            }
            Err(status) => {
                warn!(error = %status, "unable to validate pipeline configuration");
            }
        }
    }

    // Opens a stream channel and arbitrates mastership for the link-agent
    // role, retrying with a fresh election id until the device confirms us
    // as primary or the state leaves `PipelineAvailable`.
    pub(crate) async fn wait_for_mastership_arbitration(
        &self,
        session: &mut Session,
    ) {
        info!("running mastership arbitration");
        let Some(role) = session.role.clone() else {
            // Pipeline binding went missing; refetch it.
            self.set_state_if(State::PipelineAvailable, State::Connected);
            return;
        };

        while self.state() == State::PipelineAvailable {
            let (stream_tx, outbound) =
                mpsc::channel::<p4::StreamMessageRequest>(STREAM_QUEUE_DEPTH);
            match session
                .p4
                .stream_channel(ReceiverStream::new(outbound))
                .await
            {
                Ok(response) => {
                    let mut stream = response.into_inner();
                    if self
                        .arbitrate(session, &role, &stream_tx, &mut stream)
                        .await
                    {
                        session.stream_tx = Some(stream_tx);
                        session.stream_rx = Some(stream);
                        return;
                    }
                }
                Err(status) => {
                    warn!(error = %status, "unable to open stream channel");
                }
            }
            self.pause_if(
                State::PipelineAvailable,
                MASTERSHIP_ARBITRATION_RETRY_PAUSE,
            )
            .await;
        }
    }

    // One stream channel's worth of arbitration attempts. Returns true
    // once mastership is confirmed; false means the stream broke and a
    // fresh one is needed.
    async fn arbitrate(
        &self,
        session: &mut Session,
        role: &p4::Role,
        stream_tx: &mpsc::Sender<p4::StreamMessageRequest>,
        stream: &mut Streaming<p4::StreamMessageResponse>,
    ) -> bool {
        let mut state_rx = self.state_rx();
        while self.state() == State::PipelineAvailable {
            let election_id = p4utils::time_based_election_id();
            let request =
                p4utils::mastership_arbitration(&election_id, role);
            if stream_tx.send(request).await.is_err() {
                warn!("stream channel closed");
                return false;
            }

            // Wait for the arbitration verdict. The device stays quiet
            // until it has one, so the read races the state cell.
            loop {
                if self.state() != State::PipelineAvailable {
                    return false;
                }
                let message = tokio::select! {
                    message = stream.message() => message,
                    _ = state_rx.changed() => continue,
                };
                match message {
                    Ok(Some(msg)) => {
                        let Some(
                            p4::stream_message_response::Update::Arbitration(
                                arbitration,
                            ),
                        ) = msg.update
                        else {
                            warn!("ignoring non-arbitration stream message");
                            continue;
                        };
                        if arbitration.election_id
                            == Some(election_id.clone())
                        {
                            session.device_id = arbitration.device_id;
                            session.election_id = election_id;
                            self.set_state_if(
                                State::PipelineAvailable,
                                State::Elected,
                            );
                            info!(role = ROLE_NAME, "obtained mastership");
                            return true;
                        }
                        warn!(
                            "mastership not granted, retrying with a fresh election id"
                        );
                        break;
                    }
                    Ok(None) => {
                        warn!("stream channel closed");
                        return false;
                    }
                    Err(status) => {
                        warn!(error = %status, "unable to receive stream response");
                        return false;
                    }
                }
            }

            self.pause_if(
                State::PipelineAvailable,
                MASTERSHIP_ARBITRATION_RETRY_PAUSE,
            )
            .await;
        }
        false
    }

    // Installs the ACL rule that punts LLDP frames to this agent's role.
    pub(crate) async fn program_packet_intercept_rule(
        &self,
        session: &mut Session,
    ) {
        let Some(table) = p4utils::find_table(&session.p4info, ACL_TABLE)
        else {
            warn!(table = ACL_TABLE, "unable to find ACL table");
            return;
        };
        let Some(action) = p4utils::find_action(&session.p4info, PUNT_ACTION)
        else {
            warn!(action = PUNT_ACTION, "unable to find punt action");
            return;
        };
        let Some(field) =
            p4utils::find_table_match_field(table, ETH_TYPE_FIELD)
        else {
            warn!(field = ETH_TYPE_FIELD, "unable to find match field");
            return;
        };
        let Some(param) =
            p4utils::find_action_param(action, ROLE_AGENT_ID_PARAM)
        else {
            warn!(param = ROLE_AGENT_ID_PARAM, "unable to find action param");
            return;
        };
        let (Some(table_id), Some(action_id)) = (
            table.preamble.as_ref().map(|preamble| preamble.id),
            action.preamble.as_ref().map(|preamble| preamble.id),
        ) else {
            warn!("P4Info entries are missing preambles");
            return;
        };

        let entry = p4::TableEntry {
            table_id,
            r#match: vec![p4::FieldMatch {
                field_id: field.id,
                field_match_type: Some(
                    p4::field_match::FieldMatchType::Ternary(
                        p4::field_match::Ternary {
                            value: ETHERTYPE_LLDP.to_be_bytes().to_vec(),
                            mask: vec![0xff, 0xff],
                        },
                    ),
                ),
            }],
            action: Some(p4::TableAction {
                r#type: Some(p4::table_action::Type::Action(p4::Action {
                    action_id,
                    params: vec![p4::action::Param {
                        param_id: param.id,
                        value: ROLE_AGENT_ID.to_vec(),
                    }],
                })),
            }),
            priority: 0,
        };
        let request = p4::WriteRequest {
            device_id: session.device_id,
            election_id: Some(session.election_id.clone()),
            updates: vec![p4::Update {
                r#type: p4::update::Type::Insert as i32,
                entity: Some(p4::Entity {
                    entity: Some(p4::entity::Entity::TableEntry(entry)),
                }),
            }],
            role: ROLE_NAME.to_owned(),
        };

        match session.p4.write(request).await {
            Ok(_) => info!("LLDP intercept rule installed"),
            Err(status) => {
                warn!(error = %status, "unable to install LLDP intercept rule");
            }
        }
    }

    // Sends one LLDP frame out of every known port. Send failures are
    // logged and skipped; the stream reader notices broken streams.
    pub(crate) async fn emit_lldp_packets(&self, session: &mut Session) {
        debug!("emitting LLDP packets");
        let Some(stream_tx) = &session.stream_tx else {
            return;
        };

        let ports: Vec<_> = self
            .shared()
            .ports
            .values()
            .map(|port| port.number)
            .collect();
        for port_number in ports {
            let frame =
                LldpFrame::new(self.agent_id(), &port_number.to_string());
            let request = p4::StreamMessageRequest {
                update: Some(p4::stream_message_request::Update::Packet(
                    p4::PacketOut {
                        payload: frame.encode().to_vec(),
                        metadata: session.codec.encode_packet_out_metadata(
                            &PacketOutMetadata {
                                egress_port: port_number,
                            },
                        ),
                    },
                )),
            };
            if stream_tx.send(request).await.is_err() {
                warn!(
                    port = port_number,
                    "unable to emit LLDP packet-out, stream closed"
                );
            }
        }
        debug!("LLDP packets emitted");
    }

    // Spawns the stream reader task. It feeds intercepted LLDP frames
    // into the link table, watches for mastership demotion, and unwinds
    // to `Disconnected` when the stream breaks.
    pub(crate) fn spawn_receive_loop(
        &self,
        session: &mut Session,
    ) -> Option<Task<()>> {
        let mut stream = session.stream_rx.take()?;
        let codec = session.codec.clone();
        let election_id = session.election_id.clone();
        let controller = self.clone();

        Some(Task::spawn(async move {
            info!("monitoring message stream");
            loop {
                match stream.message().await {
                    Ok(Some(msg)) => match msg.update {
                        Some(p4::stream_message_response::Update::Packet(
                            packet_in,
                        )) => {
                            if let Err(error) =
                                controller.process_packet(&codec, &packet_in)
                            {
                                error.log();
                            }
                        }
                        Some(
                            p4::stream_message_response::Update::Arbitration(
                                arbitration,
                            ),
                        ) => {
                            if arbitration.election_id
                                != Some(election_id.clone())
                            {
                                warn!("mastership lost, re-arbitrating");
                                controller.set_state_if(
                                    State::Configured,
                                    State::PipelineAvailable,
                                );
                                controller.set_state_if(
                                    State::Reconfigured,
                                    State::PipelineAvailable,
                                );
                            }
                        }
                        None => (),
                    },
                    Ok(None) => {
                        warn!("message stream closed");
                        controller.handle_stream_failure();
                        return;
                    }
                    Err(status) => {
                        warn!(error = %status, "unable to read stream response");
                        controller.handle_stream_failure();
                        return;
                    }
                }

                let state = controller.state();
                if state != State::Configured && state != State::Reconfigured
                {
                    return;
                }
            }
        }))
    }

    // Parses an intercepted frame and updates the link table if it is a
    // well-formed LLDP frame addressed to us.
    fn process_packet(
        &self,
        codec: &PacketMetadataCodec,
        packet_in: &p4::PacketIn,
    ) -> Result<(), Error> {
        let frame = match LldpFrame::decode(&packet_in.payload) {
            Ok(frame) => frame,
            // Frames of other protocols are not ours to report on.
            Err(DecodeError::NotLldp(_)) => return Ok(()),
            Err(error) => return Err(Error::PacketDecodeError(error)),
        };

        let metadata = codec.decode_packet_in_metadata(&packet_in.metadata);
        let egress_port = frame.port_id.parse::<u32>().map_err(|error| {
            Error::EgressPortParseError(frame.port_id.clone(), error)
        })?;
        self.update_ingress_link(
            metadata.ingress_port,
            egress_port,
            &frame.chassis_id,
        );
        Ok(())
    }

    // A broken stream while configured means the whole session is gone.
    fn handle_stream_failure(&self) {
        self.set_state_if(State::Configured, State::Disconnected);
        self.set_state_if(State::Reconfigured, State::Disconnected);
    }
}

// ===== helper functions =====

async fn connect(
    target_address: &str,
) -> Result<Channel, tonic::transport::Error> {
    Endpoint::from_shared(format!("http://{target_address}"))?
        .connect()
        .await
}
