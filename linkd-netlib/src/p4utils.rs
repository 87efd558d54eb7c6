//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! P4Runtime helpers: election IDs, role construction, P4Info lookups and
//! the packet-in/out controller metadata codec.

use std::time::SystemTime;

use prost::Message;

use crate::proto::p4::config::v1 as p4info;
use crate::proto::p4::v1 as p4;
use crate::proto::stratum;

const PACKET_IN_PREAMBLE: &str = "packet_in";
const PACKET_OUT_PREAMBLE: &str = "packet_out";
const INGRESS_PORT_METADATA: &str = "ingress_port";
const EGRESS_PORT_METADATA: &str = "egress_port";
const ROLE_AGENT_ID_METADATA: &str = "role_agent_id";

const ROLE_CONFIG_TYPE_URL: &str =
    "type.googleapis.com/stratum.P4RoleConfig";

/// Returns an election ID derived from the wall clock: `high` carries the
/// seconds since the epoch and `low` the remaining nanoseconds, making IDs
/// strictly monotonic per agent within a second.
pub fn time_based_election_id() -> p4::Uint128 {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System time before UNIX EPOCH!");
    p4::Uint128 {
        high: now.as_secs(),
        low: now.subsec_nanos() as u64,
    }
}

/// Builds a role carrying a packed stratum `P4RoleConfig` that filters
/// packet-ins on the given metadata field and value.
pub fn new_role(
    name: &str,
    packet_in_filter_metadata_id: u32,
    role_agent_id: &[u8],
    receives_packet_ins: bool,
    can_push_pipeline: bool,
) -> p4::Role {
    let config = stratum::P4RoleConfig {
        packet_in_filter: Some(stratum::p4_role_config::PacketFilter {
            metadata_id: packet_in_filter_metadata_id,
            value: role_agent_id.to_vec(),
        }),
        receives_packet_ins,
        can_push_pipeline,
    };

    p4::Role {
        id: 0,
        config: Some(prost_types::Any {
            type_url: ROLE_CONFIG_TYPE_URL.to_owned(),
            value: config.encode_to_vec(),
        }),
        name: name.to_owned(),
    }
}

/// Builds the stream message that requests mastership for the given role
/// under the given election ID.
pub fn mastership_arbitration(
    election_id: &p4::Uint128,
    role: &p4::Role,
) -> p4::StreamMessageRequest {
    p4::StreamMessageRequest {
        update: Some(p4::stream_message_request::Update::Arbitration(
            p4::MasterArbitrationUpdate {
                device_id: 0,
                role: Some(role.clone()),
                election_id: Some(election_id.clone()),
                status: None,
            },
        )),
    }
}

/// Finds a table by fully qualified name.
pub fn find_table<'a>(
    info: &'a p4info::P4Info,
    name: &str,
) -> Option<&'a p4info::Table> {
    info.tables.iter().find(|table| {
        table
            .preamble
            .as_ref()
            .is_some_and(|preamble| preamble.name == name)
    })
}

/// Finds an action by fully qualified name.
pub fn find_action<'a>(
    info: &'a p4info::P4Info,
    name: &str,
) -> Option<&'a p4info::Action> {
    info.actions.iter().find(|action| {
        action
            .preamble
            .as_ref()
            .is_some_and(|preamble| preamble.name == name)
    })
}

/// Finds a match field of the given table by name.
pub fn find_table_match_field<'a>(
    table: &'a p4info::Table,
    name: &str,
) -> Option<&'a p4info::MatchField> {
    table.match_fields.iter().find(|field| field.name == name)
}

/// Finds a parameter of the given action by name.
pub fn find_action_param<'a>(
    action: &'a p4info::Action,
    name: &str,
) -> Option<&'a p4info::action::Param> {
    action.params.iter().find(|param| param.name == name)
}

/// Decoded packet-in controller metadata.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketInMetadata {
    pub ingress_port: u32,
    pub role_agent_id: u64,
}

/// Packet-out controller metadata to be encoded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketOutMetadata {
    pub egress_port: u32,
}

/// Encodes and decodes packet-in/out controller metadata using the field
/// ids and bitwidths advertised by the pipeline's P4Info.
#[derive(Clone, Debug, Default)]
pub struct PacketMetadataCodec {
    ingress_port_id: u32,
    role_agent_id_id: u32,
    egress_port_id: u32,
    egress_port_bitwidth: i32,
}

// ===== impl PacketMetadataCodec =====

impl PacketMetadataCodec {
    pub fn new(info: &p4info::P4Info) -> PacketMetadataCodec {
        let mut codec = PacketMetadataCodec::default();

        for cpm in &info.controller_packet_metadata {
            let Some(preamble) = &cpm.preamble else {
                continue;
            };
            match preamble.name.as_str() {
                PACKET_IN_PREAMBLE => {
                    for metadata in &cpm.metadata {
                        match metadata.name.as_str() {
                            INGRESS_PORT_METADATA => {
                                codec.ingress_port_id = metadata.id;
                            }
                            ROLE_AGENT_ID_METADATA => {
                                codec.role_agent_id_id = metadata.id;
                            }
                            _ => (),
                        }
                    }
                }
                PACKET_OUT_PREAMBLE => {
                    for metadata in &cpm.metadata {
                        if metadata.name == EGRESS_PORT_METADATA {
                            codec.egress_port_id = metadata.id;
                            codec.egress_port_bitwidth = metadata.bitwidth;
                        }
                    }
                }
                _ => (),
            }
        }

        codec
    }

    /// Metadata id of the packet-in role agent id field, used as the
    /// per-role packet-in filter.
    pub fn role_agent_id_metadata_id(&self) -> u32 {
        self.role_agent_id_id
    }

    /// Decodes packet-in metadata into its structured form. Unknown
    /// metadata fields are ignored.
    pub fn decode_packet_in_metadata(
        &self,
        metadata: &[p4::PacketMetadata],
    ) -> PacketInMetadata {
        let mut decoded = PacketInMetadata::default();
        for entry in metadata {
            if entry.metadata_id == self.ingress_port_id {
                decoded.ingress_port = decode_u32(&entry.value);
            } else if entry.metadata_id == self.role_agent_id_id {
                decoded.role_agent_id = decode_u64(&entry.value);
            }
        }
        decoded
    }

    /// Encodes packet-out metadata using the P4Info-advertised bitwidths.
    pub fn encode_packet_out_metadata(
        &self,
        metadata: &PacketOutMetadata,
    ) -> Vec<p4::PacketMetadata> {
        vec![p4::PacketMetadata {
            metadata_id: self.egress_port_id,
            value: encode_u32(metadata.egress_port, self.egress_port_bitwidth),
        }]
    }
}

// ===== helper functions =====

// Encodes a value as the minimal big-endian byte string for the given
// bitwidth (full four bytes when the bitwidth is unknown).
fn encode_u32(value: u32, bitwidth: i32) -> Vec<u8> {
    let width = match bitwidth {
        1..=32 => (bitwidth as usize).div_ceil(8),
        _ => 4,
    };
    value.to_be_bytes()[4 - width..].to_vec()
}

fn decode_u32(value: &[u8]) -> u32 {
    value
        .iter()
        .fold(0u32, |acc, byte| (acc << 8) | *byte as u32)
}

fn decode_u64(value: &[u8]) -> u64 {
    value
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | *byte as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_p4info() -> p4info::P4Info {
        p4info::P4Info {
            controller_packet_metadata: vec![
                p4info::ControllerPacketMetadata {
                    preamble: Some(p4info::Preamble {
                        id: 1,
                        name: "packet_in".to_owned(),
                        alias: "packet_in".to_owned(),
                    }),
                    metadata: vec![
                        p4info::controller_packet_metadata::Metadata {
                            id: 1,
                            name: "ingress_port".to_owned(),
                            bitwidth: 9,
                        },
                        p4info::controller_packet_metadata::Metadata {
                            id: 2,
                            name: "role_agent_id".to_owned(),
                            bitwidth: 32,
                        },
                    ],
                },
                p4info::ControllerPacketMetadata {
                    preamble: Some(p4info::Preamble {
                        id: 2,
                        name: "packet_out".to_owned(),
                        alias: "packet_out".to_owned(),
                    }),
                    metadata: vec![
                        p4info::controller_packet_metadata::Metadata {
                            id: 1,
                            name: "egress_port".to_owned(),
                            bitwidth: 9,
                        },
                    ],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_election_id_monotonic() {
        let a = time_based_election_id();
        let b = time_based_election_id();
        assert!((b.high, b.low) >= (a.high, a.low));
    }

    #[test]
    fn test_metadata_codec() {
        let codec = PacketMetadataCodec::new(&test_p4info());
        assert_eq!(codec.role_agent_id_metadata_id(), 2);

        let encoded = codec
            .encode_packet_out_metadata(&PacketOutMetadata { egress_port: 7 });
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0].metadata_id, 1);
        // 9-bit field encodes as two bytes.
        assert_eq!(encoded[0].value, vec![0, 7]);

        let decoded = codec.decode_packet_in_metadata(&[
            p4::PacketMetadata {
                metadata_id: 1,
                value: vec![0, 42],
            },
            p4::PacketMetadata {
                metadata_id: 2,
                value: vec![3],
            },
        ]);
        assert_eq!(decoded.ingress_port, 42);
        assert_eq!(decoded.role_agent_id, 3);
    }

    #[test]
    fn test_find_helpers() {
        let info = p4info::P4Info {
            tables: vec![p4info::Table {
                preamble: Some(p4info::Preamble {
                    id: 100,
                    name: "FabricIngress.acl.acl".to_owned(),
                    alias: "acl".to_owned(),
                }),
                match_fields: vec![p4info::MatchField {
                    id: 4,
                    name: "eth_type".to_owned(),
                    bitwidth: 16,
                    match_type: p4info::match_field::MatchType::Ternary
                        as i32,
                }],
                action_refs: vec![],
            }],
            actions: vec![p4info::Action {
                preamble: Some(p4info::Preamble {
                    id: 200,
                    name: "FabricIngress.acl.punt_to_cpu".to_owned(),
                    alias: "punt_to_cpu".to_owned(),
                }),
                params: vec![p4info::action::Param {
                    id: 1,
                    name: "set_role_agent_id".to_owned(),
                    bitwidth: 32,
                }],
            }],
            ..Default::default()
        };

        let table = find_table(&info, "FabricIngress.acl.acl").unwrap();
        assert!(find_table_match_field(table, "eth_type").is_some());
        assert!(find_table(&info, "FabricIngress.acl.nope").is_none());

        let action =
            find_action(&info, "FabricIngress.acl.punt_to_cpu").unwrap();
        assert!(find_action_param(action, "set_role_agent_id").is_some());
    }
}
