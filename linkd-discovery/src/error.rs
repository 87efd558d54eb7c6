//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::warn;

use linkd_netlib::packet::DecodeError;

// Link discovery errors.
#[derive(Debug)]
pub enum Error {
    // Packet input
    PacketDecodeError(DecodeError),
    EgressPortParseError(String, std::num::ParseIntError),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::PacketDecodeError(error) => {
                warn!(%error, "{}", self);
            }
            Error::EgressPortParseError(port_id, error) => {
                warn!(%port_id, %error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet-in payload")
            }
            Error::EgressPortParseError(..) => {
                write!(f, "failed to parse egress port ID")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PacketDecodeError(error) => Some(error),
            Error::EgressPortParseError(_, error) => Some(error),
        }
    }
}
