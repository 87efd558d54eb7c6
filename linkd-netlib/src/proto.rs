//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod gnmi {
    #![allow(clippy::all)]
    tonic::include_proto!("gnmi");
    pub use g_nmi_client::GNmiClient;
    pub use g_nmi_server::{GNmi, GNmiServer};
}

pub mod p4 {
    pub mod v1 {
        #![allow(clippy::all)]
        tonic::include_proto!("p4.v1");
        pub use p4_runtime_client::P4RuntimeClient;
    }
    pub mod config {
        pub mod v1 {
            #![allow(clippy::all)]
            tonic::include_proto!("p4.config.v1");
        }
    }
}

pub mod stratum {
    #![allow(clippy::all)]
    tonic::include_proto!("stratum");
}

pub mod google {
    pub mod rpc {
        #![allow(clippy::all)]
        tonic::include_proto!("google.rpc");
    }
}
