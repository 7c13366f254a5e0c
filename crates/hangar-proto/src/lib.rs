// Compiled gRPC contracts of the hangar node agent.

pub mod hangar {
    pub mod agent {
        pub mod v1 {
            tonic::include_proto!("hangar.agent.v1");
        }
    }
}

pub use hangar::agent::v1 as agent_v1;
