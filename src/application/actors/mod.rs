pub mod connection_supervisor;

pub use connection_supervisor::{ConnectStatus, ConnectionSupervisor, SupervisorHandle};
