pub mod error;
pub mod events;
pub mod link;
pub mod supervisor;

pub use error::CoreError;
pub use events::{Event, EventBus};
pub use link::{GatewayLink, SshTunnelLink, TunnelLink, TunnelTarget};
pub use supervisor::{
    backoff_delay, ConnectTarget, ConnectionSupervisor, Credentials, LinkStatus,
};
