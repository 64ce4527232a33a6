pub mod config;
pub mod error;
pub mod relay;
pub mod tunnel;

pub use config::TunnelConfig;
pub use error::TunnelError;
pub use relay::run_relay;
pub use tunnel::{SshTunnel, TunnelState};
