pub mod client;
pub mod error;
pub mod frame;
pub mod transport;
pub mod url;

pub use client::GatewayClient;
pub use error::{ConnectKind, TransportError};
pub use frame::{
    ClientInfo, ConnectAuth, ConnectParams, ErrorBody, EventFrame, Frame, RequestFrame,
    ResponseFrame, CONNECT_CHALLENGE_EVENT,
};
pub use transport::{ConnectOptions, FrameTransport, TransportState};
pub use url::normalize_gateway_url;
