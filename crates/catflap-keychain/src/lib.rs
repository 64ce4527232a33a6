pub mod hosts;
pub mod identity;
pub mod store;

pub use hosts::{HostKeyTrustStore, TrustCheck, TrustError};
pub use identity::{
    device_auth_payload, DeviceAuth, DeviceAuthParams, DeviceIdentity, IdentityError,
    IdentityStore,
};
pub use store::{KeychainManager, SecretError};
