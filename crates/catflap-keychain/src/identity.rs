use crate::store::{KeychainManager, SecretError};
use base64::Engine;
use ed25519_dalek::Signer;
use getrandom::getrandom;
use rand_core::{TryCryptoRng, TryRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ssh_key::private::{Ed25519Keypair, KeypairData};
use ssh_key::{LineEnding, PrivateKey};
use zeroize::Zeroizing;

/// Keychain entry holding the device keypair as OpenSSH PEM.
const DEVICE_KEY_SECRET: &str = "device:key";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("key error: {0}")]
    Key(#[from] ssh_key::Error),
    #[error("secret store error: {0}")]
    Secret(#[from] SecretError),
    #[error("device key is not ed25519")]
    UnsupportedAlgorithm,
    #[error("no device identity generated")]
    Missing,
}

/// The persistent device keypair. The private half never leaves the
/// keychain except inside this struct; it authenticates the SSH tunnel and
/// signs the gateway device-auth payload.
#[derive(Clone)]
pub struct DeviceIdentity {
    key: PrivateKey,
}

/// Inputs for a signed device-auth payload. `signed_at` is Unix millis.
#[derive(Clone, Debug)]
pub struct DeviceAuthParams {
    pub client_id: String,
    pub client_mode: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub token: String,
    pub nonce: Option<String>,
    pub signed_at: u64,
}

/// Signed device info sent in the connect request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuth {
    pub id: String,
    pub public_key: String,
    pub signature: String,
    pub signed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Canonical payload string the gateway verifies the signature over. Field
/// order and the version tag are a wire contract with the server-side
/// verifier; reordering produces a signature that fails verification.
pub fn device_auth_payload(
    device_id: &str,
    client_id: &str,
    client_mode: &str,
    role: &str,
    scopes: &[String],
    signed_at: u64,
    token: &str,
    nonce: Option<&str>,
) -> String {
    let scopes = scopes.join(",");
    match nonce {
        Some(nonce) => format!(
            "v2|{}|{}|{}|{}|{}|{}|{}|{}",
            device_id, client_id, client_mode, role, scopes, signed_at, token, nonce
        ),
        None => format!(
            "v1|{}|{}|{}|{}|{}|{}|{}",
            device_id, client_id, client_mode, role, scopes, signed_at, token
        ),
    }
}

impl DeviceIdentity {
    pub fn generate() -> Result<Self, IdentityError> {
        let keypair = Ed25519Keypair::random(&mut OsRng);
        let key = PrivateKey::new(KeypairData::from(keypair), "catflap-device")?;
        Ok(Self { key })
    }

    pub fn from_openssh(pem: &str) -> Result<Self, IdentityError> {
        let key = PrivateKey::from_openssh(pem)?;
        if key.key_data().ed25519().is_none() {
            return Err(IdentityError::UnsupportedAlgorithm);
        }
        Ok(Self { key })
    }

    pub fn to_openssh(&self) -> Result<Zeroizing<String>, IdentityError> {
        Ok(self.key.to_openssh(LineEnding::LF)?)
    }

    /// The private key, for SSH public-key authentication.
    pub fn private_key(&self) -> &PrivateKey {
        &self.key
    }

    /// hex(SHA-256(raw 32-byte public key)), lowercase.
    pub fn device_id(&self) -> Result<String, IdentityError> {
        let pair = self.ed25519()?;
        let digest = Sha256::digest(pair.public.0);
        Ok(hex::encode(digest))
    }

    /// Standard OpenSSH authorized_keys line, comment included.
    pub fn public_key_openssh(&self) -> Result<String, IdentityError> {
        Ok(self.key.public_key().to_openssh()?)
    }

    /// Raw 32-byte public key, base64url without padding (gateway handshake
    /// encoding).
    pub fn public_key_base64url(&self) -> Result<String, IdentityError> {
        let pair = self.ed25519()?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(pair.public.0))
    }

    /// Sign the canonical device-auth payload for the connect handshake.
    pub fn sign_device_auth(&self, params: &DeviceAuthParams) -> Result<DeviceAuth, IdentityError> {
        let pair = self.ed25519()?;
        let device_id = self.device_id()?;
        let payload = device_auth_payload(
            &device_id,
            &params.client_id,
            &params.client_mode,
            &params.role,
            &params.scopes,
            params.signed_at,
            &params.token,
            params.nonce.as_deref(),
        );
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&pair.private.to_bytes());
        let signature = signing_key.sign(payload.as_bytes());
        Ok(DeviceAuth {
            id: device_id,
            public_key: self.public_key_base64url()?,
            signature: base64::engine::general_purpose::URL_SAFE_NO_PAD
                .encode(signature.to_bytes()),
            signed_at: params.signed_at,
            nonce: params.nonce.clone(),
        })
    }

    fn ed25519(&self) -> Result<&Ed25519Keypair, IdentityError> {
        self.key
            .key_data()
            .ed25519()
            .ok_or(IdentityError::UnsupportedAlgorithm)
    }
}

/// Persists the device identity through the keychain. `generate` overwrites
/// any previous key; servers that trusted the old public key must be given
/// the new one.
#[derive(Clone, Debug)]
pub struct IdentityStore {
    keychain: KeychainManager,
}

impl IdentityStore {
    pub fn new(keychain: KeychainManager) -> Self {
        Self { keychain }
    }

    pub fn generate(&self, master: Option<&str>) -> Result<DeviceIdentity, IdentityError> {
        let identity = DeviceIdentity::generate()?;
        let pem = identity.to_openssh()?;
        self.keychain.store_secret(DEVICE_KEY_SECRET, &pem, master)?;
        Ok(identity)
    }

    pub fn load(&self, master: Option<&str>) -> Result<Option<DeviceIdentity>, IdentityError> {
        match self.keychain.get_secret(DEVICE_KEY_SECRET, master)? {
            Some(pem) => Ok(Some(DeviceIdentity::from_openssh(&pem)?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, master: Option<&str>) -> Result<DeviceIdentity, IdentityError> {
        self.load(master)?.ok_or(IdentityError::Missing)
    }

    pub fn delete(&self, master: Option<&str>) -> Result<(), IdentityError> {
        self.keychain.delete_secret(DEVICE_KEY_SECRET, master)?;
        Ok(())
    }
}

struct OsRng;

impl TryRng for OsRng {
    type Error = core::convert::Infallible;

    fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
        let mut buf = [0u8; 4];
        self.try_fill_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
        let mut buf = [0u8; 8];
        self.try_fill_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Self::Error> {
        getrandom(dest).expect("getrandom failed");
        Ok(())
    }
}

impl TryCryptoRng for OsRng {}
