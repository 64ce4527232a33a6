use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("trust store corrupted: {0}")]
    Parse(String),
    #[error("host key mismatch for {0}")]
    HostKeyMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustCheck {
    Match,
    Mismatch,
    Unknown,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct TrustFile {
    hosts: BTreeMap<String, String>,
}

/// Trust-on-first-use pin store: hostname to hex SHA-256 fingerprint of the
/// server's public key wire encoding. A pinned host presenting a different
/// fingerprint is an error, never an overwrite.
#[derive(Debug, Clone)]
pub struct HostKeyTrustStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl HostKeyTrustStore {
    pub fn load(path: PathBuf) -> Result<Self, TrustError> {
        let entries = if path.exists() {
            let data = fs::read_to_string(&path)?;
            let file: TrustFile =
                serde_json::from_str(&data).map_err(|e| TrustError::Parse(e.to_string()))?;
            file.hosts
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn retrieve(&self, hostname: &str) -> Option<&str> {
        self.entries.get(&normalize(hostname)).map(|v| v.as_str())
    }

    pub fn check(&self, hostname: &str, fingerprint: &str) -> TrustCheck {
        match self.retrieve(hostname) {
            Some(pinned) if pinned == fingerprint => TrustCheck::Match,
            Some(_) => TrustCheck::Mismatch,
            None => TrustCheck::Unknown,
        }
    }

    /// Pin a fingerprint for a first-contact host. Fails with
    /// `HostKeyMismatch` if a different fingerprint is already pinned.
    pub fn save(&mut self, hostname: &str, fingerprint: &str) -> Result<(), TrustError> {
        let host = normalize(hostname);
        if let Some(pinned) = self.entries.get(&host) {
            if pinned != fingerprint {
                return Err(TrustError::HostKeyMismatch(host));
            }
            return Ok(());
        }
        self.entries.insert(host, fingerprint.to_string());
        self.persist()
    }

    pub fn delete(&mut self, hostname: &str) -> Result<(), TrustError> {
        if self.entries.remove(&normalize(hostname)).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(h, f)| (h.as_str(), f.as_str()))
    }

    fn persist(&self) -> Result<(), TrustError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = TrustFile {
            hosts: self.entries.clone(),
        };
        let data =
            serde_json::to_string_pretty(&file).map_err(|e| TrustError::Parse(e.to_string()))?;
        fs::write(&self.path, data)?;
        set_private_permissions(&self.path);
        Ok(())
    }
}

fn normalize(hostname: &str) -> String {
    hostname.trim().to_ascii_lowercase()
}

#[cfg(unix)]
fn set_private_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(mut perms) = fs::metadata(path).map(|m| m.permissions()) {
        perms.set_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_private_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FP_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const FP_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn save_then_retrieve() {
        let dir = TempDir::new().unwrap();
        let mut store = HostKeyTrustStore::load(dir.path().join("hosts.json")).unwrap();
        store.save("gateway.example.com", FP_A).unwrap();
        assert_eq!(store.retrieve("gateway.example.com"), Some(FP_A));
        assert_eq!(store.check("gateway.example.com", FP_A), TrustCheck::Match);
    }

    #[test]
    fn hostnames_are_normalized() {
        let dir = TempDir::new().unwrap();
        let mut store = HostKeyTrustStore::load(dir.path().join("hosts.json")).unwrap();
        store.save("  Gateway.Example.COM ", FP_A).unwrap();
        assert_eq!(store.retrieve("gateway.example.com"), Some(FP_A));
        // same logical host, no duplicate entry
        store.save("GATEWAY.example.com", FP_A).unwrap();
        assert_eq!(store.hosts().count(), 1);
    }

    #[test]
    fn mismatched_fingerprint_is_rejected_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let mut store = HostKeyTrustStore::load(dir.path().join("hosts.json")).unwrap();
        store.save("gateway.example.com", FP_A).unwrap();
        let err = store.save("gateway.example.com", FP_B).unwrap_err();
        assert!(matches!(err, TrustError::HostKeyMismatch(_)));
        assert_eq!(store.retrieve("gateway.example.com"), Some(FP_A));
        assert_eq!(store.check("gateway.example.com", FP_B), TrustCheck::Mismatch);
    }

    #[test]
    fn persists_across_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.json");
        {
            let mut store = HostKeyTrustStore::load(path.clone()).unwrap();
            store.save("gateway.example.com", FP_A).unwrap();
        }
        let store = HostKeyTrustStore::load(path).unwrap();
        assert_eq!(store.retrieve("gateway.example.com"), Some(FP_A));
    }

    #[test]
    fn delete_removes_pin() {
        let dir = TempDir::new().unwrap();
        let mut store = HostKeyTrustStore::load(dir.path().join("hosts.json")).unwrap();
        store.save("gateway.example.com", FP_A).unwrap();
        store.delete("gateway.example.com").unwrap();
        assert_eq!(store.retrieve("gateway.example.com"), None);
        assert_eq!(store.check("gateway.example.com", FP_B), TrustCheck::Unknown);
        // a new pin is accepted after an explicit forget
        store.save("gateway.example.com", FP_B).unwrap();
        assert_eq!(store.retrieve("gateway.example.com"), Some(FP_B));
    }
}
