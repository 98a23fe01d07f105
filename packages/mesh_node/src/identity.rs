//! Device identity: one persisted [`KeyPair`] holding both the ECDH agreement
//! key (envelope crypto) and the ECDSA signing key (key announcements and
//! descriptor signatures).

use std::path::Path;

use anyhow::{Context, Result};
use mesh_crypto::{KEY_PAIR_LEN, KeyPair};
use tracing::info;

const KEY_FILE: &str = "device.key";

#[derive(Clone, Debug)]
pub struct NodeIdentity {
    keys: KeyPair,
}

impl NodeIdentity {
    /// Load from `<data_dir>/device.key`, or generate and save a new pair.
    pub fn load_or_generate(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(KEY_FILE);

        if path.exists() {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read device key: {}", path.display()))?;
            let arr: [u8; KEY_PAIR_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
                anyhow::anyhow!("device key must be {} bytes, got {}", KEY_PAIR_LEN, v.len())
            })?;
            let keys = KeyPair::from_bytes(&arr)
                .with_context(|| format!("corrupt device key: {}", path.display()))?;
            let identity = Self { keys };
            info!("Loaded device identity: {}", identity.fingerprint());
            Ok(identity)
        } else {
            let identity = Self::generate();
            identity.save(&path)?;
            info!("Generated new device identity: {}", identity.fingerprint());
            Ok(identity)
        }
    }

    /// Replace any stored key with a fresh one.
    pub fn reset(data_dir: &Path) -> Result<Self> {
        let identity = Self::generate();
        identity.save(&data_dir.join(KEY_FILE))?;
        info!("Reset device identity: {}", identity.fingerprint());
        Ok(identity)
    }

    fn generate() -> Self {
        Self {
            keys: KeyPair::generate(),
        }
    }

    /// Write the 64-byte key material to disk with mode 0600.
    fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.keys.to_bytes())
            .with_context(|| format!("failed to write device key: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to set permissions on {}", path.display()))?;
        }

        Ok(())
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    /// Fingerprint of the agreement key; what peers see in announcements.
    pub fn fingerprint(&self) -> String {
        self.keys.agreement_public().fingerprint()
    }

    pub fn signing_fingerprint(&self) -> String {
        self.keys.verifying_key().fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let id1 = NodeIdentity::load_or_generate(tmp.path()).unwrap();
        let id2 = NodeIdentity::load_or_generate(tmp.path()).unwrap();
        assert_eq!(id1.fingerprint(), id2.fingerprint());
        assert_eq!(id1.signing_fingerprint(), id2.signing_fingerprint());
    }

    #[test]
    fn reset_replaces_key() {
        let tmp = tempfile::tempdir().unwrap();
        let id1 = NodeIdentity::load_or_generate(tmp.path()).unwrap();
        let id2 = NodeIdentity::reset(tmp.path()).unwrap();
        let id3 = NodeIdentity::load_or_generate(tmp.path()).unwrap();
        assert_ne!(id1.fingerprint(), id2.fingerprint());
        assert_eq!(id2.fingerprint(), id3.fingerprint());
    }

    #[test]
    fn truncated_key_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(KEY_FILE), [7u8; 10]).unwrap();
        let err = NodeIdentity::load_or_generate(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("64 bytes"));
    }

    #[cfg(unix)]
    #[test]
    fn key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let _id = NodeIdentity::load_or_generate(tmp.path()).unwrap();
        let path = tmp.path().join(KEY_FILE);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn agreement_and_signing_fingerprints_differ() {
        let tmp = tempfile::tempdir().unwrap();
        let id = NodeIdentity::load_or_generate(tmp.path()).unwrap();
        assert_ne!(id.fingerprint(), id.signing_fingerprint());
    }
}
