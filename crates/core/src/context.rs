//! Process-wide context, built once at startup and passed explicitly
//!
//! Holds the sender-device identity that tags every published event.
//! Nothing here is global; whoever needs the context receives a clone.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Length of the rendered device id (hex chars)
const DEVICE_ID_LEN: usize = 16;

/// Stable identifier of the capturing device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Derive a device id from host, user and salt
    ///
    /// Returns format: 16 uppercase hex chars of SHA-256(host|user|salt)
    pub fn derive(host: &str, user: &str, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update(b"|");
        hasher.update(user.as_bytes());
        hasher.update(b"|");
        hasher.update(salt.as_bytes());
        let digest = hasher.finalize();

        let hex: String = digest.iter().map(|b| format!("{:02X}", b)).collect();
        Self(hex[..DEVICE_ID_LEN].to_string())
    }

    /// Derive from the local environment; random salt when none is given
    pub fn detect(salt: Option<&str>) -> Self {
        let host = env_first(&["HOSTNAME", "COMPUTERNAME"]);
        let user = env_first(&["USER", "USERNAME"]);
        match salt {
            Some(salt) => Self::derive(&host, &user, salt),
            None => {
                let nonce: u64 = rand::thread_rng().gen();
                Self::derive(&host, &user, &format!("{:016x}", nonce))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn env_first(keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default()
}

#[derive(Debug)]
struct ContextInner {
    device_id: DeviceId,
    started_at: i64,
}

/// Explicitly owned bridge context
#[derive(Debug, Clone)]
pub struct BridgeContext {
    inner: Arc<ContextInner>,
}

impl BridgeContext {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                device_id,
                started_at: crate::types::now_millis(),
            }),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.inner.device_id
    }

    /// Process start, milliseconds since the Unix epoch
    pub fn started_at(&self) -> i64 {
        self.inner.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_stable() {
        let a = DeviceId::derive("host", "user", "salt");
        let b = DeviceId::derive("host", "user", "salt");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), DEVICE_ID_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_derive_depends_on_salt() {
        assert_ne!(
            DeviceId::derive("host", "user", "a"),
            DeviceId::derive("host", "user", "b")
        );
    }

    #[test]
    fn test_context_clone_shares_identity() {
        let ctx = BridgeContext::new(DeviceId::from("DEV1"));
        let other = ctx.clone();
        assert_eq!(other.device_id().as_str(), "DEV1");
        assert_eq!(ctx.started_at(), other.started_at());
    }
}
