use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::PairingError;

/// Fixed storage key for the paired device token.
pub const DEVICE_TOKEN_KEY: &str = "clawpilot_device_token";

/// Device token issued by the gateway during pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub token: String,
    /// Gateway the token was issued by, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_at: Option<DateTime<Utc>>,
}

impl DeviceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: None,
            paired_at: None,
        }
    }
}

/// Durable storage for the device token.
pub trait DeviceTokenStore: Send + Sync {
    fn load(&self) -> Result<Option<DeviceToken>, PairingError>;
    fn save(&self, token: &DeviceToken) -> Result<(), PairingError>;
    fn clear(&self) -> Result<(), PairingError>;
}

/// File-backed token store writing `<base_dir>/clawpilot_device_token.toml`.
///
/// # Example
/// ```no_run
/// use clawpilot::auth::{DeviceToken, DeviceTokenStore, FileDeviceTokenStore};
///
/// let store = FileDeviceTokenStore::new_default();
/// store.save(&DeviceToken::new("device-token"))?;
/// # Ok::<(), clawpilot::auth::PairingError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileDeviceTokenStore {
    base_dir: PathBuf,
}

impl FileDeviceTokenStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn new_default() -> Self {
        Self {
            base_dir: default_clawpilot_dir(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.base_dir.join(format!("{DEVICE_TOKEN_KEY}.toml"))
    }

    fn ensure_parent(path: &Path) -> Result<(), PairingError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl DeviceTokenStore for FileDeviceTokenStore {
    fn load(&self) -> Result<Option<DeviceToken>, PairingError> {
        let path = self.path();
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: TokenFile = toml::from_str(&raw)?;
        if file.token.token.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(file.token))
    }

    fn save(&self, token: &DeviceToken) -> Result<(), PairingError> {
        let path = self.path();
        Self::ensure_parent(&path)?;
        let file = TokenFile {
            version: 1,
            key: DEVICE_TOKEN_KEY.to_string(),
            token: token.clone(),
            saved_at: Utc::now(),
        };
        fs::write(&path, toml::to_string(&file)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        tracing::debug!(path = %path.display(), "saved device token");
        Ok(())
    }

    fn clear(&self) -> Result<(), PairingError> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local token store, handy for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryDeviceTokenStore {
    token: Mutex<Option<DeviceToken>>,
}

impl MemoryDeviceTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: DeviceToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl DeviceTokenStore for MemoryDeviceTokenStore {
    fn load(&self) -> Result<Option<DeviceToken>, PairingError> {
        Ok(self.token.lock().map(|t| t.clone()).unwrap_or(None))
    }

    fn save(&self, token: &DeviceToken) -> Result<(), PairingError> {
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), PairingError> {
        if let Ok(mut slot) = self.token.lock() {
            *slot = None;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    version: u32,
    key: String,
    token: DeviceToken,
    saved_at: DateTime<Utc>,
}

pub(crate) fn default_clawpilot_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".clawpilot"))
        .unwrap_or_else(|| PathBuf::from(".clawpilot"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, FileDeviceTokenStore) {
        let dir = TempDir::new().unwrap();
        let store = FileDeviceTokenStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn token_file_is_named_after_fixed_key() {
        let (dir, store) = temp_store();
        assert_eq!(
            store.path(),
            dir.path().join("clawpilot_device_token.toml")
        );
    }

    #[test]
    fn saved_token_loads_back() {
        let (_dir, store) = temp_store();
        let mut token = DeviceToken::new("tok-123");
        token.gateway_url = Some("http://localhost:18789/v1/clawg-ui".into());
        store.save(&token).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, token);
    }

    #[test]
    fn missing_file_is_not_paired() {
        let (_dir, store) = temp_store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn clear_removes_token_and_is_idempotent() {
        let (_dir, store) = temp_store();
        store.save(&DeviceToken::new("tok")).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryDeviceTokenStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&DeviceToken::new("abc")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().token, "abc");
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
