//! Shared settings document: S3 connection configuration plus the
//! optional `SESSION` object, one JSON file, one load/save contract.
//!
//! The two concerns share the file but are handled as distinct types —
//! typed connection fields on one side, [`SessionRecord`] on the other,
//! merged only at the serialization boundary. Keys this version does
//! not know about are carried through load→modify→save verbatim.
//!
//! Loading never fails: an absent or corrupt file yields the default
//! document so a broken settings file cannot block app launch. Saving
//! restricts the file to owner read/write, since the document holds the
//! S3 secret key.

pub mod session;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use session::{SessionCorrupt, SessionRecord};

/// Environment variable overriding the settings file path.
pub const CONFIG_PATH_ENV: &str = "S3KEEPER_CONFIG_PATH";

/// Default settings file name under the home directory.
const DEFAULT_CONFIG_FILENAME: &str = ".s3keeper.json";

/// The settings document could not be written.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not resolve a home directory for the settings file")]
    NoHomeDirectory,
}

/// Typed view of the S3 connection configuration.
///
/// All fields optional — this layer stores and reports them; deciding
/// what a given provider requires is [`ConnectionSettings::missing_keys`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(rename = "PROVIDER", skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(rename = "AWS_REGION", skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "AWS_S3_ENDPOINT", skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(rename = "AWS_ACCESS_KEY_ID", skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(
        rename = "AWS_SECRET_ACCESS_KEY",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret_access_key: Option<String>,
    #[serde(rename = "AWS_S3_SECURE", skip_serializing_if = "Option::is_none")]
    pub secure: Option<String>,
    #[serde(rename = "AWS_S3_PATH_STYLE", skip_serializing_if = "Option::is_none")]
    pub path_style: Option<String>,
}

impl ConnectionSettings {
    /// Endpoint, defaulting to `s3.<region>.amazonaws.com` when unset
    /// but a region is configured.
    pub fn endpoint_or_default(&self) -> Option<String> {
        match (&self.endpoint, &self.region) {
            (Some(endpoint), _) => Some(endpoint.clone()),
            (None, Some(region)) => Some(format!("s3.{region}.amazonaws.com")),
            (None, None) => None,
        }
    }

    /// Required keys that are still missing for the configured provider.
    /// Empty means the host can construct an S3 client.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.access_key_id.as_deref().unwrap_or("").is_empty() {
            missing.push("AWS_ACCESS_KEY_ID");
        }
        if self.secret_access_key.as_deref().unwrap_or("").is_empty() {
            missing.push("AWS_SECRET_ACCESS_KEY");
        }
        if self.endpoint_or_default().is_none() {
            missing.push("AWS_S3_ENDPOINT");
        }
        if self.provider.as_deref().unwrap_or("aws") == "aws"
            && self.region.as_deref().unwrap_or("").is_empty()
        {
            missing.push("AWS_REGION");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_keys().is_empty()
    }
}

/// Key of the session sub-object within the document.
const SESSION_KEY: &str = "SESSION";

/// The full on-disk settings document.
///
/// Typed connection fields and the session object are split out of the
/// raw JSON at load time and merged back at save time; every key this
/// version does not model rides along in `extra` untouched. `SESSION`
/// is kept as raw JSON here and parsed into [`SessionRecord`] on
/// demand, so one malformed sub-object cannot poison the connection
/// settings or the passthrough keys around it.
#[derive(Debug, Clone, Default)]
pub struct SettingsDocument {
    pub connection: ConnectionSettings,
    session: Option<serde_json::Value>,
    extra: BTreeMap<String, serde_json::Value>,
}

/// Top-level JSON keys owned by [`ConnectionSettings`].
const CONNECTION_KEYS: [&str; 7] = [
    "PROVIDER",
    "AWS_REGION",
    "AWS_S3_ENDPOINT",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_S3_SECURE",
    "AWS_S3_PATH_STYLE",
];

impl SettingsDocument {
    /// Split a raw JSON object into typed parts plus passthrough keys.
    fn from_json(value: serde_json::Value) -> Self {
        let mut map = match value {
            serde_json::Value::Object(map) => map,
            _ => return Self::default(),
        };
        let session = map.remove(SESSION_KEY);

        // If a connection field has an unexpected shape, leave all of
        // them in the passthrough map verbatim rather than dropping data.
        let connection = match serde_json::from_value::<ConnectionSettings>(
            serde_json::Value::Object(map.clone()),
        ) {
            Ok(connection) => {
                for key in CONNECTION_KEYS {
                    map.remove(key);
                }
                connection
            }
            Err(e) => {
                tracing::warn!("Connection settings are malformed, treating as unset: {e}");
                ConnectionSettings::default()
            }
        };

        Self {
            connection,
            session,
            extra: map.into_iter().collect(),
        }
    }

    /// Merge the typed parts back into one JSON object.
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut map: serde_json::Map<String, serde_json::Value> = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let serde_json::Value::Object(connection) = serde_json::to_value(&self.connection)? {
            map.extend(connection);
        }
        if let Some(session) = &self.session {
            map.insert(SESSION_KEY.to_string(), session.clone());
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Parse the `SESSION` sub-object, if any.
    pub fn session_record(&self) -> Result<Option<SessionRecord>, SessionCorrupt> {
        match &self.session {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Install a session, overwriting any prior one.
    pub fn set_session(&mut self, record: SessionRecord) {
        // Serializing a plain struct of strings cannot fail.
        self.session = serde_json::to_value(record).ok();
    }

    /// Remove the `SESSION` key. Returns whether one was present.
    pub fn clear_session(&mut self) -> bool {
        self.session.take().is_some()
    }

    /// Passthrough keys (read-only view, mainly for diagnostics).
    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extra
    }
}

/// Loads and saves the settings document at a fixed path.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store at `$S3KEEPER_CONFIG_PATH`, or `~/.s3keeper.json`.
    pub fn default_location() -> Result<Self, SettingsError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return Ok(Self::at_path(path));
            }
        }
        let home = directories::UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .ok_or(SettingsError::NoHomeDirectory)?;
        Ok(Self::at_path(home.join(DEFAULT_CONFIG_FILENAME)))
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. Absent or unparseable file yields the default
    /// document — launch must never be blocked by bad settings.
    pub fn load(&self) -> SettingsDocument {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return SettingsDocument::default(),
        };
        if raw.trim().is_empty() {
            return SettingsDocument::default();
        }
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => SettingsDocument::from_json(value),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Settings file is not valid JSON, starting from defaults: {e}"
                );
                SettingsDocument::default()
            }
        }
    }

    /// Write the document back, replacing the file, then restrict it to
    /// owner read/write (it holds the S3 secret key).
    pub fn save(&self, doc: &SettingsDocument) -> Result<(), SettingsError> {
        let payload = serde_json::to_string_pretty(&doc.to_json()?)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        std::fs::write(&self.path, payload).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })?;
        restrict_permissions(&self.path);
        Ok(())
    }

    /// Drop the `SESSION` key and persist (logout).
    pub fn clear_session(&self) -> Result<bool, SettingsError> {
        let mut doc = self.load();
        let had_session = doc.clear_session();
        if had_session {
            self.save(&doc)?;
        }
        Ok(had_session)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!(path = %path.display(), "Failed to restrict settings permissions: {e}");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

// ── Tests ───────────────────────────────────────────────────────────
