use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{collections::HashMap, path::Path, sync::Arc};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::fs;
use tracing::error;

use crate::auth::{AuthError, Authenticator, Identity, STREAM_SCOPE};

// -----------------------------------------------------------------------------
// ----- ClientsConfig ---------------------------------------------------------

/// Credentials of the clients allowed to stream, loaded from `clients.toml`.
///
/// Clones share the same map, so a reload through any clone is seen by every
/// authenticator handed out earlier.
#[derive(Debug, Clone)]
pub struct ClientsConfig {
    inner: Arc<RwLock<ClientsMap>>,
}

// -----------------------------------------------------------------------------
// ----- ClientsConfig: Static -------------------------------------------------

impl ClientsConfig {
    pub async fn from_file(path: &Path) -> Result<ClientsConfig, ClientsError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ClientsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<ClientsConfig, ClientsError> {
        let map = ClientsMap::parse(raw)?;
        Ok(ClientsConfig {
            inner: Arc::new(RwLock::new(map)),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- ClientsConfig: Public -------------------------------------------------

impl ClientsConfig {
    /// Reload: on error, DO NOT swap; keep current map and log.
    pub async fn reload(&self, path: &Path) {
        let next = match Self::from_file(path).await {
            Ok(cfg) => cfg,
            Err(e) => {
                error!(
                    "reload failed; keeping previous clients config. path={:?} error={}",
                    path, e
                );
                return;
            }
        };

        let new_map = next.inner.read().clone();
        *self.inner.write() = new_map;
    }

    pub fn snapshot(&self) -> Vec<ClientRecord> {
        let guard = self.inner.read();
        guard.by_id.values().cloned().collect()
    }

    pub fn lookup(&self, credential: &str) -> Result<Identity, AuthError> {
        let guard = self.inner.read();

        // every token is compared, in constant time, whatever matches first
        let record = guard
            .by_id
            .values()
            .fold(None, |found, c| {
                if c.matches(credential) { Some(c) } else { found }
            })
            .ok_or(AuthError::UnknownToken)?;

        if !record.enabled {
            return Err(AuthError::Disabled {
                client_id: record.client_id.clone(),
            });
        }

        if !record.scopes.iter().any(|s| s == STREAM_SCOPE) {
            return Err(AuthError::InsufficientScope {
                client_id: record.client_id.clone(),
            });
        }

        Ok(Identity {
            client_id: record.client_id.clone(),
            scopes: record.scopes.clone(),
        })
    }
}

#[async_trait]
impl Authenticator for ClientsConfig {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        self.lookup(credential)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: map ---------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ClientsMap {
    by_id: HashMap<String, ClientRecord>,
}

impl ClientsMap {
    fn parse(raw: &str) -> Result<ClientsMap, ClientsError> {
        let mut doc: ClientsFile =
            toml::from_str(raw).map_err(|e| ClientsError::Toml { source: e })?;

        if doc.clients.is_empty() {
            return Err(ClientsError::EmptyConfig);
        }

        let mut by_id: HashMap<String, ClientRecord> = HashMap::with_capacity(doc.clients.len());
        for entry in doc.clients.drain(..) {
            validate(&entry)?;

            if by_id
                .values()
                .any(|c| c.matches(&entry.token))
            {
                return Err(ClientsError::DuplicateToken {
                    client_id: entry.client_id,
                });
            }

            let record = ClientRecord {
                client_id: entry.client_id.clone(),
                token: SecretString::new(entry.token.into_boxed_str()),
                scopes: entry.scopes,
                enabled: entry.enabled,
            };

            if by_id.insert(record.client_id.clone(), record).is_some() {
                return Err(ClientsError::DuplicateClient {
                    client_id: entry.client_id,
                });
            }
        }

        Ok(ClientsMap { by_id })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ClientsFile {
    #[serde(default)]
    clients: Vec<ClientsFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientsFileEntry {
    #[serde(alias = "id")]
    client_id: String,

    token: String,

    #[serde(default)]
    scopes: Vec<String>,

    #[serde(default = "default_enabled")]
    enabled: bool,
}

// -----------------------------------------------------------------------------
// ----- Internal: In-memory record --------------------------------------------

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub client_id: String,
    pub token: SecretString,
    pub scopes: Vec<String>,
    pub enabled: bool,
}

impl ClientRecord {
    /// Constant-time token check.
    pub fn matches(&self, credential: &str) -> bool {
        self.token
            .expose_secret()
            .as_bytes()
            .ct_eq(credential.as_bytes())
            .into()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn default_enabled() -> bool {
    true
}

fn validate(c: &ClientsFileEntry) -> Result<(), ClientsError> {
    if c.client_id.trim().is_empty() {
        return Err(ClientsError::InvalidField("client_id".into()));
    }
    if c.token.is_empty() {
        return Err(ClientsError::InvalidField("token".into()));
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ClientsError {
    #[error("clients config is empty")]
    EmptyConfig,

    #[error("duplicate [[clients]] entry for client '{client_id}'")]
    DuplicateClient { client_id: String },

    #[error("client '{client_id}' reuses a token already assigned to another client")]
    DuplicateToken { client_id: String },

    #[error("invalid or missing field '{0}'")]
    InvalidField(String),

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TWO_CLIENTS: &str = r#"
        [[clients]]
        client_id = "gradio-client"
        token = "s3cret"
        scopes = ["video_stream"]

        [[clients]]
        id = "batch-uploader"
        token = "upload-only"
        scopes = ["upload"]

        [[clients]]
        client_id = "retired-cam"
        token = "old"
        scopes = ["video_stream"]
        enabled = false
    "#;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn authenticates_known_token() {
        let clients = ClientsConfig::parse(TWO_CLIENTS).unwrap();

        let identity = clients.authenticate("s3cret").await.unwrap();
        assert_eq!(identity.client_id, "gradio-client");
        assert!(identity.has_scope(STREAM_SCOPE));
    }

    #[tokio::test]
    async fn token_match_is_exact() {
        let clients = ClientsConfig::parse(TWO_CLIENTS).unwrap();

        for near_miss in ["s3cre", "s3crett", "S3CRET", ""] {
            let err = clients.authenticate(near_miss).await.unwrap_err();
            assert_eq!(err, AuthError::UnknownToken, "{near_miss:?}");
        }
    }

    #[tokio::test]
    async fn classifies_failures() {
        let clients = ClientsConfig::parse(TWO_CLIENTS).unwrap();

        let err = clients.authenticate("nope").await.unwrap_err();
        assert_eq!(err, AuthError::UnknownToken);

        let err = clients.authenticate("upload-only").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::InsufficientScope {
                client_id: "batch-uploader".into()
            }
        );
        assert_eq!(err.label(), "insufficient_scope");

        let err = clients.authenticate("old").await.unwrap_err();
        assert!(matches!(err, AuthError::Disabled { .. }));
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        let dup_id = r#"
            [[clients]]
            client_id = "a"
            token = "1"
            [[clients]]
            client_id = "a"
            token = "2"
        "#;
        assert!(matches!(
            ClientsConfig::parse(dup_id).unwrap_err(),
            ClientsError::DuplicateClient { .. }
        ));

        let dup_token = r#"
            [[clients]]
            client_id = "a"
            token = "same"
            [[clients]]
            client_id = "b"
            token = "same"
        "#;
        assert!(matches!(
            ClientsConfig::parse(dup_token).unwrap_err(),
            ClientsError::DuplicateToken { .. }
        ));

        assert!(matches!(
            ClientsConfig::parse("").unwrap_err(),
            ClientsError::EmptyConfig
        ));
    }

    #[tokio::test]
    async fn reload_swaps_map_for_every_clone() {
        let file = write_tmp(TWO_CLIENTS);
        let clients = ClientsConfig::from_file(file.path()).await.unwrap();
        let shared = clients.clone();

        std::fs::write(
            file.path(),
            "[[clients]]\nclient_id = \"new\"\ntoken = \"fresh\"\nscopes = [\"video_stream\"]\n",
        )
        .unwrap();
        clients.reload(file.path()).await;

        assert_eq!(shared.lookup("fresh").unwrap().client_id, "new");
        assert!(shared.lookup("s3cret").is_err());

        std::fs::write(file.path(), "not toml [[").unwrap();
        clients.reload(file.path()).await;
        assert_eq!(shared.snapshot().len(), 1);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
