use once_cell::sync::OnceCell;
use std::{env, fs::File, io::BufReader, path::Path, sync::Arc};
use thiserror::Error;
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
};
use tracing::{error, info};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const CERT_ENV: &str = "STREAMGATE_TLS_CERT";
pub const KEY_ENV: &str = "STREAMGATE_TLS_KEY";

static ACCEPTOR: OnceCell<Option<TlsAcceptor>> = OnceCell::new();

// -----------------------------------------------------------------------------
// ----- TLS: Exported ---------------------------------------------------------

/// Acceptor built from the environment on first use. `None` means plain TCP.
pub fn acceptor() -> Option<TlsAcceptor> {
    ACCEPTOR
        .get_or_init(|| match from_env() {
            Ok(acceptor) => acceptor,
            Err(err) => {
                error!("tls disabled: {err}");
                None
            }
        })
        .clone()
}

/// Build an acceptor from a PEM certificate chain and private key.
pub fn load(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(TlsError::InvalidPair)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

// -----------------------------------------------------------------------------
// ----- TLS: Private helpers --------------------------------------------------

fn from_env() -> Result<Option<TlsAcceptor>, TlsError> {
    let cert_path = env::var(CERT_ENV).ok();
    let key_path = env::var(KEY_ENV).ok();

    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(cert), Some(key)) => (cert, key),
        (None, Some(_)) => return Err(TlsError::MissingVar(CERT_ENV)),
        (Some(_), None) => return Err(TlsError::MissingVar(KEY_ENV)),
    };

    let acceptor = load(Path::new(&cert_path), Path::new(&key_path))?;
    info!("tls enabled with certificate {cert_path}");
    Ok(Some(acceptor))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }

    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.display().to_string()))
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{0} is required when enabling TLS")]
    MissingVar(&'static str),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("invalid tls key/cert pair: {0}")]
    InvalidPair(#[source] tokio_rustls::rustls::Error),
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
