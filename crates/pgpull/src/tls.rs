//! Transport encryption settings for database connections
//!
//! Models the libpq-style SSL parameters (`sslmode`, `sslrootcert`,
//! `sslcert`, `sslkey`) and turns them into a rustls connector for
//! tokio-postgres.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// SSL mode for database connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS, plain TCP connection
    #[default]
    Disable,
    /// Try TLS, but allow unencrypted if the server doesn't support it
    Prefer,
    /// Require TLS without certificate verification against a pinned CA
    Require,
    /// Require TLS, verify the server certificate against the root CA
    VerifyCa,
    /// Require TLS, verify both the CA chain and the server hostname
    VerifyFull,
}

impl SslMode {
    /// Map onto the subset of modes tokio-postgres understands.
    ///
    /// tokio-postgres only negotiates disable/prefer/require; the verify-*
    /// distinction is enforced by the rustls configuration built in
    /// [`TlsSettings::client_config`].
    pub fn to_pg(self) -> tokio_postgres::config::SslMode {
        match self {
            Self::Disable => tokio_postgres::config::SslMode::Disable,
            Self::Prefer => tokio_postgres::config::SslMode::Prefer,
            Self::Require | Self::VerifyCa | Self::VerifyFull => {
                tokio_postgres::config::SslMode::Require
            }
        }
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslMode::Disable => write!(f, "disable"),
            SslMode::Prefer => write!(f, "prefer"),
            SslMode::Require => write!(f, "require"),
            SslMode::VerifyCa => write!(f, "verify-ca"),
            SslMode::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "off" | "no" | "false" | "0" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            _ => Err(Error::config(format!(
                "invalid SSL mode '{s}'; valid values: disable, prefer, require, verify-ca, verify-full"
            ))),
        }
    }
}

/// TLS settings for a connection
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// SSL mode
    pub mode: SslMode,

    /// Path to the root CA certificate file (PEM).
    /// Required for verify-ca and verify-full modes.
    pub root_cert: Option<PathBuf>,

    /// Path to a client certificate file (PEM) for mTLS
    pub client_cert: Option<PathBuf>,

    /// Path to the client private key file (PEM).
    /// Required if `client_cert` is set.
    pub client_key: Option<PathBuf>,

    /// Accept invalid/self-signed certificates by skipping server
    /// certificate verification entirely (testing only)
    pub accept_invalid_certs: bool,
}

impl TlsSettings {
    /// Create settings with the given mode
    pub fn new(mode: SslMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Settings that require full verification against a pinned CA
    pub fn verify_full(root_cert: impl Into<PathBuf>) -> Self {
        Self {
            mode: SslMode::VerifyFull,
            root_cert: Some(root_cert.into()),
            ..Default::default()
        }
    }

    /// Settings with client certificate authentication (mTLS)
    pub fn with_client_cert(
        root_cert: impl Into<PathBuf>,
        client_cert: impl Into<PathBuf>,
        client_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode: SslMode::VerifyFull,
            root_cert: Some(root_cert.into()),
            client_cert: Some(client_cert.into()),
            client_key: Some(client_key.into()),
            ..Default::default()
        }
    }

    /// Read settings from the libpq-style environment variables
    /// `PGSSLMODE`, `PGSSLROOTCERT`, `PGSSLCERT` and `PGSSLKEY`.
    ///
    /// When `PGSSLMODE` is unset the mode defaults to `require`, matching
    /// the connection strings this crate historically produced.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), but with an explicit variable
    /// lookup. Used by tests to avoid touching the process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mode = match lookup("PGSSLMODE") {
            Some(raw) => raw.parse()?,
            None => SslMode::Require,
        };
        let settings = Self {
            mode,
            root_cert: lookup("PGSSLROOTCERT").map(PathBuf::from),
            client_cert: lookup("PGSSLCERT").map(PathBuf::from),
            client_key: lookup("PGSSLKEY").map(PathBuf::from),
            accept_invalid_certs: false,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check if TLS is enabled at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, SslMode::Disable)
    }

    /// Check if TLS is required (not opportunistic)
    pub fn is_required(&self) -> bool {
        matches!(
            self.mode,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull
        )
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            SslMode::VerifyCa | SslMode::VerifyFull => {
                if self.root_cert.is_none() && !self.accept_invalid_certs {
                    return Err(Error::config(format!(
                        "root CA certificate path required for SSL mode '{}'",
                        self.mode
                    )));
                }
            }
            _ => {}
        }

        if self.client_cert.is_some() && self.client_key.is_none() {
            return Err(Error::config(
                "client key path required when a client certificate is specified",
            ));
        }

        Ok(())
    }

    /// Render the libpq connection-string parameters for these settings.
    ///
    /// Returned as `(key, value)` pairs so the caller controls URL encoding.
    pub fn url_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("sslmode", self.mode.to_string())];
        if let Some(path) = &self.root_cert {
            params.push(("sslrootcert", path.display().to_string()));
        }
        if let Some(path) = &self.client_cert {
            params.push(("sslcert", path.display().to_string()));
        }
        if let Some(path) = &self.client_key {
            params.push(("sslkey", path.display().to_string()));
        }
        params
    }

    /// Build a rustls `ClientConfig` from these settings
    pub fn client_config(&self) -> Result<rustls::ClientConfig> {
        let builder = if self.accept_invalid_certs {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(std::sync::Arc::new(NoVerification::new()))
        } else {
            let mut root_store = rustls::RootCertStore::empty();
            if let Some(ca_path) = &self.root_cert {
                for cert in read_certs(ca_path)? {
                    root_store.add(cert).map_err(|e| {
                        Error::config(format!(
                            "failed to add CA cert from {}: {e}",
                            ca_path.display()
                        ))
                    })?;
                }
            } else {
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
            rustls::ClientConfig::builder().with_root_certificates(root_store)
        };

        let config = if let (Some(cert_path), Some(key_path)) =
            (&self.client_cert, &self.client_key)
        {
            let certs = read_certs(cert_path)?;
            let key = read_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::config(format!("failed to set client auth: {e}")))?
        } else {
            builder.with_no_client_auth()
        };

        Ok(config)
    }

    /// Create the tokio-postgres connector for these settings
    pub fn connector(&self) -> Result<tokio_postgres_rustls::MakeRustlsConnect> {
        let config = self.client_config()?;
        Ok(tokio_postgres_rustls::MakeRustlsConnect::new(config))
    }
}

/// Certificate verifier that accepts any server certificate.
///
/// Only reachable through `accept_invalid_certs`. Handshake signatures are
/// still checked, so the transport stays encrypted even though the peer
/// identity is not verified.
#[derive(Debug)]
struct NoVerification(rustls::crypto::CryptoProvider);

impl NoVerification {
    fn new() -> Self {
        Self(rustls::crypto::aws_lc_rs::default_provider())
    }
}

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn read_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::config(format!("failed to open cert file {}: {e}", path.display())))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("failed to parse certs in {}: {e}", path.display())))
}

fn read_private_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::config(format!("failed to open key file {}: {e}", path.display())))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::config(format!("failed to parse key in {}: {e}", path.display())))?
        .ok_or_else(|| Error::config(format!("no private key found in {}", path.display())))
}
