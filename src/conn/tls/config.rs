//! TLS configuration
//!
//! This module provides TLS configuration builders for both client and server.
//! Builders only collect settings; the OpenSSL context is created in `build()`.
//!
//! Certificates are not validated: clients accept any server certificate and
//! servers do not ask for client certificates.

use super::session::{TlsConnection, Transport};
use openssl::pkey::PKey;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::X509;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Create a new server configuration builder
    pub fn server() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Whether this configuration accepts rather than connects
    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Connect to a server with TLS (client-side)
    pub fn connect<S: Transport>(&self, stream: S) -> Result<TlsConnection<S>, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        TlsConnection::connect(stream, self)
    }

    /// Accept a client connection with TLS (server-side)
    pub fn accept<S: Transport>(&self, stream: S) -> Result<TlsConnection<S>, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        TlsConnection::accept(stream, self)
    }
}

/// Protocol version bounds shared by client and server builders
#[derive(Default)]
struct Versions {
    min: Option<TlsVersion>,
    max: Option<TlsVersion>,
}

impl Versions {
    fn context(&self, method: SslMethod) -> Result<SslContextBuilder, TlsError> {
        let mut ctx = SslContextBuilder::new(method)?;
        ctx.set_min_proto_version(self.min.map(|v| v.to_openssl_version()))?;
        ctx.set_max_proto_version(self.max.map(|v| v.to_openssl_version()))?;
        ctx.set_verify(SslVerifyMode::NONE);
        Ok(ctx)
    }
}

/// Install a PEM bundle holding a certificate and its private key
fn load_cert_pem(ctx: &mut SslContextBuilder, pem: &[u8]) -> Result<(), TlsError> {
    let cert = X509::from_pem(pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
    ctx.set_certificate(&cert)?;

    let key = PKey::private_key_from_pem(pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
    ctx.set_private_key(&key)?;

    ctx.check_private_key()
        .map_err(|e| TlsError::Certificate(format!("Private key does not match certificate: {}", e)))?;

    Ok(())
}

/// Client configuration builder
#[derive(Default)]
pub struct ClientConfigBuilder {
    versions: Versions,
    servername: Option<String>,
}

impl ClientConfigBuilder {
    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.versions = Versions { min: Some(min), max: Some(max) };
        self
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let ctx = self.versions.context(SslMethod::tls_client())?;

        Ok(TlsConfig {
            ctx: ctx.build(),
            is_server: false,
            servername: self.servername,
        })
    }
}

/// Server configuration builder
#[derive(Default)]
pub struct ServerConfigBuilder {
    versions: Versions,
    cert_pem: Option<Vec<u8>>,
}

impl ServerConfigBuilder {
    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.versions = Versions { min: Some(min), max: Some(max) };
        self
    }

    /// Load server certificate and key from a PEM file
    ///
    /// Without one, the built-in self-signed certificate is used.
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        let mut pem = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut pem)?;
        self.cert_pem = Some(pem);
        Ok(self)
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = self.versions.context(SslMethod::tls_server())?;

        let pem = self
            .cert_pem
            .as_deref()
            .unwrap_or(super::builtin_cert::BUILTIN_CERT.as_bytes());
        load_cert_pem(&mut ctx, pem)?;

        Ok(TlsConfig {
            ctx: ctx.build(),
            is_server: true,
            servername: None,
        })
    }
}
