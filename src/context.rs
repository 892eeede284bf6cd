use crate::{ConfigError, SessionError, TlsSession, Transport};
use arc_swap::ArcSwap;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::Resumption;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::NoServerSessionStorage;
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, DistinguishedName, ServerConfig,
    ServerConnection, SignatureScheme,
};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// TLS settings supplied by the host's configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsSettings {
    /// PEM certificate chain, leaf first.  Used by both roles.
    pub cert_file: PathBuf,
    /// PEM private key matching the leaf certificate
    pub key_file: PathBuf,
    #[serde(default)]
    pub client_certs: ClientCertPolicy,
}

impl TlsSettings {
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            client_certs: ClientCertPolicy::default(),
        }
    }
}

/// How the server role treats client certificates
///
/// Certificate-chain trust is deliberately not evaluated in either
/// mode.  Handshake signatures are always checked, so a client that
/// presents a certificate must hold its private key.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientCertPolicy {
    /// Ask for a client certificate and accept whatever is presented,
    /// including nothing.  Lets the application identify clients by
    /// [`Fingerprint`](crate::Fingerprint).
    #[default]
    AcceptAny,
    /// Don't ask for a client certificate
    NotRequested,
}

/// Role a context is built for
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Server and client contexts, installed and replaced as a pair
pub struct Contexts {
    pub server: Arc<ServerConfig>,
    pub client: Arc<ClientConfig>,
}

impl Contexts {
    /// Build both contexts from the settings, without installing them
    pub fn build(settings: &TlsSettings) -> Result<Self, ConfigError> {
        let provider = provider();
        Ok(Self {
            server: Arc::new(server_config(settings, &provider)?),
            client: Arc::new(client_config(settings, &provider)?),
        })
    }
}

/// Owner of the active server and client contexts
///
/// Replacing the contexts is build-then-install: the new pair is
/// fully loaded before it becomes visible, and a failed build leaves
/// the active pair exactly as it was.  Sessions keep the contexts
/// they were created from, so a reload never disturbs them.
pub struct ContextManager {
    active: ArcSwap<Contexts>,
    generation: AtomicU64,
}

impl ContextManager {
    /// Build the initial contexts.  Failure here means the process
    /// cannot offer TLS at all.
    pub fn initialize(settings: &TlsSettings) -> Result<Self, ConfigError> {
        let contexts = Contexts::build(settings).inspect_err(|e| {
            log::error!("TLS initialisation failed: {e}");
        })?;
        Ok(Self {
            active: ArcSwap::from_pointee(contexts),
            generation: AtomicU64::new(1),
        })
    }

    /// Rebuild both contexts, e.g. after a configuration reload.  On
    /// failure the active contexts stay in place and the error is
    /// returned.
    pub fn reinitialize(&self, settings: &TlsSettings) -> Result<(), ConfigError> {
        let contexts = Contexts::build(settings).inspect_err(|e| {
            log::error!("TLS reinitialisation failed, keeping current contexts: {e}");
        })?;
        self.active.store(Arc::new(contexts));
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!("TLS contexts reinitialised (generation {generation})");
        Ok(())
    }

    /// Number of context pairs installed so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.active.load().server)
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.active.load().client)
    }

    /// Create a server-role session for an accepted transport.  On
    /// failure the transport is dropped.
    pub fn server_session<T: Transport>(&self, transport: T) -> Result<TlsSession<T>, SessionError> {
        transport.set_nonblocking()?;
        let conn = ServerConnection::new(self.server_config()).inspect_err(|e| {
            log::debug!("cannot create TLS server session: {e}");
        })?;
        Ok(TlsSession::server(conn, transport))
    }

    /// Create a client-role session for an outbound transport
    pub fn client_session<T: Transport>(
        &self,
        transport: T,
        server_name: ServerName<'static>,
    ) -> Result<TlsSession<T>, SessionError> {
        transport.set_nonblocking()?;
        let conn = ClientConnection::new(self.client_config(), server_name).inspect_err(|e| {
            log::debug!("cannot create TLS client session: {e}");
        })?;
        Ok(TlsSession::client(conn, transport))
    }
}

#[cfg(feature = "ring")]
fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

#[cfg(all(feature = "aws_lc_rs", not(feature = "ring")))]
fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn server_config(
    settings: &TlsSettings,
    provider: &Arc<CryptoProvider>,
) -> Result<ServerConfig, ConfigError> {
    let rustls_err = |source| ConfigError::Rustls {
        role: Role::Server,
        source,
    };
    let certs = load_certs(&settings.cert_file)?;
    let key = load_key(&settings.key_file)?;

    let builder = ServerConfig::builder_with_provider(Arc::clone(provider))
        .with_safe_default_protocol_versions()
        .map_err(rustls_err)?;
    let builder = match settings.client_certs {
        ClientCertPolicy::AcceptAny => builder
            .with_client_cert_verifier(Arc::new(AcceptAnyClientCert(Arc::clone(provider)))),
        ClientCertPolicy::NotRequested => builder.with_no_client_auth(),
    };
    let mut config = builder.with_single_cert(certs, key).map_err(rustls_err)?;

    // Sessions are never resumed
    config.session_storage = Arc::new(NoServerSessionStorage {});
    config.send_tls13_tickets = 0;
    Ok(config)
}

fn client_config(
    settings: &TlsSettings,
    provider: &Arc<CryptoProvider>,
) -> Result<ClientConfig, ConfigError> {
    let rustls_err = |source| ConfigError::Rustls {
        role: Role::Client,
        source,
    };
    let certs = load_certs(&settings.cert_file)?;
    let key = load_key(&settings.key_file)?;

    let mut config = ClientConfig::builder_with_provider(Arc::clone(provider))
        .with_safe_default_protocol_versions()
        .map_err(rustls_err)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(Arc::clone(provider))))
        .with_client_auth_cert(certs, key)
        .map_err(rustls_err)?;

    config.resumption = Resumption::disabled();
    Ok(config)
}

fn open(path: &Path) -> Result<BufReader<File>, ConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ConfigError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ConfigError::NoPrivateKey(path.to_path_buf()))
}

/// Client certificate verifier that accepts any certificate, or none.
/// Only the handshake signatures are checked.
#[derive(Debug)]
struct AcceptAnyClientCert(Arc<CryptoProvider>);

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Server certificate verifier that skips chain validation.  Only the
/// handshake signatures are checked.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
