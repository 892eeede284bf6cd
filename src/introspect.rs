use rustls::{CipherSuite, ProtocolVersion};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a DER-encoded certificate, as 64 uppercase hex
/// characters with no separators.  Identifies a peer independently of
/// any trust-chain validation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_der(der: &[u8]) -> Self {
        Self(hex::encode_upper(Sha256::digest(der)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format a negotiated cipher as `VERSION-CIPHERNAME-NNNbits`, for
/// example `TLSv1.3-TLS13_AES_256_GCM_SHA384-256bits`
pub fn describe_cipher(version: ProtocolVersion, suite: CipherSuite) -> String {
    let name = format!("{suite:?}");
    let bits = key_bits(&name);
    format!("{}-{name}-{bits}bits", version_name(version))
}

fn version_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_0 => "TLSv1".into(),
        ProtocolVersion::TLSv1_1 => "TLSv1.1".into(),
        ProtocolVersion::TLSv1_2 => "TLSv1.2".into(),
        ProtocolVersion::TLSv1_3 => "TLSv1.3".into(),
        other => format!("{other:?}"),
    }
}

/// Symmetric key size implied by a cipher suite name
fn key_bits(name: &str) -> u32 {
    if name.contains("AES_128") {
        128
    } else if name.contains("AES_256") || name.contains("CHACHA20") {
        256
    } else {
        0
    }
}
