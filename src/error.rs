//! Ambient error taxonomy (spec §7).
//!
//! Bootstrap failures are fatal; backend failures are per-session
//! recoverable. Everything else (tab completion, MOTD, prompt parsing) is
//! cosmetic and handled inline with a safe fallback, never surfaced here.

use std::io;

/// Fatal at bootstrap: the process can't come up without a host key.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read host key file {path}: {source}")]
    ReadKey { path: String, source: io::Error },

    #[error("failed to write host key file {path}: {source}")]
    WriteKey { path: String, source: io::Error },

    #[error("failed to generate RSA host key: {0}")]
    KeyGen(rsa::Error),

    #[error("failed to encode host key as PKCS#1 PEM: {0}")]
    Encode(rsa::pkcs1::Error),

    #[error("failed to parse host key from PKCS#1 PEM: {0}")]
    Parse(rsa::pkcs1::Error),

    #[error("failed to convert host key into an SSH signing key: {0}")]
    IntoSshKey(russh::keys::ssh_key::Error),
}

/// Per-session: something went wrong talking to the backend emulation host.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("backend SSH handshake failed: {0}")]
    Handshake(#[source] russh::Error),

    #[error("backend rejected the channel/session request: {0}")]
    Channel(#[source] russh::Error),

    #[error("backend connection dropped while waiting for a prompt")]
    Disconnected,

    #[error("timed out waiting for a backend prompt")]
    Timeout,
}

impl From<russh::Error> for ConnectorError {
    fn from(e: russh::Error) -> Self {
        ConnectorError::Channel(e)
    }
}
