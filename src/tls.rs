//! TLS configuration helpers.
//!
//! Builds a [`rustls::ClientConfig`] from caller-supplied CA certificate
//! material for use with `wss://` URLs via
//! [`ConnectOptions::tls_config`](crate::ConnectOptions::tls_config).

use rustls::ClientConfig;

use crate::Result;

/// Builds a [`ClientConfig`] whose root store contains the CA
/// certificates parsed from the given PEM bytes.
///
/// # Errors
///
/// Returns [`EftlError::Tls`](crate::EftlError::Tls) if the PEM cannot be
/// parsed.
pub fn build_tls_config(ca_pem: &[u8]) -> Result<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();

    let certs: Vec<_> = rustls_pemfile::certs(&mut &ca_pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| crate::EftlError::Tls(format!("failed to parse CA PEM: {e}")))?;

    root_store.add_parsable_certificates(certs);

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}
