//! TLS client configuration for talking to the border servers.
use crate::error::{Error, Result};
use crate::settings::{Certificates, TlsMode};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, aws_lc_rs, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::{debug, info};
use webpki_roots::TLS_SERVER_ROOTS;
use x509_parser::prelude::*;

/// Accepts any server certificate while still checking handshake signatures
#[derive(Debug)]
struct NoServerVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> core::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Parse every certificate in a PEM bundle, rejecting anything that is not a
/// well formed X.509 certificate
///
/// # Errors
///
/// Will return `Err` if the bundle is empty or any entry fails to parse
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certificates = CertificateDer::pem_slice_iter(pem)
        .collect::<core::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate(format!("invalid certificate PEM: {e}")))?;

    if certificates.is_empty() {
        return Err(Error::Certificate("no certificate found in PEM data".to_string()));
    }

    for certificate in &certificates {
        let (_, parsed) = parse_x509_certificate(certificate.as_ref())
            .map_err(|e| Error::Certificate(format!("invalid certificate: {e}")))?;

        let validity = parsed.validity();
        debug!(
            "Loaded certificate subject='{}' issuer='{}' expires={} valid={}",
            parsed.subject(),
            parsed.issuer(),
            validity.not_after,
            validity.is_valid()
        );
    }

    Ok(certificates)
}

/// # Errors
///
/// Will return `Err` if no private key can be read from the PEM data
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| Error::Certificate(format!("invalid private key PEM: {e}")))
}

fn required<'a>(material: Option<&'a Vec<u8>>, what: &'static str) -> Result<&'a [u8]> {
    material
        .map(Vec::as_slice)
        .ok_or(Error::MissingCertificate(what))
}

fn public_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn private_roots(certificates: &Certificates) -> Result<RootCertStore> {
    let ca = required(certificates.ca_certificate.as_ref(), "CA certificate")?;
    let mut roots = RootCertStore::empty();
    for certificate in parse_certificates(ca)? {
        roots.add(certificate)?;
    }
    Ok(roots)
}

fn client_identity(
    certificates: &Certificates,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let chain = parse_certificates(required(
        certificates.client_certificate.as_ref(),
        "client certificate",
    )?)?;
    let key = parse_private_key(required(certificates.client_key.as_ref(), "client key")?)?;
    Ok((chain, key))
}

/// Build the TLS client configuration for `mode`
///
/// # Errors
///
/// Will return `Err` if material the mode needs is missing or malformed
pub fn new_tls_config(mode: TlsMode, certificates: &Certificates) -> Result<ClientConfig> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = match mode {
        TlsMode::NoTls => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoServerVerification { provider }))
            .with_no_client_auth(),
        TlsMode::CaTls => builder
            .with_root_certificates(public_roots())
            .with_no_client_auth(),
        TlsMode::CaMutualTls => {
            let (chain, key) = client_identity(certificates)?;
            builder
                .with_root_certificates(public_roots())
                .with_client_auth_cert(chain, key)?
        }
        TlsMode::SelfSignedTls => builder
            .with_root_certificates(private_roots(certificates)?)
            .with_no_client_auth(),
        TlsMode::SelfSignedMutualTls => {
            let roots = private_roots(certificates)?;
            let (chain, key) = client_identity(certificates)?;
            builder
                .with_root_certificates(roots)
                .with_client_auth_cert(chain, key)?
        }
    };

    info!("🔐 TLS configured: {:?}", mode);
    Ok(config)
}
