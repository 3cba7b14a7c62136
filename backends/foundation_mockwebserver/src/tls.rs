//! Certificates for HTTPS tests and the rustls configurations built from
//! them.

use core::time::Duration;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use zeroize::Zeroizing;

use crate::errors::{CertificateError, CertificateResult, TlsSetupResult};

pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

const HTTP_1_1: &[u8] = b"http/1.1";

/// A certificate and its private key.
///
/// Usable as a server identity, as a trust root on the client side, and as
/// an issuer of other held certificates.
pub struct HeldCertificate {
    params: CertificateParams,
    certificate: CertificateDer<'static>,
    certificate_pem: String,
    private_key_pem: Zeroizing<String>,
    private_key_der: Zeroizing<Vec<u8>>,
    common_name: String,
    serial_number: u64,
}

impl HeldCertificate {
    #[must_use]
    pub fn builder() -> HeldCertificateBuilder<'static> {
        HeldCertificateBuilder::new()
    }

    #[must_use]
    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    #[must_use]
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    #[must_use]
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    #[must_use]
    pub fn private_key_der(&self) -> &[u8] {
        &self.private_key_der
    }

    #[must_use]
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    #[must_use]
    pub fn serial_number(&self) -> u64 {
        self.serial_number
    }

    #[must_use]
    pub fn is_certificate_authority(&self) -> bool {
        matches!(self.params.is_ca, IsCa::Ca(_))
    }

    fn issuer(&self) -> CertificateResult<Issuer<'static, KeyPair>> {
        let key = KeyPair::from_pem(&self.private_key_pem)?;
        Ok(Issuer::new(self.params.clone(), key))
    }
}

impl fmt::Debug for HeldCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldCertificate")
            .field("common_name", &self.common_name)
            .field("serial_number", &self.serial_number)
            .field("certificate_authority", &self.is_certificate_authority())
            .finish_non_exhaustive()
    }
}

/// Builds a [`HeldCertificate`].
///
/// Defaults: a random hex common name, serial number 1, one day of
/// validity starting now, self-signed, not a certificate authority.
#[derive(Debug)]
pub struct HeldCertificateBuilder<'a> {
    common_name: Option<String>,
    serial_number: u64,
    validity: Duration,
    issued_by: Option<&'a HeldCertificate>,
    max_intermediates: Option<u8>,
    alternative_names: Vec<String>,
}

impl Default for HeldCertificateBuilder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl HeldCertificateBuilder<'static> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            common_name: None,
            serial_number: 1,
            validity: DEFAULT_VALIDITY,
            issued_by: None,
            max_intermediates: None,
            alternative_names: Vec::new(),
        }
    }
}

impl<'a> HeldCertificateBuilder<'a> {
    #[must_use]
    pub fn common_name(mut self, name: impl Into<String>) -> Self {
        self.common_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn serial_number(mut self, serial: u64) -> Self {
        self.serial_number = serial;
        self
    }

    #[must_use]
    pub fn validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Host name or IP address the certificate is valid for. Clients verify
    /// these, never the common name.
    #[must_use]
    pub fn add_subject_alternative_name(mut self, host: impl Into<String>) -> Self {
        self.alternative_names.push(host.into());
        self
    }

    /// Marks the certificate as an issuer allowing at most
    /// `max_intermediates` certificate authorities below it.
    #[must_use]
    pub fn certificate_authority(mut self, max_intermediates: u8) -> Self {
        self.max_intermediates = Some(max_intermediates);
        self
    }

    /// Signs with `issuer` instead of self-signing.
    #[must_use]
    pub fn signed_by<'b>(self, issuer: &'b HeldCertificate) -> HeldCertificateBuilder<'b>
    where
        'a: 'b,
    {
        HeldCertificateBuilder {
            common_name: self.common_name,
            serial_number: self.serial_number,
            validity: self.validity,
            issued_by: Some(issuer),
            max_intermediates: self.max_intermediates,
            alternative_names: self.alternative_names,
        }
    }

    fn params(&self, common_name: &str) -> CertificateResult<CertificateParams> {
        if self.validity.is_zero() {
            return Err(CertificateError::InvalidValidity);
        }
        let validity =
            time::Duration::try_from(self.validity).map_err(|_| CertificateError::InvalidValidity)?;
        let not_before = time::OffsetDateTime::now_utc();
        let not_after = not_before
            .checked_add(validity)
            .ok_or(CertificateError::InvalidValidity)?;

        let mut params = CertificateParams::default();
        params.not_before = not_before;
        params.not_after = not_after;
        params.serial_number = Some(SerialNumber::from(self.serial_number));
        params.use_authority_key_identifier_extension = self.issued_by.is_some();

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name.to_string());
        params.distinguished_name = distinguished_name;

        if let Some(max_intermediates) = self.max_intermediates {
            params.is_ca = IsCa::Ca(BasicConstraints::Constrained(max_intermediates));
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
            ];
        } else {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
            params.extended_key_usages = vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ];
        }

        for host in &self.alternative_names {
            if let Ok(ip) = host.parse::<IpAddr>() {
                params.subject_alt_names.push(SanType::IpAddress(ip));
            } else {
                params.subject_alt_names.push(SanType::DnsName(
                    host.as_str()
                        .try_into()
                        .map_err(|_| CertificateError::InvalidName(host.clone()))?,
                ));
            }
        }

        Ok(params)
    }

    /// Generates a fresh ECDSA P-256 key pair and the certificate for it.
    ///
    /// # Errors
    ///
    /// [`CertificateError::InvalidValidity`] for an empty or unrepresentable
    /// validity, [`CertificateError::InvalidName`] for an alternative name
    /// that is neither an IP address nor a DNS name, and
    /// [`CertificateError::Generation`] when signing fails.
    pub fn build(self) -> CertificateResult<HeldCertificate> {
        let common_name = self
            .common_name
            .clone()
            .unwrap_or_else(|| format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..)));
        let params = self.params(&common_name)?;

        let key = KeyPair::generate()?;
        let certificate = match self.issued_by {
            Some(issuer) => params.signed_by(&key, &issuer.issuer()?)?,
            None => params.self_signed(&key)?,
        };

        tracing::debug!(
            "Issued certificate {common_name:?} serial {}",
            self.serial_number
        );

        Ok(HeldCertificate {
            params,
            certificate_pem: certificate.pem(),
            certificate: certificate.der().clone(),
            private_key_pem: Zeroizing::new(key.serialize_pem()),
            private_key_der: Zeroizing::new(key.serialize_der()),
            common_name,
            serial_number: self.serial_number,
        })
    }
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Server configuration presenting `certificate`, followed by
/// `intermediates`, and advertising HTTP/1.1 over ALPN.
///
/// # Errors
///
/// When the key cannot be parsed or rustls rejects the chain.
pub fn server_config(
    certificate: &HeldCertificate,
    intermediates: &[&HeldCertificate],
) -> TlsSetupResult<rustls::ServerConfig> {
    use rustls::pki_types::pem::PemObject;

    let mut chain = Vec::with_capacity(intermediates.len() + 1);
    chain.push(certificate.certificate_der().clone());
    chain.extend(
        intermediates
            .iter()
            .map(|intermediate| intermediate.certificate_der().clone()),
    );

    let private_key = PrivateKeyDer::from_pem_slice(certificate.private_key_pem().as_bytes())?;

    let mut config = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, private_key)?;
    config.alpn_protocols = vec![HTTP_1_1.to_vec()];
    Ok(config)
}

/// Client configuration trusting only `roots` and offering HTTP/1.1 over
/// ALPN.
///
/// # Errors
///
/// When rustls rejects one of the roots.
pub fn client_config(roots: &[&HeldCertificate]) -> TlsSetupResult<rustls::ClientConfig> {
    let mut store = rustls::RootCertStore::empty();
    for root in roots {
        store.add(root.certificate_der().clone())?;
    }

    let mut config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(store)
        .with_no_client_auth();
    config.alpn_protocols = vec![HTTP_1_1.to_vec()];
    Ok(config)
}
