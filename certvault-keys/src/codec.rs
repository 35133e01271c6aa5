//! Key material codec
//!
//! Key-pair generation, self-signed certificate and PKCS#10 construction,
//! and every encoding the engine reads or writes: PEM, DER (certificates and
//! PKCS#8 private keys) and PKCS#12 bundles. All functions here are pure; they
//! keep no state between calls.

use chrono::{DateTime, Duration, TimeZone, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::extension::{BasicConstraints, KeyUsage as X509KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{
    X509Builder, X509Name, X509NameBuilder, X509NameRef, X509Req, X509ReqBuilder, X509,
};
use pkcs8::{EncodePrivateKey, EncryptedPrivateKeyInfo};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use x509_parser::certificate::X509Certificate as ParsedCertificate;
use x509_parser::prelude::FromDer;

use crate::error::{CertError, Result};

/// Serial numbers carry 159 random bits so they stay positive in 20 octets
const SERIAL_BITS: i32 = 159;

/* -------------------------------------------------------------------------
 * Algorithms, usages, encodings
 * ---------------------------------------------------------------------- */

/// Supported key-pair algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Rsa,
    EcdsaP256,
}

impl KeyAlgorithm {
    pub fn supported_sizes(&self) -> &'static [u32] {
        match self {
            KeyAlgorithm::Rsa => &[2048, 3072, 4096],
            KeyAlgorithm::EcdsaP256 => &[256],
        }
    }

    pub fn default_size(&self) -> u32 {
        match self {
            KeyAlgorithm::Rsa => 2048,
            KeyAlgorithm::EcdsaP256 => 256,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => write!(f, "RSA"),
            KeyAlgorithm::EcdsaP256 => write!(f, "ECDSA-P256"),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyAlgorithm::Rsa),
            "ec" | "ecdsa" | "p256" | "ecdsa-p256" => Ok(KeyAlgorithm::EcdsaP256),
            other => Err(CertError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// X.509 key usage flags written into generated certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
}

/// Textual or binary representation of certificates and keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Pem,
    Der,
}

impl Encoding {
    /// PEM when the input starts with an armor line, DER otherwise
    pub fn detect(bytes: &[u8]) -> Self {
        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        if bytes[start..].starts_with(b"-----BEGIN") {
            Encoding::Pem
        } else {
            Encoding::Der
        }
    }
}

/* -------------------------------------------------------------------------
 * Subject and validity
 * ---------------------------------------------------------------------- */

/// Distinguished-name attributes of a certificate subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAttributes {
    pub common_name: String,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub locality: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl SubjectAttributes {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Default::default()
        }
    }

    pub fn with_organization(mut self, value: impl Into<String>) -> Self {
        self.organization = Some(value.into());
        self
    }

    pub fn with_organizational_unit(mut self, value: impl Into<String>) -> Self {
        self.organizational_unit = Some(value.into());
        self
    }

    pub fn with_locality(mut self, value: impl Into<String>) -> Self {
        self.locality = Some(value.into());
        self
    }

    pub fn with_state(mut self, value: impl Into<String>) -> Self {
        self.state = Some(value.into());
        self
    }

    pub fn with_country(mut self, value: impl Into<String>) -> Self {
        self.country = Some(value.into());
        self
    }

    /// Common name is mandatory; country, when present, is an ISO 3166 alpha-2 code
    pub fn validate(&self) -> Result<()> {
        if self.common_name.trim().is_empty() {
            return Err(CertError::InvalidSubject(
                "common name is required".to_string(),
            ));
        }
        if let Some(country) = &self.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(CertError::InvalidSubject(format!(
                    "country must be a two-letter code, got '{country}'"
                )));
            }
        }
        Ok(())
    }

    fn entries(&self) -> Vec<(Nid, &str)> {
        let mut entries = Vec::new();
        if let Some(v) = &self.country {
            entries.push((Nid::COUNTRYNAME, v.as_str()));
        }
        if let Some(v) = &self.state {
            entries.push((Nid::STATEORPROVINCENAME, v.as_str()));
        }
        if let Some(v) = &self.locality {
            entries.push((Nid::LOCALITYNAME, v.as_str()));
        }
        if let Some(v) = &self.organization {
            entries.push((Nid::ORGANIZATIONNAME, v.as_str()));
        }
        if let Some(v) = &self.organizational_unit {
            entries.push((Nid::ORGANIZATIONALUNITNAME, v.as_str()));
        }
        entries.push((Nid::COMMONNAME, self.common_name.as_str()));
        entries
    }

    fn to_x509_name(&self) -> Result<X509Name> {
        self.validate()?;
        let mut builder = X509NameBuilder::new()?;
        for (nid, value) in self.entries() {
            builder.append_entry_by_nid(nid, value).map_err(|e| {
                CertError::InvalidSubject(format!(
                    "cannot encode {}: {e}",
                    nid.short_name().unwrap_or("?")
                ))
            })?;
        }
        Ok(builder.build())
    }

    fn from_x509_name(name: &X509NameRef) -> Result<Self> {
        let first = |nid: Nid| -> Result<Option<String>> {
            match name.entries_by_nid(nid).next() {
                Some(entry) => {
                    let value = entry.data().as_utf8().map_err(|e| {
                        CertError::MalformedInput(format!("unreadable subject attribute: {e}"))
                    })?;
                    Ok(Some(value.to_string()))
                }
                None => Ok(None),
            }
        };
        let common_name = first(Nid::COMMONNAME)?.ok_or_else(|| {
            CertError::InvalidSubject("certificate subject has no common name".to_string())
        })?;
        Ok(Self {
            common_name,
            organization: first(Nid::ORGANIZATIONNAME)?,
            organizational_unit: first(Nid::ORGANIZATIONALUNITNAME)?,
            locality: first(Nid::LOCALITYNAME)?,
            state: first(Nid::STATEORPROVINCENAME)?,
            country: first(Nid::COUNTRYNAME)?,
        })
    }

    /// Re-derive the attributes recorded in a certificate's subject
    pub fn from_certificate(certificate: &X509Certificate) -> Result<Self> {
        let x509 = certificate.to_openssl()?;
        Self::from_x509_name(x509.subject_name())
    }
}

impl fmt::Display for SubjectAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .entries()
            .into_iter()
            .rev()
            .map(|(nid, value)| format!("{}={}", nid.short_name().unwrap_or("?"), value))
            .collect();
        write!(f, "{}", rendered.join(", "))
    }
}

/// Validity window of a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityPeriod {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ValidityPeriod {
    pub fn new(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Result<Self> {
        if not_after <= not_before {
            return Err(CertError::InvalidArgument(
                "validity period must end after it starts".to_string(),
            ));
        }
        Ok(Self {
            not_before,
            not_after,
        })
    }

    /// Starts now and lasts `days` days
    pub fn days_from_now(days: u32) -> Result<Self> {
        if days == 0 {
            return Err(CertError::InvalidArgument(
                "validity must be at least one day".to_string(),
            ));
        }
        let now = Utc::now();
        Self::new(now, now + Duration::days(i64::from(days)))
    }

    pub fn duration(&self) -> Duration {
        self.not_after - self.not_before
    }
}

/* -------------------------------------------------------------------------
 * Key pair
 * ---------------------------------------------------------------------- */

/// An asymmetric key pair; the public half is derived from the private key
pub struct KeyPair {
    pkey: PKey<Private>,
}

impl KeyPair {
    fn from_pkey(pkey: PKey<Private>) -> Self {
        Self { pkey }
    }

    pub(crate) fn pkey(&self) -> &PKeyRef<Private> {
        &self.pkey
    }

    /// SubjectPublicKeyInfo DER of the public half
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.pkey.public_key_to_der()?)
    }

    /// Short algorithm label (RSA, EC, ED25519, ...)
    pub fn algorithm_name(&self) -> String {
        let id = self.pkey.id();
        if id == Id::RSA {
            "RSA".to_string()
        } else if id == Id::EC {
            "EC".to_string()
        } else if id == Id::ED25519 {
            "ED25519".to_string()
        } else {
            format!("id-{}", id.as_raw())
        }
    }

    pub fn bits(&self) -> u32 {
        self.pkey.bits()
    }

    /// Unencrypted PKCS#8 DER
    pub fn private_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.pkey.private_key_to_pkcs8()?)
    }

    /// PKCS#8 DER encrypted with AES-256-CBC under `password`
    pub fn encrypted_private_key_der(&self, password: &str) -> Result<Vec<u8>> {
        Ok(self
            .pkey
            .private_key_to_pkcs8_passphrase(Cipher::aes_256_cbc(), password.as_bytes())?)
    }

    pub(crate) fn from_encrypted_der(der: &[u8], password: &str) -> Result<Self> {
        PKey::private_key_from_pkcs8_passphrase(der, password.as_bytes())
            .map(Self::from_pkey)
            .map_err(|_| CertError::WrongPassword("entry password does not decrypt the key".into()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm_name())
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/* -------------------------------------------------------------------------
 * Certificate
 * ---------------------------------------------------------------------- */

/// Standard X.509 certificate wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X509Certificate {
    /// DER-encoded certificate bytes
    der_bytes: Vec<u8>,
    /// Certificate subject
    subject: String,
    /// Certificate issuer
    issuer: String,
}

impl X509Certificate {
    /// Create from DER-encoded bytes
    pub fn from_der(der_bytes: Vec<u8>) -> Result<Self> {
        let (subject, issuer) = {
            let (_, parsed) = ParsedCertificate::from_der(&der_bytes).map_err(|e| {
                CertError::MalformedInput(format!("Failed to parse certificate: {e}"))
            })?;
            (parsed.subject().to_string(), parsed.issuer().to_string())
        };
        Ok(Self {
            der_bytes,
            subject,
            issuer,
        })
    }

    fn from_openssl(x509: &X509) -> Result<Self> {
        Self::from_der(x509.to_der()?)
    }

    pub fn der_bytes(&self) -> &[u8] {
        &self.der_bytes
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    pub(crate) fn to_openssl(&self) -> Result<X509> {
        X509::from_der(&self.der_bytes)
            .map_err(|e| CertError::MalformedInput(format!("Failed to load certificate: {e}")))
    }

    /// SubjectPublicKeyInfo DER of the embedded public key
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_openssl()?.public_key()?.public_key_to_der()?)
    }

    /// True when `key_pair` holds the private half of this certificate's key
    pub fn matches_key(&self, key_pair: &KeyPair) -> Result<bool> {
        let public = self.to_openssl()?.public_key()?;
        Ok(public.public_eq(key_pair.pkey()))
    }
}

/// Metadata extracted from a certificate for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDetails {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint: String,
    pub public_key_algorithm: String,
    pub signature_algorithm: String,
    pub version: u32,
}

impl CertificateDetails {
    pub fn validity(&self) -> Duration {
        self.not_after - self.not_before
    }
}

/// Types that have a PEM representation
pub trait ToPem {
    fn to_pem(&self) -> Result<Vec<u8>>;
}

impl ToPem for X509Certificate {
    fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.to_openssl()?.to_pem()?)
    }
}

impl ToPem for KeyPair {
    /// Unencrypted PKCS#8 PEM
    fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pkey.private_key_to_pem_pkcs8()?)
    }
}

fn is_encrypted_pem(text: &str) -> bool {
    text.contains("BEGIN ENCRYPTED PRIVATE KEY") || text.contains("Proc-Type: 4,ENCRYPTED")
}

/// PKCS#8 `EncryptedPrivateKeyInfo` structure
fn is_encrypted_der(bytes: &[u8]) -> bool {
    EncryptedPrivateKeyInfo::try_from(bytes).is_ok()
}

fn timestamp_to_utc(ts: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| CertError::MalformedInput(format!("timestamp out of range: {ts}")))
}

fn oid_name(dotted: &str) -> String {
    let name = match dotted {
        "1.2.840.113549.1.1.1" => "RSA",
        "1.2.840.10045.2.1" => "EC",
        "1.3.101.112" => "ED25519",
        "1.2.840.113549.1.1.5" => "SHA1withRSA",
        "1.2.840.113549.1.1.11" => "SHA256withRSA",
        "1.2.840.113549.1.1.12" => "SHA384withRSA",
        "1.2.840.113549.1.1.13" => "SHA512withRSA",
        "1.2.840.10045.4.3.2" => "SHA256withECDSA",
        "1.2.840.10045.4.3.3" => "SHA384withECDSA",
        "1.2.840.10045.4.3.4" => "SHA512withECDSA",
        other => return other.to_string(),
    };
    name.to_string()
}

/// Colon-separated upper-case hex of the SHA-256 digest of `der`
pub fn fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    hex::encode_upper(digest)
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/* -------------------------------------------------------------------------
 * Codec operations
 * ---------------------------------------------------------------------- */

/// Stateless entry point for every cryptographic construction and parse
pub struct KeyMaterialCodec;

impl KeyMaterialCodec {
    /// Generate a fresh key pair
    pub fn generate_key_pair(algorithm: KeyAlgorithm, key_size: u32) -> Result<KeyPair> {
        if !algorithm.supported_sizes().contains(&key_size) {
            return Err(CertError::UnsupportedAlgorithm(format!(
                "{algorithm} with key size {key_size}"
            )));
        }
        let pkey = match algorithm {
            KeyAlgorithm::Rsa => PKey::from_rsa(Rsa::generate(key_size)?)?,
            KeyAlgorithm::EcdsaP256 => {
                let signing_key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
                let der = signing_key.to_pkcs8_der().map_err(|e| {
                    CertError::InternalFailure(format!("PKCS#8 encoding error: {e}"))
                })?;
                PKey::private_key_from_pkcs8(der.as_bytes())?
            }
        };
        Ok(KeyPair::from_pkey(pkey))
    }

    /// Build a certificate whose issuer is its own subject
    pub fn build_self_signed_certificate(
        key_pair: &KeyPair,
        subject: &SubjectAttributes,
        validity: &ValidityPeriod,
        key_usages: &[KeyUsage],
    ) -> Result<X509Certificate> {
        let name = subject.to_x509_name()?;
        if validity.not_after <= validity.not_before {
            return Err(CertError::InvalidArgument(
                "validity period must end after it starts".to_string(),
            ));
        }

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;

        let serial = {
            let mut bn = BigNum::new()?;
            bn.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
            bn.to_asn1_integer()?
        };
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(key_pair.pkey())?;

        let not_before = Asn1Time::from_unix(validity.not_before.timestamp() as _)?;
        let not_after = Asn1Time::from_unix(validity.not_after.timestamp() as _)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        if !key_usages.is_empty() {
            let mut usage = X509KeyUsage::new();
            usage.critical();
            for flag in key_usages {
                match flag {
                    KeyUsage::DigitalSignature => usage.digital_signature(),
                    KeyUsage::NonRepudiation => usage.non_repudiation(),
                    KeyUsage::KeyEncipherment => usage.key_encipherment(),
                    KeyUsage::DataEncipherment => usage.data_encipherment(),
                    KeyUsage::KeyAgreement => usage.key_agreement(),
                };
            }
            builder.append_extension(usage.build()?)?;
        }
        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(ski)?;

        builder.sign(key_pair.pkey(), MessageDigest::sha256())?;
        X509Certificate::from_openssl(&builder.build())
    }

    /// PKCS#10 certificate signing request, DER encoded
    pub fn build_csr(key_pair: &KeyPair, subject: &SubjectAttributes) -> Result<Vec<u8>> {
        let name = subject.to_x509_name()?;
        let mut builder = X509ReqBuilder::new()?;
        builder.set_version(0)?;
        builder.set_subject_name(&name)?;
        builder.set_pubkey(key_pair.pkey())?;
        builder.sign(key_pair.pkey(), MessageDigest::sha256())?;
        Ok(builder.build().to_der()?)
    }

    /// PEM armor for a DER certificate signing request
    pub fn csr_to_pem(csr_der: &[u8]) -> Result<Vec<u8>> {
        let req = X509Req::from_der(csr_der)
            .map_err(|e| CertError::MalformedInput(format!("Failed to parse CSR: {e}")))?;
        Ok(req.to_pem()?)
    }

    /// SubjectPublicKeyInfo DER of the key requested by a CSR
    pub fn csr_public_key_der(csr_der: &[u8]) -> Result<Vec<u8>> {
        let req = X509Req::from_der(csr_der)
            .map_err(|e| CertError::MalformedInput(format!("Failed to parse CSR: {e}")))?;
        Ok(req.public_key()?.public_key_to_der()?)
    }

    pub fn parse_certificate(bytes: &[u8], encoding: Encoding) -> Result<X509Certificate> {
        let x509 = match encoding {
            Encoding::Pem => X509::from_pem(bytes),
            Encoding::Der => X509::from_der(bytes),
        }
        .map_err(|e| CertError::MalformedInput(format!("Failed to parse certificate: {e}")))?;
        X509Certificate::from_openssl(&x509)
    }

    /// Parse a private key.
    ///
    /// An encrypted key requires `password`; a password supplied for an
    /// unencrypted key is ignored. Bytes that are neither a plain nor an
    /// encrypted key are `MalformedInput` whether or not a password is given.
    pub fn parse_private_key(
        bytes: &[u8],
        encoding: Encoding,
        password: Option<&str>,
    ) -> Result<KeyPair> {
        if bytes.is_empty() {
            return Err(CertError::MalformedInput("private key is empty".to_string()));
        }
        let password = password.filter(|p| !p.is_empty());
        let pkey = match encoding {
            Encoding::Pem => {
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    CertError::MalformedInput("PEM private key is not valid text".to_string())
                })?;
                if !text.contains("PRIVATE KEY") {
                    return Err(CertError::MalformedInput(
                        "no private key PEM block found".to_string(),
                    ));
                }
                if is_encrypted_pem(text) {
                    let password = password.ok_or_else(|| {
                        CertError::WrongPassword(
                            "private key is encrypted and no password was supplied".to_string(),
                        )
                    })?;
                    PKey::private_key_from_pem_passphrase(bytes, password.as_bytes()).map_err(
                        |_| CertError::WrongPassword("password does not decrypt the key".into()),
                    )?
                } else {
                    PKey::private_key_from_pem(bytes).map_err(|e| {
                        CertError::MalformedInput(format!("Failed to parse private key: {e}"))
                    })?
                }
            }
            Encoding::Der => match PKey::private_key_from_der(bytes) {
                Ok(pkey) => pkey,
                Err(e) if !is_encrypted_der(bytes) => {
                    return Err(CertError::MalformedInput(format!(
                        "Failed to parse private key: {e}"
                    )))
                }
                Err(_) => {
                    let password = password.ok_or_else(|| {
                        CertError::WrongPassword(
                            "private key is encrypted and no password was supplied".to_string(),
                        )
                    })?;
                    PKey::private_key_from_pkcs8_passphrase(bytes, password.as_bytes()).map_err(
                        |_| CertError::WrongPassword("password does not decrypt the key".into()),
                    )?
                }
            },
        };
        Ok(KeyPair::from_pkey(pkey))
    }

    /// PEM for a certificate or a private key
    pub fn to_pem<T: ToPem + ?Sized>(item: &T) -> Result<Vec<u8>> {
        item.to_pem()
    }

    /// Passphrase-protected PKCS#8 PEM
    pub fn private_key_to_encrypted_pem(key_pair: &KeyPair, password: &str) -> Result<Vec<u8>> {
        if password.is_empty() {
            return Err(CertError::InvalidArgument("password must not be empty".into()));
        }
        Ok(key_pair
            .pkey
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), password.as_bytes())?)
    }

    /// PKCS#12 bundle holding one certificate and its private key
    pub fn to_pkcs12(
        certificate: &X509Certificate,
        key_pair: &KeyPair,
        friendly_name: &str,
        container_password: &str,
    ) -> Result<Vec<u8>> {
        if container_password.is_empty() {
            return Err(CertError::InvalidArgument(
                "PKCS#12 password must not be empty".to_string(),
            ));
        }
        let x509 = certificate.to_openssl()?;
        let pkcs12 = Pkcs12::builder()
            .name(friendly_name)
            .pkey(key_pair.pkey())
            .cert(&x509)
            .build2(container_password)?;
        Ok(pkcs12.to_der()?)
    }

    /// Certificate and key from a PKCS#12 bundle
    pub fn parse_pkcs12(bytes: &[u8], password: &str) -> Result<(X509Certificate, KeyPair)> {
        let pkcs12 = Pkcs12::from_der(bytes)
            .map_err(|e| CertError::MalformedInput(format!("Failed to parse PKCS#12: {e}")))?;
        let parsed = pkcs12
            .parse2(password)
            .map_err(|_| CertError::WrongPassword("password does not open PKCS#12".into()))?;
        let x509 = parsed
            .cert
            .ok_or_else(|| CertError::MalformedInput("PKCS#12 has no certificate".into()))?;
        let pkey = parsed
            .pkey
            .ok_or_else(|| CertError::MalformedInput("PKCS#12 has no private key".into()))?;
        Ok((X509Certificate::from_openssl(&x509)?, KeyPair::from_pkey(pkey)))
    }

    pub fn extract_metadata(certificate: &X509Certificate) -> Result<CertificateDetails> {
        let der = certificate.der_bytes();
        let (_, parsed) = ParsedCertificate::from_der(der)
            .map_err(|e| CertError::MalformedInput(format!("Failed to parse certificate: {e}")))?;
        let validity = parsed.validity();
        Ok(CertificateDetails {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            serial_number: parsed.raw_serial_as_string(),
            not_before: timestamp_to_utc(validity.not_before.timestamp())?,
            not_after: timestamp_to_utc(validity.not_after.timestamp())?,
            fingerprint: fingerprint(der),
            public_key_algorithm: oid_name(&parsed.public_key().algorithm.algorithm.to_id_string()),
            signature_algorithm: oid_name(&parsed.signature_algorithm.algorithm.to_id_string()),
            version: parsed.version().0 + 1,
        })
    }
}
