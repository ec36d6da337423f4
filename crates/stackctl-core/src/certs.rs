//! Self-signed TLS material for the reverse proxy.
//!
//! The key and certificate are a unit: both are staged next to their final
//! location and renamed into place together. A failed second rename restores
//! the previous key, so the directory never holds a mismatched pair.

use crate::config::Settings;
use crate::error::ProvisionError;
use crate::io::{self, LockFile};
use crate::paths;
use chrono::{DateTime, Duration, Utc};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;

pub const MIN_KEY_BITS: usize = 2048;
pub const DEFAULT_RENEWAL_THRESHOLD_DAYS: u32 = 30;

const CERT_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    /// Lock file serializing concurrent provisioning, if any.
    pub lock: Option<PathBuf>,
}

impl CertPaths {
    pub fn in_dir(dir: &Path, cert_file: &str, key_file: &str) -> Self {
        Self {
            cert: dir.join(cert_file),
            key: dir.join(key_file),
            lock: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let certs = &settings.stack.certs;
        Self {
            lock: Some(paths::ssl_lock_path(&settings.root)),
            ..Self::in_dir(&settings.cert_dir(), &certs.cert_file, &certs.key_file)
        }
    }

    pub fn with_lock(mut self, lock: PathBuf) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn pair_exists(&self) -> bool {
        self.cert.exists() && self.key.exists()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionAction {
    Created,
    Renewed,
    Reused,
}

impl ProvisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionAction::Created => "created",
            ProvisionAction::Renewed => "renewed",
            ProvisionAction::Reused => "reused",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateRecord {
    pub common_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject_alt_names: Vec<String>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub action: ProvisionAction,
    #[serde(skip)]
    pub cert_pem: String,
    #[serde(skip)]
    pub key_pem: String,
}

impl CertificateRecord {
    /// Whole days until expiry, rounded toward zero.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertOptions {
    pub common_name: String,
    pub validity_days: u32,
    pub renewal_threshold_days: u32,
    pub key_bits: usize,
}

impl CertOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let certs = &settings.stack.certs;
        Self {
            common_name: settings.common_name().to_string(),
            validity_days: certs.validity_days,
            renewal_threshold_days: certs.renewal_threshold_days,
            key_bits: certs.key_bits,
        }
    }

    fn validate(&self) -> Result<(), ProvisionError> {
        let cn = self.common_name.trim();
        if cn.is_empty() || cn.len() > 64 || cn.chars().any(char::is_whitespace) {
            return Err(ProvisionError::GenerationFailed(format!(
                "invalid common name '{}'",
                self.common_name
            )));
        }
        if self.key_bits < MIN_KEY_BITS {
            return Err(ProvisionError::GenerationFailed(format!(
                "key size {} is below the {MIN_KEY_BITS}-bit minimum",
                self.key_bits
            )));
        }
        if self.validity_days == 0 {
            return Err(ProvisionError::GenerationFailed(
                "validity must be at least one day".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

/// Ensure a usable key/certificate pair exists at `paths`, generating a
/// 2048-bit RSA pair when missing, mismatched, or within
/// `renewal_threshold_days` of expiry.
pub fn ensure_certificate(
    paths: &CertPaths,
    common_name: &str,
    validity_days: u32,
    renewal_threshold_days: u32,
) -> Result<CertificateRecord, ProvisionError> {
    let opts = CertOptions {
        common_name: common_name.to_string(),
        validity_days,
        renewal_threshold_days,
        key_bits: MIN_KEY_BITS,
    };
    ensure_with(paths, &opts, Utc::now())
}

/// [`ensure_certificate`] with explicit options and clock.
pub fn ensure_with(
    paths: &CertPaths,
    opts: &CertOptions,
    now: DateTime<Utc>,
) -> Result<CertificateRecord, ProvisionError> {
    opts.validate()?;
    if opts.validity_days <= opts.renewal_threshold_days {
        tracing::warn!(
            validity_days = opts.validity_days,
            renewal_threshold_days = opts.renewal_threshold_days,
            "validity does not exceed the renewal threshold; every run will regenerate"
        );
    }

    let _lock = match &paths.lock {
        Some(lock_path) => Some(
            LockFile::try_acquire(lock_path)?
                .ok_or_else(|| ProvisionError::Locked(lock_path.clone()))?,
        ),
        None => None,
    };

    let action = match (paths.cert.exists(), paths.key.exists()) {
        (true, true) => {
            let existing = read_pair(paths, ProvisionAction::Reused)?;
            let days_left = existing.record.days_left(now);
            if !existing.key_matches {
                tracing::warn!(
                    cert = %paths.cert.display(),
                    "private key does not match certificate; regenerating pair"
                );
                ProvisionAction::Renewed
            } else if days_left < i64::from(opts.renewal_threshold_days) {
                tracing::info!(
                    days_left,
                    threshold = opts.renewal_threshold_days,
                    "certificate near expiry; regenerating"
                );
                ProvisionAction::Renewed
            } else {
                tracing::info!(
                    days_left,
                    common_name = %existing.record.common_name,
                    "certificate still valid"
                );
                return Ok(existing.record);
            }
        }
        (false, false) => ProvisionAction::Created,
        (cert, key) => {
            tracing::warn!(
                cert_present = cert,
                key_present = key,
                "incomplete certificate pair; regenerating"
            );
            ProvisionAction::Created
        }
    };

    let pair = generate(opts, now)?;
    write_pair(paths, &pair)?;
    let record = inspect(&pair.cert_pem, &pair.key_pem, paths, action)?.record;
    tracing::info!(
        action = action.as_str(),
        common_name = %record.common_name,
        not_after = %record.not_after,
        cert = %paths.cert.display(),
        "certificate provisioned"
    );
    Ok(record)
}

/// Read the current pair without modifying anything. `Ok(None)` when either
/// file is missing.
pub fn inspect_certificate(paths: &CertPaths) -> Result<Option<CertificateRecord>, ProvisionError> {
    if !paths.pair_exists() {
        return Ok(None);
    }
    Ok(Some(read_pair(paths, ProvisionAction::Reused)?.record))
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

struct GeneratedPair {
    cert_pem: String,
    key_pem: String,
}

fn generation_failed(e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::GenerationFailed(e.to_string())
}

/// `localhost`, `127.0.0.1` and the common name, without duplicates.
pub fn subject_alt_names(common_name: &str) -> Vec<String> {
    let mut sans = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    let cn = common_name.trim().to_string();
    if !sans.contains(&cn) {
        sans.push(cn);
    }
    sans
}

fn to_offset(dt: DateTime<Utc>) -> Result<time::OffsetDateTime, ProvisionError> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp()).map_err(generation_failed)
}

fn generate(opts: &CertOptions, now: DateTime<Utc>) -> Result<GeneratedPair, ProvisionError> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, opts.key_bits).map_err(generation_failed)?;
    let key_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(generation_failed)?
        .as_str()
        .to_owned();
    let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256)
        .map_err(generation_failed)?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, opts.common_name.trim());
    params.distinguished_name = dn;

    for san in subject_alt_names(&opts.common_name) {
        let san = match san.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(san.try_into().map_err(generation_failed)?),
        };
        params.subject_alt_names.push(san);
    }

    params.not_before = to_offset(now)?;
    params.not_after = to_offset(now + Duration::days(i64::from(opts.validity_days)))?;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let cert = params.self_signed(&key_pair).map_err(generation_failed)?;
    Ok(GeneratedPair {
        cert_pem: cert.pem(),
        key_pem,
    })
}

fn write_pair(paths: &CertPaths, pair: &GeneratedPair) -> Result<(), ProvisionError> {
    let previous_key = if paths.key.exists() {
        Some(std::fs::read(&paths.key)?)
    } else {
        None
    };

    // Stage both before touching either destination.
    let key_tmp = io::stage_file(&paths.key, pair.key_pem.as_bytes(), KEY_MODE)?;
    let cert_tmp = io::stage_file(&paths.cert, pair.cert_pem.as_bytes(), CERT_MODE)?;

    key_tmp.persist(&paths.key).map_err(|e| e.error)?;
    if let Err(e) = cert_tmp.persist(&paths.cert) {
        let restored = match previous_key {
            Some(bytes) => io::atomic_write(&paths.key, &bytes, KEY_MODE),
            None => std::fs::remove_file(&paths.key),
        };
        if let Err(rollback) = restored {
            tracing::error!(
                key = %paths.key.display(),
                error = %rollback,
                "failed to restore previous key after certificate write failure"
            );
        }
        return Err(e.error.into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct Inspected {
    record: CertificateRecord,
    key_matches: bool,
}

fn read_pair(paths: &CertPaths, action: ProvisionAction) -> Result<Inspected, ProvisionError> {
    let cert_pem = std::fs::read_to_string(&paths.cert).map_err(|e| ProvisionError::Corrupt {
        path: paths.cert.clone(),
        reason: e.to_string(),
    })?;
    let key_pem = std::fs::read_to_string(&paths.key).map_err(|e| ProvisionError::Corrupt {
        path: paths.key.clone(),
        reason: e.to_string(),
    })?;
    inspect(&cert_pem, &key_pem, paths, action)
}

fn parse_private_key(key_pem: &str) -> Option<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(key_pem)
        .ok()
        .or_else(|| RsaPrivateKey::from_pkcs1_pem(key_pem).ok())
}

fn inspect(
    cert_pem: &str,
    key_pem: &str,
    paths: &CertPaths,
    action: ProvisionAction,
) -> Result<Inspected, ProvisionError> {
    let corrupt_cert = |reason: String| ProvisionError::Corrupt {
        path: paths.cert.clone(),
        reason,
    };

    let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).map_err(|e| corrupt_cert(e.to_string()))?;
    let cert = pem.parse_x509().map_err(|e| corrupt_cert(e.to_string()))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let validity = cert.validity();
    let not_before = DateTime::<Utc>::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| corrupt_cert("not-before out of range".to_string()))?;
    let not_after = DateTime::<Utc>::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| corrupt_cert("not-after out of range".to_string()))?;

    let mut subject_alt_names = Vec::new();
    if let Ok(Some(ext)) = cert.subject_alternative_name() {
        for name in &ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => subject_alt_names.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        subject_alt_names.push(ip.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    let private = parse_private_key(key_pem).ok_or_else(|| ProvisionError::Corrupt {
        path: paths.key.clone(),
        reason: "not an RSA private key in PKCS#8 or PKCS#1 PEM form".to_string(),
    })?;
    let cert_public = RsaPublicKey::from_public_key_der(cert.public_key().raw).ok();
    let key_matches = cert_public.as_ref() == Some(&private.to_public_key());

    Ok(Inspected {
        record: CertificateRecord {
            common_name,
            not_before,
            not_after,
            subject_alt_names,
            cert_path: paths.cert.clone(),
            key_path: paths.key.clone(),
            action,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        },
        key_matches,
    })
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}
