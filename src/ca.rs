//! Certificate authority for terminating intercepted TLS sessions
//!
//! Generates and persists a local CA keypair, then mints per-host leaf
//! certificates on demand so clients that trust the CA accept the proxy as
//! the origin server.

use crate::error::{Error, Result};
use crate::http1::split_authority;
use moka::future::Cache;
use rand::RngCore;
use rcgen::{
  BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
  Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Leaf certificate validity period (1 year)
const LEAF_TTL_DAYS: i64 = 365;
/// CA certificate validity period (10 years)
const CA_TTL_DAYS: i64 = 10 * 365;
/// Backdate for not_before timestamps to absorb clock skew (1 hour)
const NOT_BEFORE_BACKDATE_HOURS: i64 = 1;

/// A minted chain: leaf first, then the CA certificate, plus the leaf key.
pub type CertifiedChain = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Certificate authority with an in-memory per-host leaf cache.
///
/// The cache is monotonic: leaves are never evicted within a process
/// lifetime. Two callers racing on the same missing host may both mint;
/// either result is a usable chain.
pub struct CertificateAuthority {
  issuer: Issuer<'static, KeyPair>,
  ca_cert_der: CertificateDer<'static>,
  config_dir: PathBuf,
  leaf_cache: Cache<String, Arc<CertifiedChain>>,
}

impl CertificateAuthority {
  /// Loads the CA from `ca.pem` / `ca-key.pem` in the given directory, or
  /// generates and persists a fresh one when either file is missing.
  pub async fn new(config_dir: impl AsRef<Path>) -> Result<Self> {
    let config_dir = config_dir.as_ref().to_path_buf();
    if !config_dir.exists() {
      fs::create_dir_all(&config_dir).await?;
    }

    let cert_path = config_dir.join("ca.pem");
    let key_path = config_dir.join("ca-key.pem");

    let (issuer, ca_cert_der) = if cert_path.exists() && key_path.exists() {
      Self::load_ca(&cert_path, &key_path).await?
    } else {
      Self::generate_ca(&cert_path, &key_path).await?
    };

    Ok(Self {
      issuer,
      ca_cert_der,
      config_dir,
      leaf_cache: Cache::builder().build(),
    })
  }

  /// Path of the PEM-encoded CA certificate, for trust-store installation.
  pub fn ca_cert_path(&self) -> PathBuf {
    self.config_dir.join("ca.pem")
  }

  /// The CA certificate in PEM format.
  pub fn ca_cert_pem(&self) -> Result<String> {
    std::fs::read_to_string(self.ca_cert_path())
      .map_err(|e| Error::certificate_error(format!("Failed to read CA cert: {}", e)))
  }

  /// Returns a TLS chain for the given host authority, minting and caching
  /// a leaf on first use. Any port suffix is ignored.
  pub async fn get_certificate(&self, host_authority: &str) -> Result<CertifiedChain> {
    let (host, _port) = split_authority(host_authority);

    if let Some(cached) = self.leaf_cache.get(host).await {
      let (chain, key) = cached.as_ref();
      return Ok((chain.clone(), key.clone_key()));
    }

    let (chain, key) = self.mint_leaf(host)?;
    self
      .leaf_cache
      .insert(host.to_string(), Arc::new((chain.clone(), key.clone_key())))
      .await;
    Ok((chain, key))
  }

  async fn load_ca(
    cert_path: &Path,
    key_path: &Path,
  ) -> Result<(Issuer<'static, KeyPair>, CertificateDer<'static>)> {
    let cert_pem = fs::read_to_string(cert_path).await?;
    let key_pem = fs::read_to_string(key_path).await?;

    let key_pair = KeyPair::from_pem(&key_pem)
      .map_err(|e| Error::certificate_error(format!("Failed to parse CA key: {}", e)))?;

    let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair).map_err(|e| {
      Error::certificate_error(format!("Failed to create issuer from CA cert: {}", e))
    })?;

    let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
      .next()
      .ok_or_else(|| Error::certificate_error("No certificate found in CA PEM"))?
      .map_err(|e| Error::certificate_error(format!("Failed to parse CA PEM: {}", e)))?;

    Ok((issuer, cert_der))
  }

  async fn generate_ca(
    cert_path: &Path,
    key_path: &Path,
  ) -> Result<(Issuer<'static, KeyPair>, CertificateDer<'static>)> {
    let mut params = CertificateParams::default();
    params.serial_number = Some(random_serial());

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "GraphTap CA");
    dn.push(DnType::OrganizationName, "GraphTap");
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(1));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(NOT_BEFORE_BACKDATE_HOURS);
    params.not_after = now + Duration::days(CA_TTL_DAYS);

    let key_pair = KeyPair::generate()
      .map_err(|e| Error::certificate_error(format!("Failed to generate CA key pair: {}", e)))?;

    let cert = params
      .self_signed(&key_pair)
      .map_err(|e| Error::certificate_error(format!("Failed to self-sign CA: {}", e)))?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    let mut cert_file = fs::File::create(cert_path).await?;
    cert_file.write_all(cert_pem.as_bytes()).await?;

    let mut key_file = fs::File::create(key_path).await?;
    key_file.write_all(key_pem.as_bytes()).await?;
    key_file.flush().await?;
    drop(key_file);

    // The CA private key is readable by the owner only.
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    let cert_der = CertificateDer::from(cert.der().to_vec());

    let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
      .map_err(|e| Error::certificate_error(format!("Failed to create issuer: {}", e)))?;

    Ok((issuer, cert_der))
  }

  /// Mints a leaf certificate for a specific host, signed by the CA.
  fn mint_leaf(&self, host: &str) -> Result<CertifiedChain> {
    let mut params = CertificateParams::default();
    params.serial_number = Some(random_serial());

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, host);
    params.distinguished_name = dn;

    params.subject_alt_names = vec![if let Ok(ip) = host.parse::<IpAddr>() {
      SanType::IpAddress(ip)
    } else {
      SanType::DnsName(
        host
          .try_into()
          .map_err(|_| Error::certificate_error(format!("Invalid host name: {}", host)))?,
      )
    }];

    params.key_usages = vec![
      KeyUsagePurpose::DigitalSignature,
      KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(NOT_BEFORE_BACKDATE_HOURS);
    params.not_after = now + Duration::days(LEAF_TTL_DAYS);

    let key_pair = KeyPair::generate()
      .map_err(|e| Error::certificate_error(format!("Failed to generate leaf key pair: {}", e)))?;

    let cert = params
      .signed_by(&key_pair, &self.issuer)
      .map_err(|e| Error::certificate_error(format!("Failed to sign leaf for {}: {}", host, e)))?;

    let leaf_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
      .map_err(|_| Error::certificate_error("Failed to serialize leaf key"))?;

    Ok((vec![leaf_der, self.ca_cert_der.clone()], key_der))
  }
}

fn random_serial() -> rcgen::SerialNumber {
  let mut serial = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut serial);
  serial.to_vec().into()
}
