//! TLS support
//!
//! Self-signed certificate generation with persistent storage in the data
//! directory, plus the SHA-256 fingerprint admins can use to verify the
//! connection from a pairing device.

use axum_server::tls_rustls::RustlsConfig;
use chrono::{DateTime, Duration, Utc};
use hearthlink_core::{Error, Result};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, info};

/// Certificate validity period
const CERT_VALIDITY_DAYS: i64 = 365;

/// Regenerate when less than this many days remain
const CERT_RENEWAL_THRESHOLD_DAYS: i64 = 30;

/// Certificate metadata persisted next to the PEM files
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CertMetadata {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    fingerprint: String,
    hostnames: Vec<String>,
}

/// Manages the server certificate in the data directory
pub struct TlsManager {
    data_dir: PathBuf,
}

impl TlsManager {
    /// Create a manager rooted at the given data directory
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    fn cert_path(&self) -> PathBuf {
        self.data_dir.join("server.crt")
    }

    fn key_path(&self) -> PathBuf {
        self.data_dir.join("server.key")
    }

    fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("cert_meta.json")
    }

    /// Load the stored certificate, generating a fresh one if it is missing,
    /// expiring soon, or was issued for different hostnames
    ///
    /// Returns (cert PEM, key PEM, fingerprint).
    pub fn load_or_generate(&self, hostnames: &[String]) -> Result<(String, String, String)> {
        if let Some(meta) = self.load_metadata() {
            if !self.needs_renewal(&meta, hostnames)
                && self.cert_path().exists()
                && self.key_path().exists()
            {
                info!("Loading existing certificate (expires {})", meta.expires_at);
                let cert_pem = std::fs::read_to_string(self.cert_path())?;
                let key_pem = std::fs::read_to_string(self.key_path())?;
                return Ok((cert_pem, key_pem, meta.fingerprint));
            }
            debug!("Stored certificate needs regeneration");
        }

        info!("Generating new self-signed certificate");
        let (cert_pem, key_pem) = generate_self_signed_cert(hostnames)?;
        let fingerprint = calculate_cert_fingerprint(&cert_pem);

        std::fs::write(self.cert_path(), &cert_pem)?;
        std::fs::write(self.key_path(), &key_pem)?;

        let meta = CertMetadata {
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(CERT_VALIDITY_DAYS),
            fingerprint: fingerprint.clone(),
            hostnames: hostnames.to_vec(),
        };
        let json = serde_json::to_string_pretty(&meta)?;
        std::fs::write(self.metadata_path(), json)?;

        info!("Certificate saved to {:?}", self.cert_path());
        Ok((cert_pem, key_pem, fingerprint))
    }

    fn needs_renewal(&self, meta: &CertMetadata, hostnames: &[String]) -> bool {
        if meta.expires_at - Utc::now() < Duration::days(CERT_RENEWAL_THRESHOLD_DAYS) {
            return true;
        }

        let mut current: Vec<&String> = hostnames.iter().collect();
        let mut stored: Vec<&String> = meta.hostnames.iter().collect();
        current.sort();
        stored.sort();
        current != stored
    }

    fn load_metadata(&self) -> Option<CertMetadata> {
        let contents = std::fs::read_to_string(self.metadata_path()).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

/// Generate a self-signed certificate for the given hostnames/IPs
pub fn generate_self_signed_cert(hostnames: &[String]) -> Result<(String, String)> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "HearthLink");
    dn.push(DnType::OrganizationName, "HearthLink");
    params.distinguished_name = dn;

    let mut san_list = vec![SanType::DnsName(
        "localhost"
            .try_into()
            .map_err(|e| Error::internal(format!("invalid SAN: {}", e)))?,
    )];
    san_list.push(SanType::IpAddress(std::net::IpAddr::V4(
        std::net::Ipv4Addr::new(127, 0, 0, 1),
    )));

    for hostname in hostnames {
        if let Ok(ip) = hostname.parse::<std::net::IpAddr>() {
            san_list.push(SanType::IpAddress(ip));
        } else if let Ok(dns) = hostname.as_str().try_into() {
            san_list.push(SanType::DnsName(dns));
        }
    }
    params.subject_alt_names = san_list;

    let key_pair =
        KeyPair::generate().map_err(|e| Error::internal(format!("key generation: {}", e)))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::internal(format!("certificate generation: {}", e)))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// SHA-256 fingerprint of a certificate as colon-separated hex pairs
pub fn calculate_cert_fingerprint(cert_pem: &str) -> String {
    let digest = Sha256::digest(cert_pem.as_bytes());
    digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Create a RustlsConfig from PEM strings
pub async fn create_rustls_config(cert_pem: &str, key_pem: &str) -> Result<RustlsConfig> {
    RustlsConfig::from_pem(cert_pem.as_bytes().to_vec(), key_pem.as_bytes().to_vec())
        .await
        .map_err(|e| Error::internal(format!("TLS config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cert_generation() {
        let hostnames = vec!["192.168.1.50".to_string()];
        let (cert, key) = generate_self_signed_cert(&hostnames).unwrap();
        assert!(cert.contains("BEGIN CERTIFICATE"));
        assert!(key.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = calculate_cert_fingerprint("-----BEGIN CERTIFICATE-----\nx\n-----END CERTIFICATE-----");
        assert!(fp.contains(':'));
        assert_eq!(fp.len(), 95); // 32 bytes * 2 hex + 31 colons
    }

    #[test]
    fn test_load_or_generate_is_stable() {
        let dir = tempdir().unwrap();
        let manager = TlsManager::new(dir.path().to_path_buf()).unwrap();
        let hostnames = vec!["localhost".to_string()];

        let (cert1, key1, fp1) = manager.load_or_generate(&hostnames).unwrap();
        let (cert2, key2, fp2) = manager.load_or_generate(&hostnames).unwrap();
        assert_eq!(cert1, cert2);
        assert_eq!(key1, key2);
        assert_eq!(fp1, fp2);

        // A changed hostname set forces regeneration
        let (cert3, _, fp3) = manager
            .load_or_generate(&["10.0.0.7".to_string()])
            .unwrap();
        assert_ne!(cert1, cert3);
        assert_ne!(fp1, fp3);
    }
}
