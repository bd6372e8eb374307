//! OpenPGP signature verification for repository metadata and packages
//!
//! Uses sequoia-openpgp (pure Rust). A verifier trusts exactly one key,
//! imported from a key file and pinned by its fingerprint.

use std::fs;
use std::path::Path;

use sequoia_openpgp as openpgp;
use openpgp::cert::CertParser;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::{Cert, Packet, PacketPile};
use tracing::{debug, info, warn};

use crate::error::{Result, TidepkgError};
use crate::fetch::SignatureVerifier;

/// Verifies detached signatures made by one trusted key
pub struct GpgVerifier {
    cert: Cert,
    fingerprint: String,
    policy: StandardPolicy<'static>,
}

impl GpgVerifier {
    /// Import the single key in `key_path` and require it to match
    /// `expected_fingerprint` (separators and case are ignored)
    pub fn load(key_path: &Path, expected_fingerprint: &str) -> Result<Self> {
        let data = fs::read(key_path)?;
        Self::from_bytes(&data, expected_fingerprint)
    }

    /// Import a key from memory; see [`GpgVerifier::load`]
    pub fn from_bytes(data: &[u8], expected_fingerprint: &str) -> Result<Self> {
        let certs = CertParser::from_bytes(data)
            .map_err(|e| TidepkgError::Parse(format!("Failed to parse GPG key: {}", e)))?
            .collect::<std::result::Result<Vec<Cert>, _>>()
            .map_err(|e| TidepkgError::Parse(format!("Failed to parse GPG key: {}", e)))?;

        let cert = match <[Cert; 1]>::try_from(certs) {
            Ok([cert]) => cert,
            Err(certs) => {
                return Err(TidepkgError::Parse(format!(
                    "Expected exactly one key in key file, found {}",
                    certs.len()
                )))
            }
        };

        let fingerprint = normalize_fingerprint(&cert.fingerprint().to_hex());
        let expected = normalize_fingerprint(expected_fingerprint);
        if fingerprint != expected {
            warn!("GPG key fingerprint {} does not match {}", fingerprint, expected);
            return Err(TidepkgError::KeyFingerprintMismatch {
                expected,
                actual: fingerprint,
            });
        }

        info!("Imported GPG key {}", fingerprint);
        Ok(Self {
            cert,
            fingerprint,
            policy: StandardPolicy::new(),
        })
    }

    /// Fingerprint of the trusted key (lowercase hex)
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn check(&self, file: &Path, signature: &Path) -> Result<bool> {
        let message = fs::read(file)?;
        let signature_data = fs::read(signature)?;
        let pile = PacketPile::from_bytes(&signature_data)
            .map_err(|e| TidepkgError::Parse(format!("Failed to parse signature: {}", e)))?;

        for packet in pile.descendants() {
            if let Packet::Signature(sig) = packet {
                for key in self.cert.keys().with_policy(&self.policy, None) {
                    if key.for_signing() && sig.verify_message(key.key(), &message).is_ok() {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }
}

impl SignatureVerifier for GpgVerifier {
    fn verify(&self, file: &Path, signature: &Path) -> bool {
        match self.check(file, signature) {
            Ok(true) => {
                debug!("Good signature for {}", file.display());
                true
            }
            Ok(false) => {
                warn!("Bad signature for {}", file.display());
                false
            }
            Err(e) => {
                warn!("Cannot verify {}: {}", file.display(), e);
                false
            }
        }
    }
}

/// Lowercase hex with spaces and colons removed
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpgp::cert::CertBuilder;
    use openpgp::serialize::SerializeInto;

    fn generate() -> (Vec<u8>, String) {
        let (cert, _revocation) = CertBuilder::general_purpose(None, Some("Test Repository <repo@example.org>"))
            .generate()
            .unwrap();
        let armored = cert.armored().to_vec().unwrap();
        (armored, cert.fingerprint().to_hex())
    }

    #[test]
    fn test_normalize_fingerprint() {
        assert_eq!(
            normalize_fingerprint("40F3 D0C6 3BB1:B42C"),
            "40f3d0c63bb1b42c"
        );
    }

    #[test]
    fn test_fingerprint_must_match() {
        let (key, fingerprint) = generate();

        let verifier = GpgVerifier::from_bytes(&key, &fingerprint.to_lowercase()).unwrap();
        assert_eq!(verifier.fingerprint(), fingerprint.to_lowercase());

        let result = GpgVerifier::from_bytes(&key, "0000000000000000000000000000000000000000");
        assert!(matches!(result, Err(TidepkgError::KeyFingerprintMismatch { .. })));
    }

    #[test]
    fn test_exactly_one_key() {
        let (first, fingerprint) = generate();
        let (second, _) = generate();

        let mut both = first.clone();
        both.extend_from_slice(&second);
        assert!(GpgVerifier::from_bytes(&both, &fingerprint).is_err());
        assert!(GpgVerifier::from_bytes(b"not a key", &fingerprint).is_err());
    }

    #[test]
    fn test_bad_or_missing_signature_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let (key, fingerprint) = generate();
        let key_path = dir.path().join("GPG-KEY");
        fs::write(&key_path, &key).unwrap();
        let verifier = GpgVerifier::load(&key_path, &fingerprint).unwrap();

        let file = dir.path().join("CHECKSUMS.md5");
        fs::write(&file, "checksums").unwrap();
        let signature = dir.path().join("CHECKSUMS.md5.asc");

        assert!(!verifier.verify(&file, &signature));

        fs::write(&signature, "-----BEGIN PGP SIGNATURE-----\ngarbage\n").unwrap();
        assert!(!verifier.verify(&file, &signature));
    }
}
