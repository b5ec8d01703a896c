// src/connect/keypair.rs

use pkcs8::der::SecretDocument;
use pkcs8::der::pem::PemLabel;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Could not read private key file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{path}' is not a PEM private key: {reason}")]
    NotPem { path: String, reason: String },
    #[error("'{path}' holds a '{label}' block, expected a PKCS#8 private key.")]
    UnsupportedLabel { path: String, label: String },
    #[error("Private key in '{path}' is malformed: {reason}")]
    Malformed { path: String, reason: String },
    #[error("Private key in '{path}' is encrypted but no passphrase was given.")]
    MissingPassphrase { path: String },
    #[error("Could not decrypt the private key in '{path}'; check the passphrase.")]
    Decrypt { path: String },
}

/// A decrypted PKCS#8 private key.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pub der: Vec<u8>,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("der", &format_args!("<{} bytes>", self.der.len()))
            .finish()
    }
}

/// Reads a PEM-armoured PKCS#8 private key, decrypting it with `passphrase`
/// when the file holds an `ENCRYPTED PRIVATE KEY`.
///
/// # Errors
/// Any read or armour failure, an encrypted key without passphrase, a
/// passphrase that does not open the key, or a body that is not PKCS#8.
pub fn load_private_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKey, KeyError> {
    let label = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| KeyError::Read {
        path: label.clone(),
        source,
    })?;

    let (pem_label, document) = SecretDocument::from_pem(text.trim()).map_err(|e| KeyError::NotPem {
        path: label.clone(),
        reason: e.to_string(),
    })?;
    let malformed = |reason: String| KeyError::Malformed {
        path: label.clone(),
        reason,
    };

    let plain = if pem_label == EncryptedPrivateKeyInfo::PEM_LABEL {
        let Some(phrase) = passphrase.filter(|p| !p.is_empty()) else {
            return Err(KeyError::MissingPassphrase { path: label.clone() });
        };
        let sealed = EncryptedPrivateKeyInfo::try_from(document.as_bytes()).map_err(|e| malformed(e.to_string()))?;
        sealed.decrypt(phrase).map_err(|e| {
            log::debug!("Decrypting '{}' failed: {}", label, e);
            KeyError::Decrypt { path: label.clone() }
        })?
    } else if pem_label == PrivateKeyInfo::PEM_LABEL {
        document
    } else {
        return Err(KeyError::UnsupportedLabel {
            path: label.clone(),
            label: pem_label.to_string(),
        });
    };

    PrivateKeyInfo::try_from(plain.as_bytes()).map_err(|e| malformed(e.to_string()))?;
    log::debug!("Private key loaded from '{}' ({} bytes).", label, plain.as_bytes().len());
    Ok(PrivateKey {
        der: plain.as_bytes().to_vec(),
    })
}
