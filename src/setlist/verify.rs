use std::{fs::File, path::Path, sync::Arc};

use minisign::{PublicKey, PublicKeyBox, SignatureBox};

use crate::{
    config::EMBEDDED_PUBLIC_KEY,
    errors::{AnyError, ErrorInfo, Result},
};

/// Checks detached minisign signatures against a single trusted key.
#[derive(Clone)]
pub struct SignatureVerifier {
    public_key: Arc<PublicKey>,
}

impl SignatureVerifier {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key: Arc::new(public_key),
        }
    }

    /// Parses a public key in minisign's `.pub` file format.
    pub fn from_public_key_box(key: &str) -> std::result::Result<Self, minisign::PError> {
        let public_key = PublicKeyBox::from_string(key)?.into_public_key()?;
        Ok(Self::new(public_key))
    }

    /// Verifier for the key compiled into the launcher.
    pub fn embedded() -> Self {
        Self::from_public_key_box(EMBEDDED_PUBLIC_KEY).expect("embedded public key is valid")
    }

    /// Succeeds only when `signature` is a valid signature of `archive`.
    ///
    /// Blocking; run it off the async executor.
    pub fn verify(&self, archive: &Path, signature: &Path) -> Result<()> {
        let sig_box = SignatureBox::from_file(signature).map_err(|error| {
            ErrorInfo::InvalidSignatureFile {
                error: AnyError::from_error(&error),
            }
        })?;

        let archive_file = File::open(archive).map_err(|error| ErrorInfo::VerifyOpenZipFail {
            path: archive.to_owned(),
            error: error.into(),
        })?;

        minisign::verify(&self.public_key, &sig_box, archive_file, true, false, false).map_err(
            |error| {
                tracing::error!(
                    phase = "verify",
                    archive = %archive.display(),
                    error = %error,
                    "Signature verification failed"
                );
                ErrorInfo::VerifyFail {
                    error: AnyError::from_error(&error),
                }
            },
        )?;

        tracing::info!(phase = "verify", archive = %archive.display(), "Signature verified");
        Ok(())
    }
}
