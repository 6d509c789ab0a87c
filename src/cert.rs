use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schedule::{InvalidWindow, ValidityWindow};

#[derive(Debug, Error)]
pub enum CertError {
    #[error("Failed to read certificate file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse PEM certificate: {0}")]
    Pem(String),

    #[error("Failed to parse X509 certificate: {0}")]
    X509(String),

    #[error(transparent)]
    Window(#[from] InvalidWindow),
}

/// Extracts the validity window of the first certificate in a PEM bundle.
///
/// # Errors
/// Returns an error if the bytes are not a PEM encoded X.509 certificate or
/// its `notAfter` does not come after `notBefore`.
pub fn parse_validity_window(cert_bytes: &[u8]) -> Result<ValidityWindow, CertError> {
    let (_, pem) =
        x509_parser::pem::parse_x509_pem(cert_bytes).map_err(|e| CertError::Pem(e.to_string()))?;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| CertError::X509(e.to_string()))?;
    let validity = cert.validity();
    let window = ValidityWindow::new(
        validity.not_before.to_datetime(),
        validity.not_after.to_datetime(),
    )?;
    Ok(window)
}

/// Reads a certificate file and extracts its validity window.
///
/// A missing file is not an error: it yields `None`, meaning nothing has been
/// issued yet.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn read_validity_window(path: &Path) -> Result<Option<ValidityWindow>, CertError> {
    let cert_bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CertError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    parse_validity_window(&cert_bytes).map(Some)
}
