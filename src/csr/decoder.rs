//! Certificate request introspection
//!
//! Turns the raw `spec.request` payload of a CSR into the `subject=<DN>` line that
//! [`parse_common_name`](super::parse_common_name) understands.

#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

/// PEM label kubelets use for their requests
const PEM_TAG: &str = "CERTIFICATE REQUEST";

/// A CSR payload could not be decoded into a subject
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is PEM but not a certificate request
    #[error("unexpected PEM block '{0}', expected '{PEM_TAG}'")]
    UnexpectedPemTag(String),

    /// Payload looked like PEM but did not parse
    #[error("invalid PEM: {0}")]
    Pem(String),

    /// DER body is not a PKCS#10 certification request
    #[error("not a valid certificate request: {0}")]
    InvalidRequest(String),
}

/// Decodes a certificate request payload into its textual subject line
#[cfg_attr(test, automock)]
pub trait SubjectDecoder: Send + Sync {
    /// Decode `request` (PEM or DER) and return `subject=<DN>`
    fn decode_subject(&self, request: &[u8]) -> Result<String, DecodeError>;
}

/// Decoder backed by x509-parser
///
/// Renders the subject with x509-parser's `K=V, K=V` notation.
#[derive(Debug, Default, Clone, Copy)]
pub struct X509SubjectDecoder;

impl X509SubjectDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }
}

/// Return the DER body of a PEM-wrapped request, or the input unchanged when it is
/// already DER
fn request_der(request: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let trimmed = request.trim_ascii_start();
    if !trimmed.starts_with(b"-----BEGIN") {
        return Ok(request.to_vec());
    }

    let pem_obj = ::pem::parse(trimmed).map_err(|e| DecodeError::Pem(e.to_string()))?;
    // Older tooling writes "NEW CERTIFICATE REQUEST"
    if !pem_obj.tag().ends_with(PEM_TAG) {
        return Err(DecodeError::UnexpectedPemTag(pem_obj.tag().to_string()));
    }
    Ok(pem_obj.contents().to_vec())
}

impl SubjectDecoder for X509SubjectDecoder {
    fn decode_subject(&self, request: &[u8]) -> Result<String, DecodeError> {
        let der = request_der(request)?;
        let (_, csr) = X509CertificationRequest::from_der(&der)
            .map_err(|e| DecodeError::InvalidRequest(e.to_string()))?;
        Ok(format!("subject={}", csr.certification_request_info.subject))
    }
}
