//! Bearer-token verification for the hello handshake
//!
//! Auth is optional - if no token is configured, all hello frames are
//! accepted. Token issuance is out of scope; this only verifies.

use gate_protocol::GatewayError;
use subtle::ConstantTimeEq;

/// Verifier for the process-wide shared secret
#[derive(Clone)]
pub struct TokenVerifier {
    expected: Option<String>,
}

impl TokenVerifier {
    pub fn new(expected: Option<String>) -> Self {
        if expected.is_none() {
            tracing::warn!("No auth token configured - accepting all clients");
        }
        Self { expected }
    }

    /// Check if authentication is enabled
    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Verify a client-presented token
    pub fn verify(&self, presented: &str) -> Result<(), GatewayError> {
        let Some(ref expected) = self.expected else {
            return Ok(());
        };

        // Constant-time comparison; length mismatch short-circuits but
        // reveals nothing a caller could not already measure.
        let ok = expected.as_bytes().ct_eq(presented.as_bytes());
        if bool::from(ok) {
            Ok(())
        } else {
            Err(GatewayError::Auth("invalid token".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_auth_accepts_anything() {
        let verifier = TokenVerifier::new(None);
        assert!(!verifier.is_enabled());
        assert!(verifier.verify("whatever").is_ok());
        assert!(verifier.verify("").is_ok());
    }

    #[test]
    fn enabled_auth_rejects_mismatch() {
        let verifier = TokenVerifier::new(Some("s3cret".to_string()));
        assert!(verifier.is_enabled());
        assert!(verifier.verify("s3cret").is_ok());
        assert!(verifier.verify("S3CRET").is_err());
        assert!(verifier.verify("").is_err());
    }
}
