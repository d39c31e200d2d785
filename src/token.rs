// Short-lived signed credentials issued on a passing verification.
//
// A token is `base64url(claims_json) "." base64url(ed25519_signature)`.
// Signing is asymmetric: any relying party holding the public key can verify
// without a shared secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, PublicKey, SecretKey};
use crate::errors::TokenError;

pub const TOKEN_ISSUER_NAME: &str = "presence-protocol";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub token_id: String,
    pub session_id: String,
    /// Authenticated user id.
    pub sub: String,
    pub final_score: f64,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    pub iss: String,
}

/// Outcome of token validation. Expired or mis-signed tokens yield
/// `valid = false` with an error string, never an `Err`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TokenValidation {
    fn invalid(error: impl Into<String>) -> Self {
        TokenValidation {
            valid: false,
            user_id: None,
            session_id: None,
            issued_at: None,
            expires_at: None,
            error: Some(error.into()),
        }
    }
}

/// Signs and validates verification credentials with a fixed lifetime.
pub struct TokenIssuer {
    signing_key: SecretKey,
    public_key: PublicKey,
    expiry_minutes: i64,
}

impl TokenIssuer {
    pub fn new(signing_key: SecretKey, expiry_minutes: i64) -> Self {
        let public_key = signing_key.verifying_key();
        TokenIssuer { signing_key, public_key, expiry_minutes }
    }

    /// Issuer with a freshly generated keypair.
    pub fn generate(expiry_minutes: i64) -> Self {
        TokenIssuer::new(crypto::generate_keypair(), expiry_minutes)
    }

    /// Public key relying parties use to verify tokens independently.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Produces a signed credential with `exp = iat + expiry`.
    pub fn issue(
        &self,
        session_id: &str,
        user_id: &str,
        final_score: f64,
    ) -> Result<String, TokenError> {
        let iat = Utc::now().timestamp();
        let claims = TokenClaims {
            token_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sub: user_id.to_string(),
            final_score,
            iat,
            exp: iat + self.expiry_minutes * 60,
            iss: TOKEN_ISSUER_NAME.to_string(),
        };
        let payload = serde_json::to_vec(&claims)?;
        let signature = crypto::sign_credential(&payload, &self.signing_key);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Verifies signature and expiry against this issuer's key.
    pub fn validate(&self, token: &str) -> TokenValidation {
        validate_with_key(token, &self.public_key)
    }
}

/// Verifies a credential against the given public key. Suitable for relying
/// parties that only hold the issuer's public key.
pub fn validate_with_key(token: &str, public_key: &PublicKey) -> TokenValidation {
    let (payload_b64, signature_b64) = match token.split_once('.') {
        Some(parts) => parts,
        None => return TokenValidation::invalid("malformed token"),
    };
    let payload = match URL_SAFE_NO_PAD.decode(payload_b64) {
        Ok(bytes) => bytes,
        Err(_) => return TokenValidation::invalid("malformed token payload"),
    };
    let signature_bytes = match URL_SAFE_NO_PAD.decode(signature_b64) {
        Ok(bytes) => bytes,
        Err(_) => return TokenValidation::invalid("malformed token signature"),
    };
    let signature = match Signature::from_slice(&signature_bytes) {
        Ok(sig) => sig,
        Err(_) => return TokenValidation::invalid("malformed token signature"),
    };
    if !crypto::verify_credential(&payload, &signature, public_key) {
        return TokenValidation::invalid("invalid token signature");
    }

    let claims: TokenClaims = match serde_json::from_slice(&payload) {
        Ok(claims) => claims,
        Err(_) => return TokenValidation::invalid("malformed token claims"),
    };
    if claims.iss != TOKEN_ISSUER_NAME {
        return TokenValidation::invalid("unknown token issuer");
    }
    if claims.exp <= Utc::now().timestamp() {
        return TokenValidation::invalid("token has expired");
    }

    TokenValidation {
        valid: true,
        user_id: Some(claims.sub),
        session_id: Some(claims.session_id),
        issued_at: Some(claims.iat),
        expires_at: Some(claims.exp),
        error: None,
    }
}
