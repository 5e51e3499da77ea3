//! Access token generation and validation.
//!
//! Access tokens are stateless HS256 JWTs. Nothing about them is stored, so
//! the only way to invalidate one is to let it expire.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AuthError;
use crate::principal::Principal;

/// Value of the `iss` claim.
pub const ISSUER: &str = "panelguard";

/// Value of the `aud` claim.
pub const AUDIENCE: &str = "admin-api";

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Allowed clock skew when checking `exp`.
pub const LEEWAY_SECS: u64 = 5;

/// JWT claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (account UUID)
    pub sub: String,
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    pub iss: String,
    pub aud: String,
}

impl AccessClaims {
    pub fn into_principal(self) -> Principal {
        Principal {
            id: self.sub,
            roles: self.roles.into_iter().collect(),
            username: self.username,
            email: self.email,
            preferred_language: self.preferred_language,
        }
    }
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    /// The JWT token string
    pub token: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret.
    pub fn new(secret: &[u8]) -> Self {
        // Only HS256 is accepted; a token claiming any other algorithm is
        // rejected before its signature is looked at.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Generate an access token for a principal.
    pub fn generate_access_token(
        &self,
        principal: &Principal,
    ) -> Result<AccessTokenResult, JwtError> {
        if principal.id.is_empty() || principal.roles.is_empty() {
            return Err(JwtError::MissingClaims);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| JwtError::TimeError)?
            .as_secs();

        let exp = now + ACCESS_TOKEN_DURATION_SECS;

        let claims = AccessClaims {
            sub: principal.id.clone(),
            roles: principal.roles.iter().cloned().collect(),
            username: principal.username.clone(),
            email: principal.email.clone(),
            preferred_language: principal.preferred_language.clone(),
            iat: now,
            exp,
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(AccessTokenResult {
            token,
            expires_at: exp,
            duration: ACCESS_TOKEN_DURATION_SECS,
        })
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
                .map_err(JwtError::Decoding)?;

        let claims = token_data.claims;
        if claims.sub.is_empty() || claims.roles.iter().all(|r| r.is_empty()) {
            return Err(JwtError::MissingClaims);
        }

        Ok(claims)
    }

    /// Mint a token for `principal`, collapsing failures into the public kind.
    pub fn issue(&self, principal: &Principal) -> Result<AccessTokenResult, AuthError> {
        self.generate_access_token(principal)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Verify a token and recover the principal it was issued for.
    /// Every defect is reported as [`AuthError::InvalidToken`].
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        self.validate_access_token(token)
            .map(AccessClaims::into_principal)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                AuthError::InvalidToken
            })
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Error decoding the token
    Decoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
    /// Subject or role set missing
    MissingClaims,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Decoding(e) => write!(f, "Failed to decode token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::MissingClaims => write!(f, "Missing required claims"),
        }
    }
}

impl std::error::Error for JwtError {}
