use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::application::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

/// The authenticated dashboard session: the bearer token every request
/// carries and the actor it belongs to.
#[derive(Clone)]
pub struct Session {
    token: String,
    role: Role,
    subject: String,
}

impl Session {
    pub fn new(token: impl Into<String>, role: Role, subject: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            role,
            subject: subject.into(),
        }
    }

    /// Reads actor claims out of a JWT. The signature is checked by the
    /// backend, not here; expiry is still enforced so a stale session fails
    /// before any command is issued.
    pub fn from_token(token: &str) -> Result<Self> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = true;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());

        let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| Error::Unauthorized(format!("Invalid session token: {}", e)))?;

        let role = data
            .claims
            .role
            .as_deref()
            .ok_or_else(|| Error::Unauthorized("Token carries no role".to_string()))?
            .parse::<Role>()
            .map_err(Error::Unauthorized)?;

        Ok(Self {
            token: token.to_string(),
            role,
            subject: data.claims.sub,
        })
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("subject", &self.subject)
            .field("token", &"<redacted>")
            .finish()
    }
}
