use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Role;

pub fn hash_password(plain: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST)
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

/// The authenticated caller, as decoded from a bearer token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Ulid,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    role: Role,
    iat: i64,
    exp: i64,
}

/// Issues and verifies HS256-signed bearer tokens carrying `{id, email, role}`.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_hours: i64,
}

impl TokenIssuer {
    pub fn new(secret: &str, expires_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expires_hours,
        }
    }

    pub fn issue(&self, id: Ulid, email: &str, role: Role) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: id.to_string(),
            email: email.to_string(),
            role,
            iat: now,
            exp: now + self.expires_hours * 3600,
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    /// None on any defect: bad signature, expired, malformed subject.
    pub fn verify(&self, token: &str) -> Option<Identity> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation).ok()?;
        let id = Ulid::from_string(&data.claims.sub).ok()?;
        Some(Identity {
            id,
            email: data.claims.email,
            role: data.claims.role,
        })
    }
}
