// src/auth.rs
use anyhow::Result;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::{Request, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, warn};

/// Verified caller identity extracted from an identity-provider token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub aud: String,
    pub iss: String,
    pub sub: String, // Identity-provider subject
    pub email: Option<String>,
    pub name: Option<String>,
    pub exp: usize, // Expiration timestamp
    pub iat: usize, // Issued at timestamp
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
        }
    }
}

pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub jwks_url: String,
    pub provider_keys: HashMap<String, String>, // kid -> public key PEM
}

impl AuthConfig {
    pub fn new(issuer: String, audience: String, jwks_url: String) -> Self {
        Self {
            issuer,
            audience,
            jwks_url,
            provider_keys: HashMap::new(),
        }
    }

    /// Fetch the identity provider's public keys for JWT verification
    pub async fn update_provider_keys(&mut self) -> Result<()> {
        let response = reqwest::get(&self.jwks_url).await?;
        let keys: HashMap<String, String> = response.json().await?;

        self.provider_keys = keys;
        tracing::info!("Updated identity provider public keys");

        Ok(())
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    TokenVerificationFailed,
    StateUnavailable,
}

impl AuthError {
    pub fn message(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Authorization token required",
            AuthError::InvalidToken => "Invalid authorization token format",
            AuthError::TokenVerificationFailed => "Token verification failed",
            AuthError::StateUnavailable => "Authentication service unavailable",
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Identity {
    type Error = AuthError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_config = match req.guard::<&State<AuthConfig>>().await {
            Outcome::Success(config) => config,
            Outcome::Error((status, _)) => {
                return Outcome::Error((status, AuthError::StateUnavailable))
            }
            Outcome::Forward(f) => return Outcome::Forward(f),
        };

        // Extract Authorization header
        let token = match req.headers().get_one("Authorization") {
            Some(header) if header.starts_with("Bearer ") => &header[7..],
            Some(_) => {
                warn!("Invalid Authorization header format");
                return Outcome::Error((Status::Unauthorized, AuthError::InvalidToken));
            }
            None => {
                warn!("Missing Authorization header");
                return Outcome::Error((Status::Unauthorized, AuthError::MissingToken));
            }
        };

        match verify_provider_token(token, auth_config) {
            Ok(identity) => Outcome::Success(identity),
            Err(e) => {
                error!("Token verification failed: {}", e);
                Outcome::Error((Status::Unauthorized, AuthError::TokenVerificationFailed))
            }
        }
    }
}

fn verify_provider_token(token: &str, auth_config: &AuthConfig) -> Result<Identity> {
    // Decode header to get the key ID
    let header = jsonwebtoken::decode_header(token)?;
    let kid = header
        .kid
        .ok_or_else(|| anyhow::anyhow!("Missing kid in token header"))?;

    // Get the public key for this kid
    let public_key = auth_config
        .provider_keys
        .get(&kid)
        .ok_or_else(|| anyhow::anyhow!("Unknown key ID: {}", kid))?;

    // Verify the token
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[&auth_config.audience]);
    validation.set_issuer(&[&auth_config.issuer]);

    let decoding_key = DecodingKey::from_rsa_pem(public_key.as_bytes())?;
    let token_data = decode::<Claims>(token, &decoding_key, &validation)?;

    Ok(token_data.claims.into())
}

// Optional auth guard that doesn't fail if no auth is provided
pub struct OptionalIdentity {
    pub identity: Option<Identity>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for OptionalIdentity {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match Identity::from_request(req).await {
            Outcome::Success(identity) => Outcome::Success(OptionalIdentity {
                identity: Some(identity),
            }),
            _ => Outcome::Success(OptionalIdentity { identity: None }),
        }
    }
}
