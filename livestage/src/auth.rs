use anyhow::{Context, Result};
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use stagecore::Principal;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::users;

/// Claims stored within issued JWTs. `sub` is the username.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Issue a JWT for a given subject valid for the provided duration.
pub fn issue_jwt(secret: &[u8], sub: &str, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: sub.into(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}

/// Load the signing secret from `path`, creating a random one on first run.
pub fn load_or_create_secret(path: &Path) -> Result<Vec<u8>> {
    if let Ok(encoded) = std::fs::read_to_string(path) {
        return STANDARD
            .decode(encoded.trim())
            .context("invalid jwt secret file");
    }
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, STANDARD.encode(&secret)).context("persisting jwt secret")?;
    info!(path = %path.display(), "generated new jwt secret");
    Ok(secret)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolve the caller from an `Authorization: Bearer` header. Missing,
/// invalid or expired tokens and unknown users all resolve to anonymous.
pub fn principal_from_headers(conn: &Connection, secret: &[u8], headers: &HeaderMap) -> Principal {
    let Some(token) = bearer_token(headers) else {
        return Principal::Anonymous;
    };
    let claims = match verify_jwt(secret, token) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "rejected bearer token");
            return Principal::Anonymous;
        }
    };
    match users::find_by_username(conn, &claims.sub) {
        Ok(user) => user.into(),
        Err(e) => {
            warn!(error = %e, "could not resolve token subject");
            Principal::Anonymous
        }
    }
}
