//! ES256 provider tokens for the push service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use serde_json::json;

use crate::app::{DogearError, Result};

/// Width of an ES256 signature in JOSE form: two 32-byte coordinates.
pub const ES256_SIGNATURE_LEN: usize = 64;

/// Produces ASN.1 DER encoded ECDSA P-256/SHA-256 signatures.
pub trait DerSigner: Send + Sync {
    fn sign_der(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// In-process P-256 key loaded from PKCS#8 PEM.
pub struct P256Signer {
    key: SigningKey,
}

impl P256Signer {
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let key = SigningKey::from_pkcs8_pem(pem.trim())
            .map_err(|e| DogearError::Signing(format!("Invalid P-256 private key: {}", e)))?;
        Ok(Self { key })
    }

    pub fn from_key(key: SigningKey) -> Self {
        Self { key }
    }
}

impl DerSigner for P256Signer {
    fn sign_der(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature: Signature = self.key.sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// Read one DER length at `pos`, returning `(length, next_pos)`.
fn der_length(der: &[u8], pos: usize) -> Result<(usize, usize)> {
    let first = *der
        .get(pos)
        .ok_or_else(|| DogearError::Signing("DER signature truncated".to_string()))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, pos + 1));
    }

    let count = (first & 0x7f) as usize;
    if count == 0 || count > 2 {
        return Err(DogearError::Signing("Unsupported DER length".to_string()));
    }
    let bytes = der
        .get(pos + 1..pos + 1 + count)
        .ok_or_else(|| DogearError::Signing("DER signature truncated".to_string()))?;
    let length = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((length, pos + 1 + count))
}

/// Read one INTEGER at `pos`, returning `(value bytes, next_pos)`.
fn der_integer(der: &[u8], pos: usize) -> Result<(&[u8], usize)> {
    if der.get(pos) != Some(&0x02) {
        return Err(DogearError::Signing("Expected DER INTEGER".to_string()));
    }
    let (length, start) = der_length(der, pos + 1)?;
    let value = der
        .get(start..start + length)
        .ok_or_else(|| DogearError::Signing("DER signature truncated".to_string()))?;
    Ok((value, start + length))
}

/// Convert `SEQUENCE { INTEGER r, INTEGER s }` into fixed-width `r || s`.
///
/// Leading zero bytes are stripped from each integer and the remainder is
/// left-padded to `output_len / 2` bytes.
pub fn der_to_jose(der: &[u8], output_len: usize) -> Result<Vec<u8>> {
    if der.first() != Some(&0x30) {
        return Err(DogearError::Signing("Expected DER SEQUENCE".to_string()));
    }
    let (_, pos) = der_length(der, 1)?;
    let (r, pos) = der_integer(der, pos)?;
    let (s, _) = der_integer(der, pos)?;

    let half = output_len / 2;
    let mut out = vec![0u8; output_len];
    for (i, coordinate) in [r, s].into_iter().enumerate() {
        let first_nonzero = coordinate.iter().position(|b| *b != 0).unwrap_or(coordinate.len());
        let stripped = &coordinate[first_nonzero..];
        if stripped.len() > half {
            return Err(DogearError::Signing(format!(
                "Signature coordinate is {} bytes, expected at most {}",
                stripped.len(),
                half
            )));
        }
        let end = half * (i + 1);
        out[end - stripped.len()..end].copy_from_slice(stripped);
    }
    Ok(out)
}

/// Signed ES256 JWT `{alg, kid}.{iss, iat}`.
pub fn build_jwt(signer: &dyn DerSigner, team_id: &str, key_id: &str, issued_at: i64) -> Result<String> {
    let header = json!({ "alg": "ES256", "kid": key_id });
    let claims = json!({ "iss": team_id, "iat": issued_at });

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
    );
    let der = signer.sign_der(signing_input.as_bytes())?;
    let signature = der_to_jose(&der, ES256_SIGNATURE_LEN)?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Signed tokens per `(team id, key id)`, reused until they expire.
pub struct TokenCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CachedToken>>,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, team_id: &str, key_id: &str, now: DateTime<Utc>) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(&(team_id.to_string(), key_id.to_string()))
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.token.clone())
    }

    pub fn insert(&self, team_id: &str, key_id: &str, token: String, now: DateTime<Utc>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                (team_id.to_string(), key_id.to_string()),
                CachedToken {
                    token,
                    expires_at: now + self.ttl,
                },
            );
        }
    }

    pub fn invalidate(&self, team_id: &str, key_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&(team_id.to_string(), key_id.to_string()));
        }
    }
}

/// Bearer tokens for one provider credential, signed at most once per cache window.
pub struct ProviderTokenSigner {
    team_id: String,
    key_id: String,
    signer: Arc<dyn DerSigner>,
    cache: Arc<TokenCache>,
}

impl ProviderTokenSigner {
    pub fn new(team_id: &str, key_id: &str, signer: Arc<dyn DerSigner>, cache: Arc<TokenCache>) -> Self {
        Self {
            team_id: team_id.to_string(),
            key_id: key_id.to_string(),
            signer,
            cache,
        }
    }

    pub fn bearer(&self) -> Result<String> {
        let now = Utc::now();
        if let Some(token) = self.cache.get(&self.team_id, &self.key_id, now) {
            return Ok(token);
        }

        let token = build_jwt(self.signer.as_ref(), &self.team_id, &self.key_id, now.timestamp())?;
        self.cache.insert(&self.team_id, &self.key_id, token.clone(), now);
        tracing::debug!("Signed new provider token for key {}", self.key_id);
        Ok(token)
    }

    /// Drop the cached token, e.g. after the provider rejected it.
    pub fn invalidate(&self) {
        self.cache.invalidate(&self.team_id, &self.key_id);
    }
}
