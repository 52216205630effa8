//! C3 — authenticator.
//!
//! Verifies the MQTT `password` field as a compact JWT (§4.3) and
//! cross-checks the resulting account identity against the Client-ID.

use crate::client_id::ClientId;
use crate::error::{GatewayError, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tenant principal: `{label, audience}` (§3 glossary "Account").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId {
    pub label: String,
    pub audience: String,
}

/// Per-issuer verification configuration (§3 `AuthnConfig`).
#[derive(Debug, Clone, Deserialize)]
pub struct IssuerConfig {
    pub algorithm: String,
    pub allowed_audiences: Vec<String>,
    /// Already-resolved key material (PEM bytes for RS*/ES*, raw secret for
    /// HS*). Fetching/rotating this material is out of scope (§1).
    pub verification_key: Vec<u8>,
}

/// `issuer → IssuerConfig` (§3 `AuthnConfig`). `None` means authentication
/// is disabled entirely (S1: any password is accepted).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthnConfig {
    #[serde(flatten)]
    pub issuers: HashMap<String, IssuerConfig>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    aud: String,
    iss: String,
}

fn algorithm_from_str(name: &str) -> Result<Algorithm> {
    match name {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        "PS256" => Ok(Algorithm::PS256),
        "PS384" => Ok(Algorithm::PS384),
        "PS512" => Ok(Algorithm::PS512),
        other => Err(GatewayError::invalid(format!("unsupported JWT algorithm: {other}"))),
    }
}

/// Decode the middle (claims) segment of a compact JWT without verifying
/// its signature, solely to read `iss` and pick the right `IssuerConfig`.
/// The signature is always verified afterwards via `jsonwebtoken::decode`.
fn peek_claims(token: &str) -> Result<Claims> {
    use base64::Engine;
    let claims_segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| GatewayError::BadCredentials { message: "malformed JWT".into() })?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(claims_segment)
        .map_err(|_| GatewayError::BadCredentials { message: "malformed JWT claims encoding".into() })?;
    serde_json::from_slice(&bytes)
        .map_err(|_| GatewayError::BadCredentials { message: "malformed JWT claims".into() })
}

fn decoding_key_for(config: &IssuerConfig, algorithm: Algorithm) -> Result<DecodingKey> {
    let key = match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            DecodingKey::from_secret(&config.verification_key)
        }
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 | Algorithm::PS256
        | Algorithm::PS384 | Algorithm::PS512 => {
            DecodingKey::from_rsa_pem(&config.verification_key)
                .map_err(|_| GatewayError::invalid("malformed RSA verification key"))?
        }
        Algorithm::ES256 | Algorithm::ES384 => {
            DecodingKey::from_ec_pem(&config.verification_key)
                .map_err(|_| GatewayError::invalid("malformed EC verification key"))?
        }
        Algorithm::EdDSA => DecodingKey::from_ed_pem(&config.verification_key)
            .map_err(|_| GatewayError::invalid("malformed Ed25519 verification key"))?,
    };
    Ok(key)
}

/// Verify `password` as a JWT and return the resulting `AccountId` iff it
/// equals `{account_label, audience}` from `client_id` (§4.3). Any
/// signature, claim, or mismatch failure maps to `bad_username_or_password`
/// for JWT-level failures and `not_authorized` for the identity mismatch,
/// per §4.8.
pub fn authenticate(config: &AuthnConfig, client_id: &ClientId, password: &[u8]) -> Result<AccountId> {
    if !config.enabled {
        return Ok(AccountId {
            label: client_id.account_label.clone(),
            audience: client_id.audience.clone(),
        });
    }

    let token = std::str::from_utf8(password)
        .map_err(|_| GatewayError::BadCredentials { message: "password is not valid UTF-8".into() })?;

    let header = decode_header(token)
        .map_err(|_| GatewayError::BadCredentials { message: "malformed JWT header".into() })?;

    // Peek the claims segment without verifying the signature yet, purely
    // to select the right IssuerConfig — jsonwebtoken's `decode` requires a
    // `DecodingKey` up front, and that key choice depends on `iss`.
    let unverified_claims = peek_claims(token)?;

    let issuer_config = config
        .issuers
        .get(&unverified_claims.iss)
        .ok_or_else(|| GatewayError::BadCredentials { message: "unknown issuer".into() })?;

    let expected_algorithm = algorithm_from_str(&issuer_config.algorithm)?;
    if header.alg != expected_algorithm {
        return Err(GatewayError::BadCredentials { message: "algorithm mismatch".into() });
    }

    let decoding_key = decoding_key_for(issuer_config, expected_algorithm)?;

    let mut validation = Validation::new(expected_algorithm);
    validation.set_issuer(&[&unverified_claims.iss]);
    validation.set_audience(&issuer_config.allowed_audiences);
    // §4.3 only requires `iss`/`aud`/`sub` — `jsonwebtoken`'s default
    // `required_spec_claims` demands `exp` too, which this spec never asks
    // for.
    validation.required_spec_claims.clear();
    validation.validate_exp = false;

    let token_data = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|_| GatewayError::BadCredentials { message: "JWT verification failed".into() })?;

    let account_id = AccountId { label: token_data.claims.sub, audience: token_data.claims.aud };

    let expected = AccountId {
        label: client_id.account_label.clone(),
        audience: client_id.audience.clone(),
    };
    if account_id != expected {
        return Err(GatewayError::not_authorized(
            "authenticated account does not match client-id account/audience",
        ));
    }

    Ok(account_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_id::ClientId;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        aud: &'a str,
        iss: &'a str,
    }

    fn config_with_hs256(secret: &[u8], audiences: Vec<String>) -> AuthnConfig {
        let mut issuers = HashMap::new();
        issuers.insert(
            "issuer.example".to_string(),
            IssuerConfig {
                algorithm: "HS256".to_string(),
                allowed_audiences: audiences,
                verification_key: secret.to_vec(),
            },
        );
        AuthnConfig { issuers, enabled: true }
    }

    fn sign(secret: &[u8], sub: &str, aud: &str, iss: &str) -> String {
        let claims = TestClaims { sub, aud, iss };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn disabled_authn_accepts_any_password() {
        let config = AuthnConfig::default();
        let client_id = ClientId::parse("v1/agents/a.b.example.net").unwrap();
        let account = authenticate(&config, &client_id, b"whatever").unwrap();
        assert_eq!(account.label, "b");
        assert_eq!(account.audience, "example.net");
    }

    #[test]
    fn valid_jwt_matching_client_id_succeeds() {
        let secret = b"topsecret";
        let config = config_with_hs256(secret, vec!["example.net".to_string()]);
        let client_id = ClientId::parse("v1/agents/a.b.example.net").unwrap();
        let token = sign(secret, "b", "example.net", "issuer.example");

        let account = authenticate(&config, &client_id, token.as_bytes()).unwrap();
        assert_eq!(account, AccountId { label: "b".into(), audience: "example.net".into() });
    }

    #[test]
    fn mismatched_account_is_not_authorized() {
        let secret = b"topsecret";
        let config = config_with_hs256(secret, vec!["example.net".to_string()]);
        let client_id = ClientId::parse("v1/agents/a.other.example.net").unwrap();
        let token = sign(secret, "b", "example.net", "issuer.example");

        let err = authenticate(&config, &client_id, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind().reason_code(), "not_authorized");
    }

    #[test]
    fn wrong_signature_is_bad_username_or_password() {
        let config = config_with_hs256(b"topsecret", vec!["example.net".to_string()]);
        let client_id = ClientId::parse("v1/agents/a.b.example.net").unwrap();
        let token = sign(b"wrong-secret", "b", "example.net", "issuer.example");

        let err = authenticate(&config, &client_id, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind().reason_code(), "bad_username_or_password");
    }

    #[test]
    fn unknown_issuer_is_bad_username_or_password() {
        let config = config_with_hs256(b"topsecret", vec!["example.net".to_string()]);
        let client_id = ClientId::parse("v1/agents/a.b.example.net").unwrap();
        let token = sign(b"topsecret", "b", "example.net", "other.issuer");

        let err = authenticate(&config, &client_id, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind().reason_code(), "bad_username_or_password");
    }

    #[test]
    fn disallowed_audience_is_bad_username_or_password() {
        let config = config_with_hs256(b"topsecret", vec!["other.net".to_string()]);
        let client_id = ClientId::parse("v1/agents/a.b.example.net").unwrap();
        let token = sign(b"topsecret", "b", "example.net", "issuer.example");

        let err = authenticate(&config, &client_id, token.as_bytes()).unwrap_err();
        assert_eq!(err.kind().reason_code(), "bad_username_or_password");
    }
}
