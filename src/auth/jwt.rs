//! # Session Authenticator
//!
//! Stateless JWT verification at connection handshake.
//!
//! Tokens are HS256-signed by the account service with the shared secret.
//! Only a subject (`sub`, or legacy `user_id`/`userId`) and `exp` are
//! required; `name` and `email` feed the display label when present.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::errors::{AuthError, AuthResult};

/// JWT claims accepted at handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Legacy user ID claims, consulted when `sub` is absent or blank
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id_camel: Option<String>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// User's email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Issued at (Unix epoch seconds)
    #[serde(default)]
    pub iat: i64,

    /// Expiration (Unix epoch seconds)
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    /// First non-blank of `sub`, `user_id`, `userId`
    pub fn subject(&self) -> Option<&str> {
        [&self.sub, &self.user_id, &self.user_id_camel]
            .into_iter()
            .filter_map(|claim| claim.as_deref())
            .map(str::trim)
            .find(|id| !id.is_empty())
    }
}

/// Identity extracted from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_label: String,
}

/// Authenticator configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared HS256 secret
    pub secret: String,

    /// Required `iss`, if any
    pub issuer: Option<String>,

    /// Required `aud`, if any
    pub audience: Option<String>,
}

/// Verifies (and, for operators, issues) bearer tokens
#[derive(Clone)]
pub struct Authenticator {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Verify a handshake credential and extract the caller's identity.
    ///
    /// Touches nothing but the token.
    pub fn authenticate(&self, token: Option<&str>) -> AuthResult<Identity> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.validate_token(token)?;
        let user_id = claims
            .subject()
            .map(str::to_string)
            .ok_or(AuthError::InvalidToken)?;

        let user_label = claims
            .name
            .or(claims.email)
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| user_id.clone());

        Ok(Identity {
            user_id,
            user_label,
        })
    }

    /// Check signature, expiry and configured issuer/audience
    pub fn validate_token(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        match &self.config.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        if let Some(iss) = &self.config.issuer {
            validation.set_issuer(&[iss]);
        }

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            }
        })?;

        Ok(token_data.claims)
    }

    /// Sign a token for a user
    pub fn issue(&self, user_id: &str, label: Option<&str>, ttl: Duration) -> AuthResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: Some(user_id.to_string()),
            user_id: None,
            user_id_camel: None,
            name: label.map(str::to_string),
            email: None,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AuthError::TokenGenerationFailed)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_authenticator() -> Authenticator {
        Authenticator::new(AuthConfig {
            secret: "test_secret_key_for_testing_only".to_string(),
            issuer: None,
            audience: None,
        })
    }

    fn encode_claims<T: Serialize>(secret: &str, claims: &T) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_issue_and_authenticate() {
        let auth = create_test_authenticator();
        let token = auth.issue("user-1", Some("Ada"), Duration::minutes(5)).unwrap();

        assert_eq!(token.split('.').count(), 3);

        let identity = auth.authenticate(Some(&token)).unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.user_label, "Ada");
    }

    #[test]
    fn test_missing_token() {
        let auth = create_test_authenticator();
        assert_eq!(auth.authenticate(None), Err(AuthError::MissingToken));
        assert_eq!(auth.authenticate(Some("  ")), Err(AuthError::MissingToken));
    }

    #[test]
    fn test_garbage_token() {
        let auth = create_test_authenticator();
        assert_eq!(
            auth.authenticate(Some("invalid.token.here")),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = Authenticator::new(AuthConfig {
            secret: "secret_one".to_string(),
            issuer: None,
            audience: None,
        });
        let token = issuer.issue("user-1", None, Duration::minutes(5)).unwrap();

        let auth = create_test_authenticator();
        assert_eq!(auth.authenticate(Some(&token)), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = Utc::now();
        let claims = Claims {
            sub: Some("user-1".to_string()),
            user_id: None,
            user_id_camel: None,
            name: None,
            email: None,
            iat: (now - Duration::hours(2)).timestamp(),
            exp: (now - Duration::hours(1)).timestamp(),
            iss: None,
            aud: None,
        };
        let token = encode_claims("test_secret_key_for_testing_only", &claims);

        let auth = create_test_authenticator();
        assert_eq!(auth.authenticate(Some(&token)), Err(AuthError::ExpiredToken));
    }

    #[test]
    fn test_label_falls_back_to_email_then_id() {
        let auth = create_test_authenticator();
        let exp = (Utc::now() + Duration::minutes(5)).timestamp();

        let with_email = Claims {
            sub: Some("user-2".to_string()),
            user_id: None,
            user_id_camel: None,
            name: None,
            email: Some("b@example.com".to_string()),
            iat: 0,
            exp,
            iss: None,
            aud: None,
        };
        let token = encode_claims("test_secret_key_for_testing_only", &with_email);
        assert_eq!(auth.authenticate(Some(&token)).unwrap().user_label, "b@example.com");

        let bare = Claims {
            email: None,
            ..with_email
        };
        let token = encode_claims("test_secret_key_for_testing_only", &bare);
        assert_eq!(auth.authenticate(Some(&token)).unwrap().user_label, "user-2");
    }

    #[test]
    fn test_user_id_alias_accepted() {
        let auth = create_test_authenticator();
        let exp = (Utc::now() + Duration::minutes(5)).timestamp();
        let token = encode_claims(
            "test_secret_key_for_testing_only",
            &serde_json::json!({"userId": "legacy-7", "exp": exp}),
        );

        assert_eq!(auth.authenticate(Some(&token)).unwrap().user_id, "legacy-7");
    }

    #[test]
    fn test_subject_and_user_id_together() {
        let auth = create_test_authenticator();
        let exp = (Utc::now() + Duration::minutes(5)).timestamp();

        let token = encode_claims(
            "test_secret_key_for_testing_only",
            &serde_json::json!({"sub": "u1", "userId": "u1", "exp": exp}),
        );
        assert_eq!(auth.authenticate(Some(&token)).unwrap().user_id, "u1");

        let token = encode_claims(
            "test_secret_key_for_testing_only",
            &serde_json::json!({"sub": "u1", "user_id": "u9", "userId": "u8", "exp": exp}),
        );
        assert_eq!(auth.authenticate(Some(&token)).unwrap().user_id, "u1");
    }

    #[test]
    fn test_blank_subject_falls_back_to_user_id() {
        let auth = create_test_authenticator();
        let exp = (Utc::now() + Duration::minutes(5)).timestamp();
        let token = encode_claims(
            "test_secret_key_for_testing_only",
            &serde_json::json!({"sub": " ", "user_id": "u3", "exp": exp}),
        );
        assert_eq!(auth.authenticate(Some(&token)).unwrap().user_id, "u3");
    }

    #[test]
    fn test_blank_subject_rejected() {
        let auth = create_test_authenticator();
        let token = auth.issue(" ", None, Duration::minutes(5)).unwrap();
        assert_eq!(auth.authenticate(Some(&token)), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_audience_enforced_when_configured() {
        let auth = Authenticator::new(AuthConfig {
            secret: "s".to_string(),
            issuer: Some("accounts".to_string()),
            audience: Some("realtime".to_string()),
        });
        let token = auth.issue("user-1", None, Duration::minutes(5)).unwrap();
        assert!(auth.authenticate(Some(&token)).is_ok());

        let other = Authenticator::new(AuthConfig {
            secret: "s".to_string(),
            issuer: Some("accounts".to_string()),
            audience: Some("billing".to_string()),
        });
        assert_eq!(other.authenticate(Some(&token)), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
