use crate::{errors::AppError, server::AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tokens are valid for one hour from issuance.
pub const TOKEN_VALIDITY_SECS: i64 = 60 * 60;

/// Signing secret. Never printed.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(raw: impl Into<String>) -> anyhow::Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            anyhow::bail!("signing secret must not be empty");
        }
        Ok(Self(raw))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(**redacted**)")
    }
}

/// Authenticated identity attached to the request, and copied onto the
/// response so outer layers can log it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject(pub String);

impl Subject {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Subject, AppError>;
}

pub struct TokenGate {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGate").field("algorithm", &Algorithm::HS256).finish_non_exhaustive()
    }
}

impl TokenGate {
    pub fn new(secret: &Secret) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, subject: &str) -> Result<String, AppError> {
        self.issue_at(subject, Utc::now())
    }

    pub fn issue_at(&self, subject: &str, issued_at: DateTime<Utc>) -> Result<String, AppError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + Duration::seconds(TOKEN_VALIDITY_SECS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }
}

impl TokenVerifier for TokenGate {
    fn verify(&self, token: &str) -> Result<Subject, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(reason = ?e.kind(), "token rejected");
            AppError::InvalidCredential
        })?;
        Ok(Subject(data.claims.sub))
    }
}

/// Extracts `<token>` from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthenticated)?;
    let token = auth.strip_prefix("Bearer ").ok_or(AppError::Unauthenticated)?.trim();
    if token.is_empty() {
        return Err(AppError::Unauthenticated);
    }
    Ok(token)
}

/// Missing or malformed header fails with `Unauthenticated` before the
/// verifier is consulted; a rejected token fails with `InvalidCredential`.
pub fn authenticate(headers: &HeaderMap, verifier: &dyn TokenVerifier) -> Result<Subject, AppError> {
    let token = bearer_token(headers)?;
    verifier.verify(token)
}

pub async fn require_subject(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match authenticate(req.headers(), &*state.tokens) {
        Ok(subject) => {
            req.extensions_mut().insert(subject.clone());
            let mut resp = next.run(req).await;
            resp.extensions_mut().insert(subject);
            resp
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gate(secret: &str) -> TokenGate {
        TokenGate::new(&Secret::new(secret).unwrap())
    }

    fn headers(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, auth.parse().unwrap());
        h
    }

    struct CountingVerifier {
        calls: AtomicUsize,
    }

    impl TokenVerifier for CountingVerifier {
        fn verify(&self, _token: &str) -> Result<Subject, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Subject("u1".into()))
        }
    }

    #[test]
    fn issued_token_verifies() {
        let g = gate("s3cret");
        for subject in ["1", "user-42", "ünïcode"] {
            let token = g.issue(subject).unwrap();
            assert_eq!(g.verify(&token).unwrap(), Subject(subject.into()));
        }
    }

    #[test]
    fn foreign_secret_is_invalid() {
        let token = gate("one").issue("u1").unwrap();
        assert!(matches!(gate("two").verify(&token), Err(AppError::InvalidCredential)));
    }

    #[test]
    fn expired_token_is_invalid() {
        let g = gate("s3cret");
        let token = g.issue_at("u1", Utc::now() - Duration::seconds(TOKEN_VALIDITY_SECS + 5)).unwrap();
        assert!(matches!(g.verify(&token), Err(AppError::InvalidCredential)));
    }

    #[test]
    fn token_within_window_is_valid() {
        let g = gate("s3cret");
        let token = g.issue_at("u1", Utc::now() - Duration::minutes(59)).unwrap();
        assert_eq!(g.verify(&token).unwrap().as_str(), "u1");
    }

    #[test]
    fn garbage_token_is_invalid() {
        assert!(matches!(gate("s").verify("not.a.jwt"), Err(AppError::InvalidCredential)));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(Secret::new("").is_err());
        assert!(Secret::new("   ").is_err());
        assert_eq!(format!("{:?}", Secret::new("abc").unwrap()), "Secret(**redacted**)");
    }

    #[test]
    fn bearer_scheme_required() {
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert!(matches!(bearer_token(&headers("Basic abc")), Err(AppError::Unauthenticated)));
        assert!(matches!(bearer_token(&headers("Bearer ")), Err(AppError::Unauthenticated)));
        assert!(matches!(bearer_token(&HeaderMap::new()), Err(AppError::Unauthenticated)));
    }

    #[test]
    fn missing_header_never_reaches_verifier() {
        let v = CountingVerifier { calls: AtomicUsize::new(0) };
        assert!(matches!(authenticate(&HeaderMap::new(), &v), Err(AppError::Unauthenticated)));
        assert!(matches!(authenticate(&headers("Token abc"), &v), Err(AppError::Unauthenticated)));
        assert_eq!(v.calls.load(Ordering::SeqCst), 0);

        assert!(authenticate(&headers("Bearer abc"), &v).is_ok());
        assert_eq!(v.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_token_is_forbidden_not_unauthenticated() {
        let g = gate("s3cret");
        let err = authenticate(&headers("Bearer forged"), &g).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
