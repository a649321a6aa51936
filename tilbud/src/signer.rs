//! Request signing from an api key and a session token.

use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use smol_str::SmolStr;

/// Header carrying the session token.
pub const HEADER_X_TOKEN: &str = "X-Token";
/// Header carrying `hex(sha256(api_key + token))`.
pub const HEADER_X_SIGNATURE: &str = "X-Signature";

/// Source of the api key and the current session token.
///
/// Implementations are read at sign time, once per network attempt, so a
/// refreshed token is picked up by the next retry. Reads must not block on
/// I/O.
pub trait Credentials: Send + Sync {
    /// Static api key of the application.
    fn api_key(&self) -> SmolStr;

    /// Current session token, `None` for anonymous requests.
    fn token(&self) -> Option<SmolStr>;
}

impl<T: Credentials + ?Sized> Credentials for Arc<T> {
    fn api_key(&self) -> SmolStr {
        self.as_ref().api_key()
    }

    fn token(&self) -> Option<SmolStr> {
        self.as_ref().token()
    }
}

/// Credentials that never change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCredentials {
    api_key: SmolStr,
    token: Option<SmolStr>,
}

impl StaticCredentials {
    /// Api key with a fixed token.
    pub fn new(api_key: impl Into<SmolStr>, token: impl Into<SmolStr>) -> Self {
        Self {
            api_key: api_key.into(),
            token: Some(token.into()),
        }
    }

    /// Api key without a session; requests go out unsigned.
    pub fn anonymous(api_key: impl Into<SmolStr>) -> Self {
        Self {
            api_key: api_key.into(),
            token: None,
        }
    }
}

impl Credentials for StaticCredentials {
    fn api_key(&self) -> SmolStr {
        self.api_key.clone()
    }

    fn token(&self) -> Option<SmolStr> {
        self.token.clone()
    }
}

/// Session whose token is refreshed by an outside collaborator.
///
/// The token lives behind a short-held lock; signing takes a clone and never
/// waits on the refresher.
#[derive(Debug, Default)]
pub struct Session {
    api_key: SmolStr,
    token: RwLock<Option<SmolStr>>,
}

impl Session {
    /// Session without a token yet.
    pub fn new(api_key: impl Into<SmolStr>) -> Self {
        Self {
            api_key: api_key.into(),
            token: RwLock::new(None),
        }
    }

    /// Replaces the current token.
    pub fn set_token(&self, token: impl Into<SmolStr>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token.into());
    }

    /// Drops the current token, making later requests anonymous.
    pub fn clear_token(&self) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

impl Credentials for Session {
    fn api_key(&self) -> SmolStr {
        self.api_key.clone()
    }

    fn token(&self) -> Option<SmolStr> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// `hex(sha256(api_key + token))`.
pub fn signature(api_key: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Computes authentication headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signer;

impl Signer {
    /// Headers for one attempt.
    ///
    /// An absent or empty token yields no headers at all.
    pub fn sign(api_key: &str, token: Option<&str>) -> Vec<(SmolStr, String)> {
        match token {
            Some(token) if !token.is_empty() => vec![
                (SmolStr::new_static(HEADER_X_TOKEN), token.to_owned()),
                (
                    SmolStr::new_static(HEADER_X_SIGNATURE),
                    signature(api_key, token),
                ),
            ],
            _ => Vec::new(),
        }
    }

    /// Headers for the current state of `credentials`.
    pub fn sign_with(credentials: &dyn Credentials) -> Vec<(SmolStr, String)> {
        let token = credentials.token();
        Self::sign(&credentials.api_key(), token.as_deref())
    }

    /// Returns `true` for header names the signer owns.
    pub fn is_signature_header(name: &str) -> bool {
        name.eq_ignore_ascii_case(HEADER_X_TOKEN) || name.eq_ignore_ascii_case(HEADER_X_SIGNATURE)
    }
}
