//! Token lifecycle
//!
//! ```text
//!   Cached ──Use──────────────▶ Validated
//!     │                            │
//!     └──Unauthorized──▶ NoToken ◀─┘ Unauthorized
//!                          │
//!          Issued(token) ──┴── IssueFailed
//!               ▼                  ▼
//!           Validated            Failed (terminal)
//! ```
//!
//! A cached token is trusted without a round trip; it only drops back to
//! `NoToken` when an API call reports it as unauthorized, or when a login
//! is forced.

use std::fmt;

use tracing::{debug, error, info};

use super::error::Error;
use super::issuer::{IssuedToken, TokenIssuer};
use crate::config::{Profile, ProfileFields, ProfileStore};
use crate::ssh::{KeyMaterialResolver, KeySelection};

#[derive(Clone, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Cached(String),
    Validated(String),
    Failed,
}

#[derive(Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// The caller is about to use the token
    Use,
    /// An API call rejected the token, or a new login discards it
    Unauthorized,
    /// A fresh token was issued
    Issued(String),
    /// Issuing a token failed
    IssueFailed,
}

impl TokenState {
    pub fn from_profile(profile: &Profile) -> Self {
        match profile.token() {
            Some(token) => TokenState::Cached(token.to_string()),
            None => TokenState::NoToken,
        }
    }

    pub fn transition(self, event: TokenEvent) -> Self {
        match (self, event) {
            (TokenState::Failed, _) => TokenState::Failed,
            (TokenState::Cached(token), TokenEvent::Use) => TokenState::Validated(token),
            (TokenState::Cached(_) | TokenState::Validated(_), TokenEvent::Unauthorized) => {
                TokenState::NoToken
            }
            (TokenState::NoToken, TokenEvent::Issued(token)) => TokenState::Validated(token),
            (TokenState::NoToken, TokenEvent::IssueFailed) => TokenState::Failed,
            (state, _) => state,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            TokenState::Cached(token) | TokenState::Validated(token) => Some(token),
            TokenState::NoToken | TokenState::Failed => None,
        }
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenState::NoToken => f.write_str("NoToken"),
            TokenState::Cached(t) => write!(f, "Cached(<{} bytes>)", t.len()),
            TokenState::Validated(t) => write!(f, "Validated(<{} bytes>)", t.len()),
            TokenState::Failed => f.write_str("Failed"),
        }
    }
}

impl fmt::Debug for TokenEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenEvent::Use => f.write_str("Use"),
            TokenEvent::Unauthorized => f.write_str("Unauthorized"),
            TokenEvent::Issued(t) => write!(f, "Issued(<{} bytes>)", t.len()),
            TokenEvent::IssueFailed => f.write_str("IssueFailed"),
        }
    }
}

/// Outcome of a token refresh
#[derive(Debug)]
pub struct Refresh {
    pub token: IssuedToken,
    /// The token was issued but could not be saved; it is still usable for
    /// this process
    pub persist_error: Option<Error>,
}

/// Decides whether a profile's token can be used and fetches a new one
/// when it cannot
pub struct TokenValidator {
    resolver: KeyMaterialResolver,
    issuer: Box<dyn TokenIssuer>,
    key: KeySelection,
}

impl TokenValidator {
    pub fn new(resolver: KeyMaterialResolver, issuer: Box<dyn TokenIssuer>, key: KeySelection) -> Self {
        Self { resolver, issuer, key }
    }

    /// Return a token for `name`, issuing one if none is cached
    pub async fn ensure_token(&self, store: &mut ProfileStore, name: &str) -> Result<String, Error> {
        let state = stored_state(store, name)?.transition(TokenEvent::Use);
        if let TokenState::Validated(token) = state {
            debug!("Using cached token for '{}'", name);
            return Ok(token);
        }

        let refresh = self.acquire(store, name, state).await?;
        if let Some(e) = refresh.persist_error {
            error!("Token for '{}' could not be saved and will not survive this run: {}", name, e);
        }
        Ok(refresh.token.into_inner())
    }

    /// Drop the stored token for `name` after it was rejected
    pub async fn reject(&self, store: &mut ProfileStore, name: &str) -> Result<(), Error> {
        let state = stored_state(store, name)?.transition(TokenEvent::Unauthorized);
        if state.token().is_none() {
            info!("Invalidating token for '{}'", name);
            store.clear_token(name).await?;
        }
        Ok(())
    }

    /// Replace whatever is cached for `name` with a newly issued token
    pub async fn refresh(&self, store: &mut ProfileStore, name: &str) -> Result<Refresh, Error> {
        let state = stored_state(store, name)?.transition(TokenEvent::Unauthorized);
        self.acquire(store, name, state).await
    }

    /// Drive `state` through issuance and save the result
    async fn acquire(
        &self,
        store: &mut ProfileStore,
        name: &str,
        state: TokenState,
    ) -> Result<Refresh, Error> {
        let profile = store
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        info!("Requesting a new token for '{}' from {}:{}", name, profile.hostname, profile.port);
        let state = match self.issue(&profile).await {
            Ok(token) => state.transition(TokenEvent::Issued(token.into_inner())),
            Err(e) => {
                let state = state.transition(TokenEvent::IssueFailed);
                debug!("Token for '{}' is now {:?}: {}", name, state, e);
                return Err(e);
            }
        };

        let token = match state {
            TokenState::Validated(token) => IssuedToken::new(token),
            other => {
                return Err(Error::Validation(format!(
                    "token for '{}' cannot be replaced while {:?}",
                    name, other
                )))
            }
        };

        let persist_error = match store.upsert(name, ProfileFields::token(token.as_str())).await {
            Ok(_) => None,
            Err(e) => Some(Error::from(e)),
        };

        Ok(Refresh {
            token,
            persist_error,
        })
    }

    async fn issue(&self, profile: &Profile) -> Result<IssuedToken, Error> {
        let key = self.resolver.resolve_selection(&self.key).await?;
        self.issuer.issue(profile, key).await
    }
}

fn stored_state(store: &ProfileStore, name: &str) -> Result<TokenState, Error> {
    store
        .get(name)
        .map(TokenState::from_profile)
        .ok_or_else(|| Error::NotFound(name.to_string()))
}
