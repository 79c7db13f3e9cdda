//! Session Context
//!
//! Single entry point for commands that need a Lagoon: picks the profile
//! (explicit `--lagoon` > current > default) and hands out tokens that are
//! either cached or freshly issued.

use std::future::Future;

use tracing::{info, warn};

use super::error::Error;
use super::validator::TokenValidator;
use crate::config::ProfileStore;

/// Failure reported by an API call made with a session token
#[derive(Debug, thiserror::Error)]
pub enum ApiCallError {
    #[error("the API rejected the token")]
    Unauthorized,

    #[error("{0}")]
    Failed(String),
}

pub struct SessionContext {
    store: ProfileStore,
    validator: TokenValidator,
    explicit: Option<String>,
}

impl SessionContext {
    pub fn new(store: ProfileStore, validator: TokenValidator) -> Self {
        Self {
            store,
            validator,
            explicit: None,
        }
    }

    /// Use `name` for this invocation regardless of the stored pointers
    pub fn with_profile(mut self, name: Option<String>) -> Self {
        self.explicit = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        self
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ProfileStore {
        &mut self.store
    }

    /// Resolve which profile this invocation acts on, without side effects
    pub fn selected_profile(&self) -> Result<&str, Error> {
        if let Some(name) = self.explicit.as_deref() {
            return if self.store.contains(name) {
                Ok(name)
            } else {
                Err(Error::NotFound(name.to_string()))
            };
        }

        self.store
            .current_profile()
            .or_else(|| self.store.default_profile())
            .ok_or(Error::NoProfileSelected)
    }

    /// Resolve the profile and remember an explicit choice as `current`
    pub async fn select_profile(&mut self) -> Result<String, Error> {
        let name = self.selected_profile()?.to_string();
        if self.explicit.is_some() && self.store.current_profile() != Some(name.as_str()) {
            self.store.set_current(&name).await?;
            info!("Current Lagoon is now '{}'", name);
        }
        Ok(name)
    }

    /// Token for `name`, issuing one if nothing is cached
    pub async fn get_valid_token(&mut self, name: &str) -> Result<String, Error> {
        self.validator.ensure_token(&mut self.store, name).await
    }

    /// Forget the cached token so the next request re-authenticates
    pub async fn invalidate(&mut self, name: &str) -> Result<(), Error> {
        self.validator.reject(&mut self.store, name).await
    }

    /// Issue a new token for `name` whatever is cached.
    ///
    /// Unlike [`get_valid_token`](Self::get_valid_token), a token that
    /// cannot be saved is an error here: the whole point is to persist it.
    pub async fn login(&mut self, name: &str) -> Result<(), Error> {
        let refresh = self.validator.refresh(&mut self.store, name).await?;
        match refresh.persist_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run an API call with a valid token for `name`.
    ///
    /// If the API rejects the token, it is invalidated, a new one is issued
    /// and the call is retried once.
    pub async fn run_authorized<T, F, Fut>(&mut self, name: &str, mut call: F) -> Result<T, Error>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ApiCallError>>,
    {
        let token = self.get_valid_token(name).await?;

        match call(token).await {
            Ok(value) => return Ok(value),
            Err(ApiCallError::Failed(msg)) => return Err(Error::Api(msg)),
            Err(ApiCallError::Unauthorized) => {
                warn!("API rejected the token for '{}', re-authenticating", name);
            }
        }

        self.invalidate(name).await?;
        let token = self.get_valid_token(name).await?;
        match call(token).await {
            Ok(value) => Ok(value),
            Err(ApiCallError::Failed(msg)) => Err(Error::Api(msg)),
            Err(ApiCallError::Unauthorized) => Err(Error::AuthRejected(format!(
                "the API for '{}' rejected a freshly issued token",
                name
            ))),
        }
    }
}
