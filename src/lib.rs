//! Lagoon CLI core
//!
//! Profile storage for Lagoon instances and the SSH-based token login that
//! every API command depends on.

pub mod config;
pub mod session;
pub mod ssh;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{ConfigStorage, Profile, ProfileFields, ProfileStore};
pub use session::{Error, SessionContext, SshTokenIssuer, TokenValidator};
pub use ssh::{KeyMaterialResolver, KeySelection};

/// Initialize logging
///
/// Logs go to stderr so command output on stdout stays machine readable.
/// `RUST_LOG` wins over `--debug`.
pub fn init_logging(debug: bool) {
    let fallback = if debug { "lagoon_cli=debug,info" } else { "warn" };
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Wire the production components into a session for one invocation
pub async fn open_session(
    storage: ConfigStorage,
    key: KeySelection,
    lagoon: Option<String>,
) -> Result<SessionContext, Error> {
    let store = ProfileStore::open(storage).await?;
    let validator = TokenValidator::new(
        KeyMaterialResolver::system(),
        Box::new(SshTokenIssuer::default()),
        key,
    );
    Ok(SessionContext::new(store, validator).with_profile(lagoon))
}
