//! Session Token Lifecycle
//!
//! Profile selection, cached-token reuse and SSH token issuance.

pub mod context;
pub mod error;
pub mod issuer;
pub mod validator;

pub use context::{ApiCallError, SessionContext};
pub use error::Error;
pub use issuer::{IssuedToken, SshTokenIssuer, TokenIssuer};
pub use validator::{Refresh, TokenEvent, TokenState, TokenValidator};
