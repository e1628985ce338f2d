//! OpenID Connect provider plumbing
//!
//! Discovery of provider metadata and the token-endpoint client used for
//! refresh and authorization-code exchanges.

pub mod discovery;
pub mod token;

pub use discovery::ProviderMetadata;
pub use token::{TokenClient, TokenSet, TokenStatus};
