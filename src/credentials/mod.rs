//! Credential handling: the persisted bearer token and its decoded claims.
//! Keep the public surface thin and split implementation across sub-modules.

mod claims;
mod store;

pub use claims::{decode, token_expired, Claims, Credential, Role};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
