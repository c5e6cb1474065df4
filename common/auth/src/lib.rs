pub mod api_key;
pub mod claims;
pub mod codec;
pub mod config;
pub mod error;
pub mod principal;

pub use api_key::ApiKeyRegistry;
pub use claims::{Claims, PrincipalKind};
pub use codec::{IssuedToken, JwtCodec};
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult};
pub use principal::{authenticate, AnyKind, FrontendOnly, PlaceBackendOnly, Principal, RequiredKind};
