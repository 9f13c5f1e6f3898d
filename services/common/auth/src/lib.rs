pub mod authenticate;
pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod guards;
pub mod principal;
pub mod roles;
pub mod signer;

pub use authenticate::{AuthenticateLayer, PublicRoute, PublicRoutes};
pub use claims::Claims;
pub use clock::{system_clock, Clock};
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult};
pub use guards::{authorize, ensure_role, GuardError, RequireLayer, Requirement};
pub use principal::{bearer_token, Principal};
pub use roles::{Role, ROLE_ADMIN, ROLE_EDITOR, ROLE_GUEST, ROLE_VIEWER};
pub use signer::TokenSigner;
