//! API Layer
//!
//! HTTP endpoints and request handling for the customer auth service.

pub mod cookies;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod security_middleware;

// Re-export commonly used types
pub use handlers::AppState;
pub use middleware::{auth_middleware, extract_auth_user, require_admin, AuthUser};
pub use routes::{create_routes, RouterBuilder};
pub use security_middleware::{client_identifier, security_headers_middleware};
