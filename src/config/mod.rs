pub mod loader;
pub mod schema;

pub use loader::{load, validate, CliOverrides};
pub use schema::{BackendTarget, ProxyConfig};
