pub mod connector;
pub mod executor;
pub mod introspect;
pub mod render;
pub mod session;

#[cfg(any(test, feature = "scripted"))]
pub mod scripted;

pub use connector::{connect, ConnectOptions, MssqlConnector, MssqlSession, ServerAddress};
pub use executor::{execute_batch, execute_single, split_statements};
pub use introspect::{current_catalog, introspect, quote_ident, use_catalog, SYSTEM_CATALOGS};
pub use render::render_batch;
pub use session::{Connector, Outcome, SqlSession};
