//! Expose MongoDB query results to data import pipelines as lazily iterated rows.
//!
//! A [`Connector`] authenticates against MongoDB once and runs any number of
//! queries, each returning a [`RowSequence`] of flat [`Row`]s.
//!
//! ```no_run
//! use mongorows::ConnectionConfig;
//! use mongorows::Connector;
//! use slog::o;
//!
//! # fn main() -> mongorows::Result<()> {
//! let logger = slog::Logger::root(slog::Discard, o!());
//! let config = ConnectionConfig {
//!     database: Some("catalogue".into()),
//!     ..ConnectionConfig::default()
//! };
//! let mut connector = Connector::new(logger);
//! connector.init(&config)?;
//! for row in connector.query(r#"{"status": "active"}"#, "items")? {
//!     let row = row?;
//!     println!("{:?}", row.get("_id"));
//! }
//! connector.close();
//! # Ok(())
//! # }
//! ```
mod connector;
mod credential;
mod error;
mod query;
mod rows;

pub mod backend;
pub mod cli;
pub mod config;
pub mod logging;
pub mod metrics;
#[cfg(any(test, feature = "with_test_support"))]
pub mod mock;

pub use self::config::ConnectionConfig;
pub use self::connector::Connector;
pub use self::credential::AuthMechanism;
pub use self::credential::Credential;
pub use self::error::failure_info;
pub use self::error::format_fail;
pub use self::error::Error;
pub use self::error::ErrorClass;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::metrics::register_metrics;
pub use self::query::parse_query;
pub use self::rows::flatten;
pub use self::rows::Row;
pub use self::rows::RowSequence;
pub use self::rows::SequenceState;
