//! Oracle access path.
//!
//! A request resolves a connection id into a [`ResolvedConfig`], hands it to
//! the [`QueryExecutor`] together with a statement, and reshapes the returned
//! rows through a [`FieldMap`].

pub mod classify;
#[cfg(feature = "oci")]
pub mod driver;
pub mod executor;
pub mod mapping;
pub mod resolver;
pub mod views;

pub use classify::{classify, StatementKind};
pub use executor::{
    BindValue, ColumnMeta, DriverConnection, DriverError, ExecutorError, OracleDriver,
    QueryExecutor, QueryOptions, QueryOutput, Row, Statement, UnavailableDriver,
};
pub use mapping::{lowercase_keys, FieldKind, FieldMap, FieldSpec};
pub use resolver::{ConfigResolver, OracleTarget, ResolveError, ResolvedConfig};

use std::sync::Arc;

/// The driver this build talks to Oracle with.
#[must_use]
pub fn default_driver() -> Arc<dyn OracleDriver> {
    #[cfg(feature = "oci")]
    {
        Arc::new(driver::OciDriver)
    }
    #[cfg(not(feature = "oci"))]
    {
        Arc::new(UnavailableDriver)
    }
}
