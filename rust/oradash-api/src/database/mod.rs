//! Auxiliary store.
//!
//! A single SQLite database holds the Oracle connection vault, collection
//! history, plan baselines and dashboard users. Repositories are async traits
//! implemented on [`Store`].

pub mod baselines;
pub mod connections;
pub mod encryption;
pub mod history;
pub mod schema;
pub mod store;
pub mod users;

pub use baselines::{BaselineRepository, PlanBaseline, PlanBaselineData};
pub use connections::{
    ConnectionRecord, ConnectionRepository, ConnectionType, ConnectionUpdate, DuplicateConnection,
    HealthStatus, NewConnection, Privilege,
};
pub use encryption::KeyManager;
pub use history::{HistoryKind, HistoryRecord, HistoryRepository};
pub use store::Store;
pub use users::{DuplicateEmail, SessionRepository, User, UserRepository};
