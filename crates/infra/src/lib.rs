//! Infrastructure layer: event store, command dispatch, read models, audit,
//! configuration and ports to external collaborators.

pub mod audit;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod external;
pub mod projections;
pub mod read_model;

pub use audit::{AuditOutcome, AuditRecord, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use command_dispatcher::{CommandDispatcher, DispatchError, Loaded, UnitOfWork};
pub use config::{ConfigError, PosConfig};
