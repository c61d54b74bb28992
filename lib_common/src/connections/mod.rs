//! Remote-endpoint plumbing: the shared backoff policy, the two store
//! clients, and the reconnect supervisor that wraps each endpoint.

pub mod backoff;
pub mod recordstore;
pub mod supervisor;
pub mod tsdb;

pub use backoff::BackoffPolicy;
pub use recordstore::{RecordStore, SinkClient, SinkError};
pub use supervisor::{ConnectionSupervisor, Connector};
pub use tsdb::{SourceError, TickSource, TsdbClient};
