//! Controller-side job bookkeeping and dispatch.
//!
//! - [`source`]: lazy job production, with orphaned jobs redelivered first
//! - [`registry`]: live workers, their assignments, least-loaded selection
//! - [`handler`]: applies worker messages to the [`DispatchState`]
//! - [`dispatcher`]: the tick loop tying source, registry and transport together
//! - [`sink`]: where completed jobs go

pub mod dispatcher;
pub mod handler;
pub mod job;
pub mod registry;
pub mod sink;
pub mod source;

pub use dispatcher::{DispatchStats, Dispatcher, RunSummary, Tick};
pub use handler::{AuthMode, DispatchState, Handled, JobLocation, ProtocolHandler};
pub use job::Job;
pub use registry::{WorkerEntry, WorkerRegistry};
pub use sink::{Completion, LoggingSink, ResultSink, VecSink};
pub use source::{JobSource, RequeueStack};
