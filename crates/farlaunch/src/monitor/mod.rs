//! Monitoring of jobs executed on remote systems.
//!
//! A [`RemoteMonitor`] periodically asks a [`RemoteStatusProbe`] for the status of one job and
//! records the observations in a [`JobStore`]. How often the job is polled and when monitoring
//! gives up is decided by a [`MonitorPolicy`].
pub mod adapters;
pub mod command;
pub mod error;
pub mod policy;
pub mod pool;
pub mod probe;
pub mod process;
pub mod remote;
pub mod store;

pub use error::{MonitorError, MonitorResult, Severity, TransportError};
pub use policy::{MonitorPolicy, PolicyDecision, PolicyReason, StepwisePolicy};
pub use pool::MonitorPool;
pub use probe::{RemoteStatus, RemoteStatusProbe};
pub use process::{MonitorExit, MonitoredJob, RemoteMonitor};
pub use store::{JobOutcome, JobPhase, JobStore, MemoryJobStore};
