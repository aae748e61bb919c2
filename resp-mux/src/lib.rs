//! Multiplexed RESP client transport.
//!
//! One [`Transport`] drives one duplex byte channel (any
//! `AsyncRead`/`AsyncWrite` pair) and lets any number of tasks pipeline
//! requests over it. Each request yields an [`Operation`]; replies are
//! paired with operations strictly in write order, and push frames are
//! routed to a handler without disturbing that pairing.
//!
//! [`Operation`] and [`Remote`] are usable on their own: a pooled,
//! cancelable completion slot with a caller side and a producer side.
//!
//! All key and request types come from [`resp_proto`]; anything that
//! implements [`resp_proto::WriteRequest`] can be sent.

mod cancel;
mod config;
mod error;
mod frame;
pub mod metrics;
mod operation;
mod pool;
mod profile;
mod transport;
mod writer;

pub use cancel::CancelToken;
pub use config::TransportConfig;
pub use error::{Error, OperationError};
pub use frame::Frame;
pub use operation::{Operation, OperationPool, Outcome, Remote};
pub use pool::{Connect, Pool, PoolConfig};
pub use profile::{CommandProfile, ProfileOutcome, ProfileStack, Profiler};
pub use transport::{Batch, Transport, TransportBuilder, TransportState};
