//! Async buffered reading and read-write pumps over `seqio`.
//!
//! This crate is the asynchronous half of the streaming I/O core:
//!
//! - [`BufferedReader`]: turns a serial push source into a reader that
//!   supports both sequential consumption and random re-reads within the
//!   buffered window, delegating out-of-window requests to a registered
//!   handler.
//! - [`BoundedPump`]: moves a known number of bytes from a serial async
//!   source to a random async sink, tolerating out-of-order read
//!   completions.
//! - [`DrainPump`]: drains a source until it runs out, reporting whether
//!   more data may become available later.
//! - Async capability traits mirroring the sync set, plus adapters
//!   ([`BlockingRandomWriter`], [`CloningSerialWriter`]) lifting sync
//!   endpoints into them.
//!
//! # Example
//!
//! ```ignore
//! use seqio::{Filter, FilterWriter, SerialSink, WriteSequencer};
//! use seqio_stream::{BlockingRandomWriter, BoundedPump, PumpConfig};
//! use std::sync::Arc;
//!
//! # async fn run(source: Arc<dyn seqio_stream::SerialAsyncRead>, endpoint: impl seqio::SerialWrite + Send + 'static) {
//! let chain = FilterWriter::new(Filter::Identity, SerialSink::new(endpoint));
//! let sink = Arc::new(BlockingRandomWriter::new(WriteSequencer::new(Box::new(chain))));
//! let pump = BoundedPump::new(source, sink, PumpConfig::default()).unwrap();
//! while let Some(result) = pump.pump_data(1 << 20).await.unwrap() {
//!     if result.is_end {
//!         break;
//!     }
//! }
//! # }
//! ```

mod adapter;
mod bounded;
mod buffered;
mod config;
mod drain;
mod error;
mod invariants;
mod traits;

pub use adapter::{BlockingRandomWriter, CloningSerialWriter};
pub use bounded::BoundedPump;
pub use buffered::BufferedReader;
pub use config::PumpConfig;
pub use drain::DrainPump;
pub use error::{PumpError, StreamError};
pub use traits::{
    RandomAsyncRead, RandomAsyncWrite, RandomDataSource, SerialAsyncRead, SerialAsyncWrite,
    SerialDataSource,
};

// Re-export the sync core types callers wire pumps to.
pub use seqio::{IoResult, NO_OFFSET};
