//! Sequential and random-access byte I/O primitives.
//!
//! This crate provides the synchronous half of a streaming I/O core:
//! composable data-movement pieces that buffer, reorder and transform
//! bytes between in-order sources and in-order sinks.
//!
//! - [`RingBuffer`]: fixed-capacity circular store with separate consume
//!   (`add`/`take`) and positional re-read modes.
//! - [`WriteSequencer`]: accepts writes at arbitrary target offsets and
//!   emits a strictly ordered, gap-free byte stream downstream.
//! - [`FilterWriter`]: push-style transform pipeline (identity, CRC32
//!   digest, arbitrary transforms) fronting a serial sink.
//! - Capability traits ([`SerialRead`], [`RandomRead`], [`SerialWrite`],
//!   [`RandomWrite`], [`FilterWrite`]) naming what each endpoint can do.
//!
//! The async buffered reader and the read-write pumps that drive these
//! primitives live in the companion `seqio-stream` crate.

mod error;
mod filter;
mod invariants;
mod result;
mod ring;
mod sequencer;
mod traits;

pub use error::{Error, Result};
pub use filter::{Crc32Digest, DigestReader, Filter, FilterWriter, SerialSink, Transform};
pub use result::{IoResult, NO_OFFSET};
pub use ring::RingBuffer;
pub use sequencer::{CompletionFn, WriteSequencer};
pub use traits::{FilterWrite, RandomRead, RandomWrite, SerialRead, SerialWrite};

/// Default transfer buffer / chunk size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default number of concurrent I/O operations.
pub const DEFAULT_CONCURRENCY: usize = 8;
