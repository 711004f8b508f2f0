use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use seqio::IoResult;
use tokio::task::JoinSet;

use crate::config::PumpConfig;
use crate::error::{PumpError, StreamError};
use crate::traits::{RandomAsyncWrite, SerialAsyncRead};

// =============================================================================
//
// The drain pump runs a fixed number of read slots; each slot chains
// read → write → read on itself until the source signals one of:
//
//   is_end            — definitive end; latch completion, deliver any
//                       tail bytes
//   short read        — the source handed out less than a full buffer;
//                       deliver it and stop chaining (exhausted)
//   empty read        — nothing right now; stop chaining (exhausted)
//
// All slots observe the latches under one lock, so the first end or
// exhaustion observation stops the others at their next chain step.
//
// With several slots reading concurrently, more than one completion can
// carry the end flag (a data-bearing tail plus zero-byte reads past it),
// and they can land in any order. Data therefore always travels through
// plain writes; the end signal — a single zero-length end write at the
// largest observed end offset — is issued once, after every chain has
// drained, so the sink never sees the signal race its own tail bytes.
//
// =============================================================================

#[derive(Default)]
struct DrainState {
    complete: bool,
    exhausted: bool,
    /// Largest `offset + count` among end-flagged completions; the
    /// stream size once `complete` is latched.
    end_offset: u64,
    error: Option<PumpError>,
}

/// Drains a serial async source into a random async sink until the
/// source runs out, temporarily or terminally.
pub struct DrainPump {
    source: Arc<dyn SerialAsyncRead>,
    sink: Arc<dyn RandomAsyncWrite>,
    buffer_size: usize,
    concurrency: usize,
}

impl DrainPump {
    /// Creates a pump between `source` and `sink`.
    pub fn new(
        source: Arc<dyn SerialAsyncRead>,
        sink: Arc<dyn RandomAsyncWrite>,
        config: PumpConfig,
    ) -> Result<Self, StreamError> {
        if config.chunk_size == 0 {
            return Err(StreamError::InvalidArgument("chunk size must be nonzero"));
        }
        if config.concurrency == 0 {
            return Err(StreamError::InvalidArgument("concurrency must be nonzero"));
        }
        Ok(Self {
            source,
            sink,
            buffer_size: config.chunk_size,
            concurrency: config.concurrency,
        })
    }

    /// Drains the source. Returns `Ok(true)` when the source was merely
    /// exhausted — more data may become available later — and `Ok(false)`
    /// when the end was definitively reached, in which case the sink has
    /// received its end write.
    pub async fn pump_all(&self) -> Result<bool, PumpError> {
        let state = Arc::new(Mutex::new(DrainState::default()));
        let mut join = JoinSet::new();

        tracing::debug!(
            slots = self.concurrency,
            buffer_size = self.buffer_size,
            "drain pump starting"
        );
        for slot in 0..self.concurrency {
            let source = Arc::clone(&self.source);
            let sink = Arc::clone(&self.sink);
            let state = Arc::clone(&state);
            let size = self.buffer_size;
            join.spawn(async move {
                run_chain(slot, &*source, &*sink, &state, size).await;
            });
        }
        while join.join_next().await.is_some() {}

        let (complete, end_offset) = {
            let st = lock(&state);
            if let Some(e) = &st.error {
                return Err(e.clone());
            }
            (st.complete, st.end_offset)
        };
        if complete {
            // Every data write has been committed; signal the end.
            match self.sink.end_write_at(Bytes::new(), end_offset).await {
                Err(e) => return Err(PumpError::Write(e)),
                Ok(false) => {
                    return Err(PumpError::SinkRefused {
                        offset: end_offset,
                    })
                }
                Ok(true) => {}
            }
            tracing::debug!(end_offset, "drain pump reached the end");
            return Ok(false);
        }
        Ok(true)
    }
}

/// One slot's read-write chain.
async fn run_chain(
    slot: usize,
    source: &dyn SerialAsyncRead,
    sink: &dyn RandomAsyncWrite,
    state: &Mutex<DrainState>,
    size: usize,
) {
    loop {
        {
            let st = lock(state);
            if st.complete || st.exhausted || st.error.is_some() {
                return;
            }
        }
        let mut buf = vec![0u8; size];
        let read = match source.read(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                let mut st = lock(state);
                if st.error.is_none() {
                    st.error = Some(PumpError::Read(e));
                }
                return;
            }
        };

        if read.is_end {
            {
                let mut st = lock(state);
                st.complete = true;
                st.end_offset = st.end_offset.max(read.end_offset());
            }
            tracing::trace!(slot, offset = read.offset, count = read.count, "end reached");
            if read.count > 0 {
                write_chunk(sink, state, buf, read).await;
            }
            return;
        }
        if read.count == 0 {
            // Transient exhaustion: nothing right now.
            lock(state).exhausted = true;
            return;
        }
        let full = read.count == size;
        if !full {
            // Short read: the source is running dry. Deliver what came
            // and stop chaining.
            lock(state).exhausted = true;
        }
        write_chunk(sink, state, buf, read).await;
        if !full {
            return;
        }
    }
}

async fn write_chunk(
    sink: &dyn RandomAsyncWrite,
    state: &Mutex<DrainState>,
    mut buf: Vec<u8>,
    read: IoResult,
) {
    buf.truncate(read.count);
    let written = sink.write_at(Bytes::from(buf), read.offset).await;
    let mut st = lock(state);
    match written {
        Err(e) => {
            if st.error.is_none() {
                st.error = Some(PumpError::Write(e));
            }
        }
        Ok(false) => {
            if st.error.is_none() {
                st.error = Some(PumpError::SinkRefused {
                    offset: read.offset,
                });
            }
        }
        Ok(true) => {}
    }
}

/// Lock helper that shrugs off poisoning: state behind the lock is kept
/// consistent by construction, a panicking peer does not invalidate it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
