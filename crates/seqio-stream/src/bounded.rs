use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use seqio::{IoResult, NO_OFFSET};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::PumpConfig;
use crate::error::{PumpError, StreamError};
use crate::invariants::debug_assert_within_end;
use crate::traits::{RandomAsyncWrite, SerialAsyncRead};

// =============================================================================
// OUT-OF-ORDER TRANSFER PROTOCOL
// =============================================================================
//
// The pump issues indexed reads against a serial source that assigns
// offsets internally, so completions may arrive in any order. The sink
// is a random writer precisely so those completions can be committed in
// any order — the pump trades ordering for parallelism.
//
// The only ordering that matters is the index assigned at scheduling
// time, under the state lock. Once some completion reports `is_end`, its
// index becomes the end index:
//
//   - reads with a larger index concern data past the announced end;
//     they are dropped silently, together with their would-be writes,
//   - reads with a smaller or equal index cover data within the stream
//     and their writes must be accepted — a sink refusing one of them is
//     a protocol violation.
//
// Errors and cancellation latch: later completions observe the latch
// under the lock and drop their continuations, while writes already
// in flight run to completion.
//
// =============================================================================

struct PumpState {
    read_index: u32,
    end_read_complete: bool,
    end_read_index: u32,
    total_size: u64,
    error: Option<PumpError>,
    /// Latched once the end read has been seen and drained; later pump
    /// calls return `None`.
    reading_complete: bool,
    // running aggregate for the current pump call
    min_offset: u64,
    total_count: usize,
    saw_end: bool,
}

/// Pumps a known number of bytes from a serial async source to a random
/// async sink, preserving out-of-order read completions.
pub struct BoundedPump {
    source: Arc<dyn SerialAsyncRead>,
    sink: Arc<dyn RandomAsyncWrite>,
    chunk_size: usize,
    permits: Arc<Semaphore>,
    state: Arc<Mutex<PumpState>>,
    canceled: Arc<AtomicBool>,
}

impl BoundedPump {
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
            chunk_size: config.chunk_size,
            permits: Arc::new(Semaphore::new(config.concurrency)),
            state: Arc::new(Mutex::new(PumpState {
                read_index: 0,
                end_read_complete: false,
                end_read_index: 0,
                total_size: 0,
                error: None,
                reading_complete: false,
                min_offset: NO_OFFSET,
                total_count: 0,
                saw_end: false,
            })),
            canceled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Latches cancellation: no further reads are scheduled, completions
    /// of already-issued reads are dropped, writes already handed to the
    /// sink run to completion.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        tracing::debug!("pump canceled");
    }

    /// Returns `true` once cancellation has been latched.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Total stream size, known once the end read has been identified.
    pub fn total_size(&self) -> Option<u64> {
        let st = lock(&self.state);
        st.end_read_complete.then_some(st.total_size)
    }

    /// Pumps up to `count` bytes: schedules `ceil(count / chunk_size)`
    /// reads, each with a fresh buffer of at most `chunk_size` bytes, and
    /// commits every completion to the sink at the offset the source
    /// reported.
    ///
    /// Returns `Ok(None)` once a previous call identified the end of the
    /// source. On success the result aggregates the call's reads:
    /// smallest offset, summed count, OR-ed end flag. Errors and
    /// cancellation latch; a latched pump reports the same failure on
    /// every subsequent call.
    ///
    /// One call at a time: the caller must not overlap `pump_data`
    /// invocations on the same pump.
    pub async fn pump_data(&self, count: u64) -> Result<Option<IoResult>, PumpError> {
        {
            let mut st = lock(&self.state);
            if let Some(e) = &st.error {
                return Err(e.clone());
            }
            if self.canceled.load(Ordering::Acquire) {
                return Err(PumpError::Canceled);
            }
            if st.reading_complete {
                return Ok(None);
            }
            st.min_offset = NO_OFFSET;
            st.total_count = 0;
            st.saw_end = false;
        }

        tracing::debug!(count, chunk_size = self.chunk_size, "pump scheduling reads");
        let mut join = JoinSet::new();
        let mut remaining = count;
        while remaining > 0 {
            let index = {
                let mut st = lock(&self.state);
                if st.end_read_complete
                    || st.error.is_some()
                    || self.canceled.load(Ordering::Acquire)
                {
                    break;
                }
                let index = st.read_index;
                st.read_index += 1;
                index
            };
            let size = remaining.min(self.chunk_size as u64) as usize;
            remaining -= size as u64;

            let source = Arc::clone(&self.source);
            let sink = Arc::clone(&self.sink);
            let state = Arc::clone(&self.state);
            let canceled = Arc::clone(&self.canceled);
            let permits = Arc::clone(&self.permits);
            join.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let mut buf = vec![0u8; size];
                let read = source.read(&mut buf).await;
                let scheduled = handle_completion(&state, &canceled, index, read);
                let Some((result, is_end_chunk)) = scheduled else {
                    return;
                };

                // The write runs outside the lock; a sink may suspend.
                buf.truncate(result.count);
                let data = Bytes::from(buf);
                let written = if is_end_chunk {
                    sink.end_write_at(data, result.offset).await
                } else {
                    sink.write_at(data, result.offset).await
                };
                let mut st = lock(&state);
                match written {
                    Err(e) => {
                        if st.error.is_none() {
                            tracing::debug!(error = %e, "sink write failed");
                            st.error = Some(PumpError::Write(e));
                        }
                    }
                    Ok(false) => {
                        // A refusal is only legal for data past the
                        // announced end; this write is within it.
                        if st.end_read_complete
                            && index <= st.end_read_index
                            && st.error.is_none()
                        {
                            st.error = Some(PumpError::SinkRefused {
                                offset: result.offset,
                            });
                        }
                    }
                    Ok(true) => {}
                }
            });
        }

        while let Some(joined) = join.join_next().await {
            if joined.is_err() {
                let mut st = lock(&self.state);
                if st.error.is_none() {
                    st.error = Some(PumpError::Read(StreamError::InvalidState(
                        "pump worker aborted",
                    )));
                }
            }
        }

        let mut st = lock(&self.state);
        if let Some(e) = &st.error {
            return Err(e.clone());
        }
        if self.canceled.load(Ordering::Acquire) {
            return Err(PumpError::Canceled);
        }
        if st.end_read_complete {
            st.reading_complete = true;
        }
        Ok(Some(IoResult::new(st.min_offset, st.total_count, st.saw_end)))
    }
}

/// Processes one read completion under the state lock. Returns the write
/// to schedule, if any, with its end-chunk flag.
fn handle_completion(
    state: &Mutex<PumpState>,
    canceled: &AtomicBool,
    index: u32,
    read: Result<IoResult, StreamError>,
) -> Option<(IoResult, bool)> {
    let mut st = lock(state);
    if st.error.is_some()
        || canceled.load(Ordering::Acquire)
        || (st.end_read_complete && index > st.end_read_index)
    {
        // Latched failure, cancellation, or data past the announced end:
        // drop the completion, schedule nothing.
        tracing::trace!(index, "dropping read completion");
        return None;
    }
    let result = match read {
        Err(e) => {
            tracing::debug!(index, error = %e, "source read failed");
            st.error = Some(PumpError::Read(e));
            return None;
        }
        Ok(r) => r,
    };
    debug_assert_within_end!(st.end_read_complete, index, st.end_read_index);

    st.min_offset = st.min_offset.min(result.offset);
    st.total_count += result.count;
    st.saw_end |= result.is_end;

    let first_end = result.is_end && !st.end_read_complete;
    if first_end {
        st.end_read_complete = true;
        st.end_read_index = index;
        st.total_size = result.end_offset();
        tracing::trace!(index, total_size = st.total_size, "end read identified");
    }
    // The end chunk is written even when empty: the zero-length end write
    // is the sink's completion signal.
    if result.count > 0 || first_end {
        Some((result, first_end))
    } else {
        None
    }
}

/// Lock helper that shrugs off poisoning: state behind the lock is kept
/// consistent by construction, a panicking peer does not invalidate it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
