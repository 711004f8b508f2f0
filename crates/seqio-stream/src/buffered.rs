use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use seqio::{IoResult, RingBuffer};

use crate::error::StreamError;
use crate::invariants::debug_assert_read_window;
use crate::traits::{RandomDataSource, SerialDataSource};

// =============================================================================
// WINDOW MODEL
// =============================================================================
//
// The reader tracks two absolute cursors over the pushed stream:
//
//   write_offset — total bytes that have entered the ring
//   read_offset  — total bytes taken by serial readers
//
// Serial reads consume at `read_offset`. Random reads never observe
// `read_offset`; they are served from the resident window
//
//   [write_offset - ring.readable(), write_offset)
//
// which extends below `read_offset` because taken bytes stay resident
// until the ring reclaims their slots. Requests outside the window fall
// through to the registered random data source, if any.
//
// A push that exceeds the remaining ring space during `final_write` is
// parked in a detached final buffer and drained into the ring as serial
// reads free space; `write_offset` advances as those bytes enter the
// ring, so the window arithmetic never sees them early.
//
// =============================================================================

struct ReaderState {
    ring: RingBuffer<u8>,
    write_offset: u64,
    read_offset: u64,
    write_complete: bool,
    read_complete: bool,
    final_buf: Option<Vec<u8>>,
    final_pos: usize,
    request_threshold: usize,
    serial_request_error: Option<StreamError>,
    /// A refill dispatch is outstanding; suppresses duplicates.
    refill_in_flight: bool,
}

impl ReaderState {
    /// Opportunistically moves parked final-buffer bytes into the ring.
    fn drain_final(&mut self) {
        if let Some(parked) = self.final_buf.take() {
            let n = self.ring.add(&parked[self.final_pos..]);
            self.final_pos += n;
            self.write_offset += n as u64;
            if self.final_pos < parked.len() {
                self.final_buf = Some(parked);
            }
        }
    }

    /// All pushed bytes have entered the ring.
    fn all_written(&self) -> bool {
        self.write_complete && self.final_buf.is_none()
    }
}

/// Converts a serial push source into a reader usable both sequentially
/// and positionally.
///
/// Four capabilities over one ring buffer:
/// - push side: [`write`](Self::write) / [`final_write`](Self::final_write)
/// - serial reads, sync and async
/// - random reads within the resident window, sync and async; the async
///   variant fills out-of-window portions through a registered
///   [`RandomDataSource`]
///
/// A single internal lock makes pushes and reads linearizable; it is
/// never held across an `.await`.
pub struct BufferedReader {
    weak: Weak<BufferedReader>,
    state: Mutex<ReaderState>,
    serial_source: Mutex<Option<Arc<dyn SerialDataSource>>>,
    random_source: Mutex<Option<Arc<dyn RandomDataSource>>>,
}

impl BufferedReader {
    /// Creates a reader with the given ring capacity.
    ///
    /// `request_threshold` must be below `capacity`: whenever a serial
    /// read leaves fewer than this many bytes pending and the push side
    /// is not finished, the registered [`SerialDataSource`] is asked for
    /// more.
    pub fn new(capacity: usize, request_threshold: usize) -> Result<Arc<Self>, StreamError> {
        if request_threshold >= capacity {
            return Err(StreamError::InvalidArgument(
                "request threshold must be below the buffer capacity",
            ));
        }
        Ok(Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            state: Mutex::new(ReaderState {
                ring: RingBuffer::new(capacity),
                write_offset: 0,
                read_offset: 0,
                write_complete: false,
                read_complete: false,
                final_buf: None,
                final_pos: 0,
                request_threshold,
                serial_request_error: None,
                refill_in_flight: false,
            }),
            serial_source: Mutex::new(None),
            random_source: Mutex::new(None),
        }))
    }

    /// Registers the refill callback for the serial side.
    pub fn set_serial_source(&self, source: Arc<dyn SerialDataSource>) {
        *lock(&self.serial_source) = Some(source);
    }

    /// Registers the out-of-window supplier for async random reads.
    pub fn set_random_source(&self, source: Arc<dyn RandomDataSource>) {
        *lock(&self.random_source) = Some(source);
    }

    /// All data has been pushed and absorbed into the ring.
    pub fn is_complete(&self) -> bool {
        lock(&self.state).all_written()
    }

    /// Total size of the stream, known once the final write happened.
    pub fn size(&self) -> Option<u64> {
        let st = lock(&self.state);
        if st.write_complete {
            let parked = st
                .final_buf
                .as_ref()
                .map_or(0, |b| b.len() - st.final_pos);
            Some(st.write_offset + parked as u64)
        } else {
            None
        }
    }

    // ---------------------------------------------------------------------
    // PUSH SIDE
    // ---------------------------------------------------------------------

    /// Pushes bytes into the ring. Partial writes are legal: the return
    /// value reports how many bytes fit.
    pub fn write(&self, buf: &[u8]) -> Result<usize, StreamError> {
        let mut st = lock(&self.state);
        if st.write_complete {
            return Err(StreamError::InvalidState("write after final_write"));
        }
        let n = st.ring.add(buf);
        st.write_offset += n as u64;
        Ok(n)
    }

    /// Pushes the last bytes. Whatever does not fit is parked and drained
    /// into the ring as serial reads free space.
    pub fn final_write(&self, buf: &[u8]) -> Result<(), StreamError> {
        let mut st = lock(&self.state);
        if st.write_complete {
            return Err(StreamError::InvalidState("final_write twice"));
        }
        let n = st.ring.add(buf);
        st.write_offset += n as u64;
        if n < buf.len() {
            st.final_buf = Some(buf[n..].to_vec());
            st.final_pos = 0;
        }
        st.write_complete = true;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // SERIAL SIDE
    // ---------------------------------------------------------------------

    /// Consumes up to `buf.len()` bytes at the serial cursor.
    ///
    /// When consumption leaves less than the request threshold pending,
    /// the registered [`SerialDataSource`] is invoked on the ambient
    /// tokio runtime; a fault in that callback is latched and surfaced by
    /// the first subsequent serial read that drains to zero.
    pub fn read(&self, buf: &mut [u8]) -> Result<IoResult, StreamError> {
        let (result, refill) = {
            let mut st = lock(&self.state);
            if st.read_complete {
                return Ok(IoResult::end(st.read_offset));
            }
            st.drain_final();
            let all_written = st.all_written();
            let taken = st.ring.take(buf);
            let offset = st.read_offset;
            st.read_offset += taken as u64;
            debug_assert_read_window!(st.read_offset, st.write_offset);

            let is_end = all_written && taken < buf.len();
            if is_end {
                st.read_complete = true;
            }
            if taken == 0 {
                if let Some(err) = st.serial_request_error.clone() {
                    return Err(err);
                }
            }

            let refill = if !st.write_complete
                && st.ring.pending() < st.request_threshold
                && !st.refill_in_flight
            {
                st.refill_in_flight = true;
                Some(st.ring.free())
            } else {
                None
            };
            (IoResult::new(offset, taken, is_end), refill)
        };
        if let Some(want) = refill {
            self.dispatch_serial_request(want);
        }
        Ok(result)
    }

    /// Async shell over [`read`](Self::read); the work itself runs
    /// synchronously within the call. Once the serial side is complete it
    /// keeps reporting the terminal result.
    pub async fn read_async(&self, buf: &mut [u8]) -> Result<IoResult, StreamError> {
        self.read(buf)
    }

    /// Hands the refill request to the registered source on the ambient
    /// runtime. Faults (and a missing runtime) are latched, not thrown.
    fn dispatch_serial_request(&self, size_wanted: usize) {
        let source = lock(&self.serial_source).clone();
        let (Some(source), Some(me)) = (source, self.weak.upgrade()) else {
            lock(&self.state).refill_in_flight = false;
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::trace!(size_wanted, "dispatching serial data request");
                handle.spawn(async move {
                    let outcome = source.data_requested(&me, size_wanted).await;
                    let mut st = lock(&me.state);
                    st.refill_in_flight = false;
                    if let Err(e) = outcome {
                        tracing::debug!(error = %e, "serial data request failed");
                        st.serial_request_error = Some(StreamError::SerialRequest(e.to_string()));
                    }
                });
            }
            Err(_) => {
                let mut st = lock(&self.state);
                st.refill_in_flight = false;
                st.serial_request_error = Some(StreamError::NoRuntime);
            }
        }
    }

    // ---------------------------------------------------------------------
    // RANDOM SIDE
    // ---------------------------------------------------------------------

    /// Positional read served from the resident window only.
    ///
    /// Requests beyond the window return `(write_offset, 0, all_written)`;
    /// requests starting below it are shifted up to the window start, the
    /// copied bytes landing at the matching position in `buf` (i.e. at
    /// `buf[result.offset - offset..]`). Latched serial-request errors
    /// are ignored on this path.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<IoResult, StreamError> {
        let st = lock(&self.state);
        Ok(Self::cached_read_at(&st, buf, offset))
    }

    fn cached_read_at(st: &ReaderState, buf: &mut [u8], offset: u64) -> IoResult {
        let available = st.ring.readable() as u64;
        let window_start = st.write_offset.saturating_sub(available);
        let all_written = st.all_written();

        if offset >= window_start {
            let delta = offset - window_start;
            if delta >= available {
                // entirely beyond the window
                return IoResult::new(st.write_offset, 0, all_written);
            }
            let n = st.ring.read(buf, delta as usize);
            let is_end = all_written && (n < buf.len() || offset == st.write_offset);
            IoResult::new(offset, n, is_end)
        } else {
            // request starts below the window: shift up to the window
            // start and shorten accordingly
            let shortfall = (window_start - offset) as usize;
            if shortfall >= buf.len() {
                return IoResult::new(window_start, 0, false);
            }
            let n = st.ring.read(&mut buf[shortfall..], 0);
            let is_end = all_written && n < buf.len() - shortfall;
            IoResult::new(window_start, n, is_end)
        }
    }

    /// Positional read falling back to the registered
    /// [`RandomDataSource`] for whatever the window cannot serve.
    ///
    /// When the request is cut at both ends, only the older (front) gap
    /// is delegated — the request is split once, not twice. `buf` must
    /// not be shared with another in-flight operation: stitched portions
    /// are written at their request-relative positions.
    pub async fn read_at_async(
        &self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<IoResult, StreamError> {
        let cached = {
            let st = lock(&self.state);
            Self::cached_read_at(&st, buf, offset)
        };
        let handler = lock(&self.random_source).clone();
        let Some(handler) = handler else {
            return Ok(cached);
        };

        if cached.count == 0 {
            // nothing came from the window: delegate the whole request
            return handler
                .data_requested(buf, offset)
                .await
                .map_err(|e| StreamError::RandomRequest(e.to_string()));
        }

        if cached.offset > offset {
            // front truncation: the window served bytes at
            // buf[shortfall..]; ask the handler for the older gap ahead
            // of them
            let shortfall = (cached.offset - offset) as usize;
            let filled = handler
                .data_requested(&mut buf[..shortfall], offset)
                .await
                .map_err(|e| StreamError::RandomRequest(e.to_string()))?;
            if filled.count == shortfall {
                // gap bridged; the window's end flag stands
                return Ok(IoResult::new(offset, shortfall + cached.count, cached.is_end));
            }
            return Ok(IoResult::new(offset, filled.count, filled.is_end));
        }

        if cached.count < buf.len() && !cached.is_end {
            // back gap past the window
            let tail_offset = offset + cached.count as u64;
            let filled = handler
                .data_requested(&mut buf[cached.count..], tail_offset)
                .await
                .map_err(|e| StreamError::RandomRequest(e.to_string()))?;
            return Ok(IoResult::new(
                offset,
                cached.count + filled.count,
                filled.is_end,
            ));
        }

        Ok(cached)
    }
}

impl seqio::SerialRead for BufferedReader {
    fn size(&self) -> Option<u64> {
        BufferedReader::size(self)
    }

    fn read(&mut self, buf: &mut [u8]) -> seqio::Result<IoResult> {
        BufferedReader::read(self, buf).map_err(Into::into)
    }
}

impl seqio::RandomRead for BufferedReader {
    fn size(&self) -> Option<u64> {
        BufferedReader::size(self)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> seqio::Result<IoResult> {
        BufferedReader::read_at(self, buf, offset).map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl crate::traits::SerialAsyncRead for BufferedReader {
    fn size(&self) -> Option<u64> {
        BufferedReader::size(self)
    }

    async fn read(&self, buf: &mut [u8]) -> Result<IoResult, StreamError> {
        self.read_async(buf).await
    }
}

#[async_trait::async_trait]
impl crate::traits::RandomAsyncRead for BufferedReader {
    fn size(&self) -> Option<u64> {
        BufferedReader::size(self)
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<IoResult, StreamError> {
        self.read_at_async(buf, offset).await
    }
}

/// Lock helper that shrugs off poisoning: state behind the lock is kept
/// consistent by construction, a panicking peer does not invalidate it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
