use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::invariants::debug_assert_emission_contiguous;
use crate::{Error, FilterWrite, RandomWrite, Result};

// =============================================================================
// REORDERING PROTOCOL
// =============================================================================
//
// Writes arrive keyed by an absolute target offset, in any order and from
// any thread. The sequencer holds them in a min-heap ordered by offset
// (submission order breaks ties) and maintains a downstream cursor
// `sequential_offset`: the next byte the sink expects.
//
// Whenever the head of the heap meets the cursor, a contiguous ready
// prefix is collected and emitted in one pass:
//
//   - a request entirely below the cursor duplicates data that was
//     already emitted; it is dropped,
//   - a request straddling the cursor is trimmed to its unwritten tail,
//   - a request starting past the cursor leaves a gap and stops the
//     collection.
//
// The sink may accept fewer bytes than offered. The refused suffix is
// kept in a carry slab (capacity rounded up to an 8-byte boundary) and
// retried on the next drain, so the sink only ever observes bytes in
// strictly increasing offset order with no gaps.
//
// =============================================================================

/// Callback invoked when the sequencer reaches its terminal state.
pub type CompletionFn = Box<dyn Fn(Option<&Error>) + Send + Sync>;

const SLAB_ALIGN: usize = 8;

/// Grows `slab` so that `additional` more bytes fit, keeping the
/// capacity aligned to [`SLAB_ALIGN`].
fn reserve_aligned(slab: &mut Vec<u8>, additional: usize) {
    let needed = slab.len() + additional;
    if needed > slab.capacity() {
        let target = (needed + SLAB_ALIGN - 1) & !(SLAB_ALIGN - 1);
        slab.reserve_exact(target - slab.len());
    }
}

/// A queued write: payload plus target offset plus a tie-breaking
/// submission sequence number.
struct QueuedWrite {
    offset: u64,
    seq: u64,
    data: Bytes,
}

impl QueuedWrite {
    fn end_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

impl PartialEq for QueuedWrite {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.seq == other.seq
    }
}

impl Eq for QueuedWrite {}

impl PartialOrd for QueuedWrite {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedWrite {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.offset, self.seq).cmp(&(other.offset, other.seq))
    }
}

struct SequencerState {
    queue: BinaryHeap<Reverse<QueuedWrite>>,
    next_seq: u64,
    /// Next byte the downstream sink expects.
    sequential_offset: u64,
    /// Final stream size; meaningful once `final_request` has been set.
    end_offset: u64,
    final_request: Option<(Bytes, u64)>,
    completed: bool,
    /// Carry slab holding bytes the sink refused.
    carry: Vec<u8>,
    sink: Box<dyn FilterWrite + Send>,
}

impl SequencerState {
    /// Collects the contiguous ready prefix of the queue and emits it.
    /// A sink failure drops the queue and propagates.
    fn drain_ready(&mut self) -> Result<()> {
        let mut ready: Vec<Bytes> = Vec::new();
        let mut cursor = self.sequential_offset;
        while let Some(Reverse(next)) = self.queue.peek() {
            if next.offset > cursor {
                break; // gap not yet filled
            }
            let delta = (cursor - next.offset) as usize;
            let Some(Reverse(req)) = self.queue.pop() else {
                break;
            };
            if delta >= req.data.len() {
                // entirely below the cursor: already emitted, drop it
                continue;
            }
            let seg = req.data.slice(delta..);
            debug_assert_emission_contiguous!(cursor, req.offset + delta as u64);
            cursor += seg.len() as u64;
            ready.push(seg);
        }
        self.sequential_offset = cursor;
        if ready.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.perform_writes(&ready) {
            self.queue.clear();
            return Err(e);
        }
        Ok(())
    }

    /// Emits the collected segments, coalescing through the carry slab.
    /// A lone segment with nothing carried goes to the sink uncopied.
    fn perform_writes(&mut self, segments: &[Bytes]) -> Result<()> {
        if self.carry.is_empty() && segments.len() == 1 {
            let seg = &segments[0];
            let accepted = self.sink.write(seg)?;
            if accepted < seg.len() {
                reserve_aligned(&mut self.carry, seg.len() - accepted);
                self.carry.extend_from_slice(&seg[accepted..]);
            }
            return Ok(());
        }
        let total: usize = segments.iter().map(Bytes::len).sum();
        reserve_aligned(&mut self.carry, total);
        for seg in segments {
            self.carry.extend_from_slice(seg);
        }
        let accepted = self.sink.write(&self.carry)?;
        self.carry.drain(..accepted);
        Ok(())
    }

    /// Fires the final write once the queue is empty and the gap before
    /// the final request has closed. Returns `true` when the sequencer
    /// completed.
    fn check_final(&mut self) -> Result<bool> {
        if self.completed || !self.queue.is_empty() {
            return Ok(false);
        }
        let seg = {
            let Some((data, offset)) = self.final_request.as_ref() else {
                return Ok(false);
            };
            if *offset > self.sequential_offset {
                return Ok(false); // gap remains
            }
            let delta = (self.sequential_offset - *offset) as usize;
            if delta >= data.len() {
                Bytes::new()
            } else {
                data.slice(delta..)
            }
        };
        self.perform_final(&seg)?;
        self.final_request = None;
        self.sequential_offset = self.end_offset;
        self.completed = true;
        Ok(true)
    }

    /// Flushes the carry slab together with the final segment through the
    /// sink's terminal write.
    fn perform_final(&mut self, seg: &[u8]) -> Result<()> {
        if self.carry.is_empty() {
            self.sink.final_write(seg)?;
        } else {
            reserve_aligned(&mut self.carry, seg.len());
            self.carry.extend_from_slice(seg);
            let buf = std::mem::take(&mut self.carry);
            self.sink.final_write(&buf)?;
        }
        Ok(())
    }
}

/// Turns random-offset writes into a strictly ordered, gap-free stream
/// to a [`FilterWrite`] sink.
///
/// All methods take `&self`; a single internal lock serializes state, so
/// writes may be submitted from any thread. Payloads are retained as
/// [`Bytes`] handles until their turn comes — callers are free to reuse
/// or drop their own buffers immediately after submission.
pub struct WriteSequencer {
    inner: Mutex<SequencerState>,
    on_completed: Mutex<Option<CompletionFn>>,
}

impl WriteSequencer {
    /// Creates a sequencer emitting to the given sink.
    pub fn new(sink: Box<dyn FilterWrite + Send>) -> Self {
        Self {
            inner: Mutex::new(SequencerState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                sequential_offset: 0,
                end_offset: 0,
                final_request: None,
                completed: false,
                carry: Vec::new(),
                sink,
            }),
            on_completed: Mutex::new(None),
        }
    }

    /// Registers a callback fired once, when the sequencer completes
    /// (normally or by abort).
    pub fn set_on_completed(&self, callback: CompletionFn) {
        *lock(&self.on_completed) = Some(callback);
    }

    /// Returns `true` once the sequencer has reached its terminal state.
    pub fn is_complete(&self) -> bool {
        lock(&self.inner).completed
    }

    /// Next byte offset the downstream sink expects.
    pub fn sequential_offset(&self) -> u64 {
        lock(&self.inner).sequential_offset
    }

    /// Number of writes waiting for their gap to close.
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Submits `data` targeted at the absolute `offset`.
    ///
    /// Returns `Ok(false)` if the sequencer has already completed. Fails
    /// with [`Error::RangeExceeded`] when an end write has fixed the final
    /// size and this write would extend past it.
    pub fn write(&self, data: Bytes, offset: u64) -> Result<bool> {
        let completed_now = {
            let mut st = lock(&self.inner);
            if st.completed {
                return Ok(false);
            }
            if st.final_request.is_some() && offset + data.len() as u64 > st.end_offset {
                return Err(Error::RangeExceeded {
                    offset,
                    count: data.len(),
                    end_offset: st.end_offset,
                });
            }
            let seq = st.next_seq;
            st.next_seq += 1;
            st.queue.push(Reverse(QueuedWrite { offset, seq, data }));
            st.drain_ready()?;
            st.check_final()?
        };
        if completed_now {
            self.emit_completed(None);
        }
        Ok(true)
    }

    /// Submits the terminal write and fixes the final stream size at
    /// `offset + data.len()`. An empty payload is legal and fixes the
    /// size at `offset`.
    ///
    /// Returns `Ok(false)` if already completed or a final write was
    /// already recorded. Fails when the fixed size would cut below data
    /// already sequenced or below a queued write.
    pub fn end_write(&self, data: Bytes, offset: u64) -> Result<bool> {
        let completed_now = {
            let mut st = lock(&self.inner);
            if st.completed || st.final_request.is_some() {
                return Ok(false);
            }
            let end = offset + data.len() as u64;
            if st.sequential_offset > end {
                return Err(Error::InvalidState(
                    "final size shrinks below already-sequenced data",
                ));
            }
            if st.queue.iter().any(|Reverse(q)| q.end_offset() > end) {
                return Err(Error::InvalidState(
                    "queued write extends past the final size",
                ));
            }
            st.end_offset = end;
            st.final_request = Some((data, offset));
            st.check_final()?
        };
        if completed_now {
            self.emit_completed(None);
        }
        Ok(true)
    }

    /// Completes the sequencer.
    ///
    /// With `abort`, queued writes are discarded and the sequencer
    /// completes immediately. Without, completion must already have been
    /// reachable: an end write recorded, nothing queued, no gap open —
    /// in which case the sequencer completed when the final write fired,
    /// and this call reports `Ok(false)`.
    pub fn set_complete(&self, abort: bool) -> Result<bool> {
        {
            let mut st = lock(&self.inner);
            if st.completed {
                return Ok(false);
            }
            if !abort {
                if st.final_request.is_none() {
                    return Err(Error::InvalidState("set_complete before an end write"));
                }
                if !st.queue.is_empty() {
                    return Err(Error::InvalidState("completing with writes still queued"));
                }
                return Err(Error::InvalidState(
                    "completing with the final write still unreachable",
                ));
            }
            st.queue.clear();
            st.final_request = None;
            st.completed = true;
        }
        self.emit_completed(None);
        Ok(true)
    }

    fn emit_completed(&self, error: Option<&Error>) {
        let cb = lock(&self.on_completed);
        if let Some(cb) = cb.as_ref() {
            cb(error);
        }
    }
}

impl RandomWrite for WriteSequencer {
    fn write_at(&self, data: Bytes, offset: u64) -> Result<bool> {
        self.write(data, offset)
    }

    fn end_write_at(&self, data: Bytes, offset: u64) -> Result<bool> {
        self.end_write(data, offset)
    }

    fn set_complete(&self, abort: bool) -> Result<bool> {
        WriteSequencer::set_complete(self, abort)
    }
}

/// Lock helper that shrugs off poisoning: state behind the lock is kept
/// consistent by construction, a panicking peer does not invalidate it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct SinkLog {
        writes: Vec<Vec<u8>>,
        final_chunk: Option<Vec<u8>>,
        accept_limit: Option<usize>,
    }

    /// Test sink recording every emission; optionally accepts only a
    /// prefix of each write.
    struct RecordingSink(Arc<Mutex<SinkLog>>);

    impl RecordingSink {
        fn new() -> (Self, Arc<Mutex<SinkLog>>) {
            let log = Arc::new(Mutex::new(SinkLog::default()));
            (Self(Arc::clone(&log)), log)
        }
    }

    impl FilterWrite for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            let mut log = self.0.lock().unwrap();
            let n = log.accept_limit.map_or(buf.len(), |limit| buf.len().min(limit));
            log.writes.push(buf[..n].to_vec());
            Ok(n)
        }

        fn final_write(&mut self, buf: &[u8]) -> Result<()> {
            let mut log = self.0.lock().unwrap();
            log.final_chunk = Some(buf.to_vec());
            Ok(())
        }
    }

    fn emitted(log: &Arc<Mutex<SinkLog>>) -> Vec<u8> {
        let log = log.lock().unwrap();
        let mut all: Vec<u8> = log.writes.iter().flatten().copied().collect();
        if let Some(f) = &log.final_chunk {
            all.extend_from_slice(f);
        }
        all
    }

    #[test]
    fn test_out_of_order_writes_coalesce() {
        let (sink, log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));

        assert!(seq.write(Bytes::from_static(&[4, 5, 6, 7]), 4).unwrap());
        assert_eq!(log.lock().unwrap().writes.len(), 0);

        assert!(seq.write(Bytes::from_static(&[0, 1]), 0).unwrap());
        assert_eq!(log.lock().unwrap().writes.len(), 1);

        assert!(seq.write(Bytes::from_static(&[2, 3]), 2).unwrap());
        // The last call released both the gap filler and the parked
        // request in a single coalesced emission.
        let guard = log.lock().unwrap();
        assert_eq!(guard.writes.len(), 2);
        assert_eq!(guard.writes[1], vec![2, 3, 4, 5, 6, 7]);
        drop(guard);
        assert_eq!(emitted(&log), (0..8).collect::<Vec<u8>>());
        assert_eq!(seq.sequential_offset(), 8);
    }

    #[test]
    fn test_end_write_defers_until_gap_closes() {
        let (sink, log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = Arc::clone(&fired);
        seq.set_on_completed(Box::new(move |err| {
            assert!(err.is_none());
            fired_in_cb.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(seq.end_write(Bytes::from_static(&[4, 5, 6, 7]), 4).unwrap());
        assert!(!seq.is_complete());
        assert!(log.lock().unwrap().final_chunk.is_none());

        assert!(seq.write(Bytes::from_static(&[0, 1, 2, 3]), 0).unwrap());
        assert!(seq.is_complete());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(emitted(&log), (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_overlap_written_exactly_once() {
        let (sink, log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));

        seq.write(Bytes::from_static(&[0, 1, 2, 3]), 0).unwrap();
        // Overlaps [2, 4); only the tail [4, 6) is new.
        seq.write(Bytes::from_static(&[2, 3, 4, 5]), 2).unwrap();
        assert_eq!(emitted(&log), vec![0, 1, 2, 3, 4, 5]);

        // Entirely below the cursor: dropped outright.
        seq.write(Bytes::from_static(&[0, 1]), 0).unwrap();
        assert_eq!(emitted(&log), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(seq.sequential_offset(), 6);
    }

    #[test]
    fn test_carry_retries_refused_suffix() {
        let (sink, log) = RecordingSink::new();
        log.lock().unwrap().accept_limit = Some(3);
        let seq = WriteSequencer::new(Box::new(sink));

        seq.write(Bytes::from_static(&[0, 1, 2, 3, 4]), 0).unwrap();
        // Sink took 3; the suffix is carried.
        assert_eq!(log.lock().unwrap().writes.last().unwrap(), &vec![0, 1, 2]);

        log.lock().unwrap().accept_limit = None;
        seq.write(Bytes::from_static(&[5, 6]), 5).unwrap();
        // Carry flushed together with the new segment.
        assert_eq!(log.lock().unwrap().writes.last().unwrap(), &vec![3, 4, 5, 6]);
        assert_eq!(emitted(&log), (0..7).collect::<Vec<u8>>());
    }

    #[test]
    fn test_write_past_final_size_fails() {
        let (sink, _log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));

        seq.write(Bytes::from_static(&[0, 1]), 0).unwrap();
        seq.end_write(Bytes::from_static(&[6, 7]), 6).unwrap();
        let err = seq.write(Bytes::from_static(&[7, 8, 9]), 7).unwrap_err();
        assert!(matches!(err, Error::RangeExceeded { end_offset: 8, .. }));
    }

    #[test]
    fn test_end_write_rejects_shrinkage() {
        let (sink, _log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));

        seq.write(Bytes::from_static(&[0, 1, 2, 3]), 0).unwrap();
        let err = seq.end_write(Bytes::from_static(&[2]), 2).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // A queued (gapped) request past the proposed end also rejects.
        seq.write(Bytes::from_static(&[8, 9]), 8).unwrap();
        let err = seq.end_write(Bytes::new(), 6).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_completed_writer_reports_false() {
        let (sink, _log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));

        seq.end_write(Bytes::from_static(&[0, 1]), 0).unwrap();
        assert!(seq.is_complete());
        assert!(!seq.write(Bytes::from_static(&[9]), 9).unwrap());
        assert!(!seq.end_write(Bytes::new(), 2).unwrap());
        assert!(!seq.set_complete(true).unwrap());
    }

    #[test]
    fn test_abort_discards_queue() {
        let (sink, log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));

        // Gapped request that will never become ready.
        seq.write(Bytes::from_static(&[5, 6]), 5).unwrap();
        assert_eq!(seq.pending_requests(), 1);
        assert!(seq.set_complete(true).unwrap());
        assert!(seq.is_complete());
        assert_eq!(seq.pending_requests(), 0);
        assert!(emitted(&log).is_empty());
    }

    #[test]
    fn test_set_complete_requires_end_write() {
        let (sink, _log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));
        let err = seq.set_complete(false).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_zero_length_end_write_completes() {
        let (sink, log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));

        seq.write(Bytes::from_static(&[0, 1, 2]), 0).unwrap();
        assert!(seq.end_write(Bytes::new(), 3).unwrap());
        assert!(seq.is_complete());
        let guard = log.lock().unwrap();
        assert_eq!(guard.final_chunk.as_deref(), Some(&[][..]));
        drop(guard);
        assert_eq!(emitted(&log), vec![0, 1, 2]);
    }

    #[test]
    fn test_final_overlap_is_truncated() {
        let (sink, log) = RecordingSink::new();
        let seq = WriteSequencer::new(Box::new(sink));

        seq.end_write(Bytes::from_static(&[4, 5, 6, 7]), 4).unwrap();
        // Covers [0, 6): the final request's first two bytes are already
        // sequenced when the gap closes; only [6, 8) goes out with the
        // terminal write.
        seq.write(Bytes::from_static(&[0, 1, 2, 3, 4, 5]), 0).unwrap();
        assert!(seq.is_complete());
        assert_eq!(
            log.lock().unwrap().final_chunk.as_deref(),
            Some(&[6u8, 7][..])
        );
        assert_eq!(emitted(&log), (0..8).collect::<Vec<u8>>());
    }
}
