use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::{Error, FilterWrite, Result, SerialWrite};

// =============================================================================
// PUSH PIPELINE
// =============================================================================
//
// A `FilterWriter` fronts a downstream `FilterWrite` stage with one
// transform. Stages chain by nesting (`FilterWriter<FilterWriter<...>>`);
// the chain terminates in a `SerialSink` adapting a plain `SerialWrite`
// endpoint.
//
// The identity and digest filters forward the caller's slice as-is — no
// transform-output copy is made. Transform filters emit into a reusable
// output buffer first. Either way, whatever the next stage refuses is
// kept in a carry slab (capacity rounded up to an 8-byte boundary) and
// flushed ahead of later bytes, so ordering is preserved end to end.
//
// =============================================================================

const SLAB_ALIGN: usize = 8;

fn reserve_aligned(slab: &mut Vec<u8>, additional: usize) {
    let needed = slab.len() + additional;
    if needed > slab.capacity() {
        let target = (needed + SLAB_ALIGN - 1) & !(SLAB_ALIGN - 1);
        slab.reserve_exact(target - slab.len());
    }
}

/// A byte transform for one pipeline stage.
///
/// Implementations may buffer internally (block transforms) and emit
/// everything on `final_transform`.
pub trait Transform: Send {
    /// Transforms `input`, appending the generated bytes to `out`.
    fn transform(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Transforms the last `input` bytes and flushes anything buffered,
    /// appending to `out`.
    fn final_transform(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;
}

/// The filter applied by one stage.
pub enum Filter {
    /// Pass bytes through untouched.
    Identity,
    /// Pass bytes through while folding them into a CRC32 checksum.
    Digest(Crc32Digest),
    /// Arbitrary byte transform.
    Transform(Box<dyn Transform>),
}

/// Running CRC32 over everything written through a digest filter.
///
/// The current value is published to the paired [`DigestReader`] after
/// every update, so it can be observed while the stage is still open.
pub struct Crc32Digest {
    hasher: crc32fast::Hasher,
    value: Arc<AtomicU32>,
}

impl Crc32Digest {
    /// Creates a digest and the handle its value is read through.
    pub fn new() -> (Self, DigestReader) {
        let value = Arc::new(AtomicU32::new(0));
        (
            Self {
                hasher: crc32fast::Hasher::new(),
                value: Arc::clone(&value),
            },
            DigestReader(value),
        )
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.value
            .store(self.hasher.clone().finalize(), Ordering::Release);
    }
}

/// Read side of a [`Crc32Digest`].
#[derive(Clone)]
pub struct DigestReader(Arc<AtomicU32>);

impl DigestReader {
    /// CRC32 of everything written so far.
    pub fn value(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

/// One stage of a push-style transform pipeline.
pub struct FilterWriter<S> {
    filter: Filter,
    next: S,
    /// Bytes the next stage refused, flushed ahead of anything newer.
    carry: Vec<u8>,
    /// Reusable transform output buffer.
    out: Vec<u8>,
    finished: bool,
}

impl<S: FilterWrite> FilterWriter<S> {
    /// Creates a stage applying `filter` in front of `next`.
    pub fn new(filter: Filter, next: S) -> Self {
        Self {
            filter,
            next,
            carry: Vec::new(),
            out: Vec::new(),
            finished: false,
        }
    }

    /// Consumes the stage, returning the downstream stage.
    pub fn into_next(self) -> S {
        self.next
    }

    fn forward(next: &mut S, carry: &mut Vec<u8>, data: &[u8]) -> Result<()> {
        if carry.is_empty() {
            let accepted = next.write(data)?;
            if accepted < data.len() {
                reserve_aligned(carry, data.len() - accepted);
                carry.extend_from_slice(&data[accepted..]);
            }
        } else {
            reserve_aligned(carry, data.len());
            carry.extend_from_slice(data);
            let accepted = next.write(carry)?;
            carry.drain(..accepted);
        }
        Ok(())
    }
}

impl<S: FilterWrite> FilterWrite for FilterWriter<S> {
    /// Pushes bytes through the stage. The full input is always accepted;
    /// output the next stage refuses is carried internally.
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.finished {
            return Err(Error::InvalidState("write after final_write"));
        }
        match &mut self.filter {
            Filter::Identity => {
                Self::forward(&mut self.next, &mut self.carry, buf)?;
            }
            Filter::Digest(digest) => {
                digest.update(buf);
                Self::forward(&mut self.next, &mut self.carry, buf)?;
            }
            Filter::Transform(transform) => {
                self.out.clear();
                transform.transform(buf, &mut self.out)?;
                Self::forward(&mut self.next, &mut self.carry, &self.out)?;
            }
        }
        Ok(buf.len())
    }

    fn final_write(&mut self, buf: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidState("final_write twice"));
        }
        self.out.clear();
        match &mut self.filter {
            Filter::Identity => self.out.extend_from_slice(buf),
            Filter::Digest(digest) => {
                digest.update(buf);
                self.out.extend_from_slice(buf);
            }
            Filter::Transform(transform) => {
                transform.final_transform(buf, &mut self.out)?;
            }
        }
        if self.carry.is_empty() {
            self.next.final_write(&self.out)?;
        } else {
            reserve_aligned(&mut self.carry, self.out.len());
            self.carry.extend_from_slice(&self.out);
            let tail = std::mem::take(&mut self.carry);
            self.next.final_write(&tail)?;
        }
        self.finished = true;
        Ok(())
    }
}

/// Terminal pipeline stage adapting a [`SerialWrite`] endpoint to the
/// push interface.
pub struct SerialSink<W> {
    writer: W,
}

impl<W: SerialWrite> SerialSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: SerialWrite> FilterWrite for SerialSink<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let result = self.writer.write(buf)?;
        Ok(result.count)
    }

    fn final_write(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.final_write(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IoResult;

    /// Growable in-memory endpoint with an optional per-call accept cap.
    #[derive(Default)]
    struct MemoryWriter {
        data: Vec<u8>,
        accept_limit: Option<usize>,
        finished: bool,
    }

    impl SerialWrite for MemoryWriter {
        fn write(&mut self, buf: &[u8]) -> Result<IoResult> {
            let offset = self.data.len() as u64;
            let n = self.accept_limit.map_or(buf.len(), |limit| buf.len().min(limit));
            self.data.extend_from_slice(&buf[..n]);
            Ok(IoResult::new(offset, n, false))
        }

        fn final_write(&mut self, buf: &[u8]) -> Result<u64> {
            self.data.extend_from_slice(buf);
            self.finished = true;
            Ok(self.data.len() as u64)
        }
    }

    /// XOR transform: cheap, invertible, order-revealing.
    struct XorTransform(u8);

    impl Transform for XorTransform {
        fn transform(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
            out.extend(input.iter().map(|b| b ^ self.0));
            Ok(())
        }

        fn final_transform(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
            self.transform(input, out)
        }
    }

    #[test]
    fn test_identity_passes_through() {
        let mut stage = FilterWriter::new(Filter::Identity, SerialSink::new(MemoryWriter::default()));
        assert_eq!(stage.write(&[1, 2, 3]).unwrap(), 3);
        stage.final_write(&[4, 5]).unwrap();
        let sink = stage.into_next().into_inner();
        assert_eq!(sink.data, vec![1, 2, 3, 4, 5]);
        assert!(sink.finished);
    }

    #[test]
    fn test_digest_is_identity_on_data() {
        let (digest, reader) = Crc32Digest::new();
        let mut stage = FilterWriter::new(Filter::Digest(digest), SerialSink::new(MemoryWriter::default()));
        stage.write(b"hello ").unwrap();
        stage.final_write(b"world").unwrap();

        let sink = stage.into_next().into_inner();
        assert_eq!(sink.data, b"hello world");
        assert_eq!(reader.value(), crc32fast::hash(b"hello world"));
    }

    #[test]
    fn test_digest_independent_of_chunking() {
        let payload: Vec<u8> = (0u8..200).collect();
        let mut split = None;
        for chunk in [1usize, 7, 64, 200] {
            let (digest, reader) = Crc32Digest::new();
            let mut stage =
                FilterWriter::new(Filter::Digest(digest), SerialSink::new(MemoryWriter::default()));
            for part in payload.chunks(chunk) {
                stage.write(part).unwrap();
            }
            stage.final_write(&[]).unwrap();
            let value = reader.value();
            assert_eq!(*split.get_or_insert(value), value);
        }
    }

    #[test]
    fn test_transform_stage() {
        let mut stage = FilterWriter::new(
            Filter::Transform(Box::new(XorTransform(0xff))),
            SerialSink::new(MemoryWriter::default()),
        );
        assert_eq!(stage.write(&[0x00, 0x0f]).unwrap(), 2);
        stage.final_write(&[0xf0]).unwrap();
        let sink = stage.into_next().into_inner();
        assert_eq!(sink.data, vec![0xff, 0xf0, 0x0f]);
    }

    #[test]
    fn test_refused_residue_is_carried_in_order() {
        let sink = MemoryWriter {
            accept_limit: Some(2),
            ..MemoryWriter::default()
        };
        let mut stage = FilterWriter::new(Filter::Identity, SerialSink::new(sink));

        // Sink takes 2 of 5; the rest rides in the carry slab.
        assert_eq!(stage.write(&[0, 1, 2, 3, 4]).unwrap(), 5);
        // Carry is flushed ahead of the new bytes (2 more accepted).
        assert_eq!(stage.write(&[5, 6]).unwrap(), 2);
        // Final write drains everything left.
        stage.final_write(&[7]).unwrap();

        let sink = stage.into_next().into_inner();
        assert_eq!(sink.data, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_chained_stages() {
        let (digest, reader) = Crc32Digest::new();
        let inner = FilterWriter::new(
            Filter::Transform(Box::new(XorTransform(0xaa))),
            SerialSink::new(MemoryWriter::default()),
        );
        let mut outer = FilterWriter::new(Filter::Digest(digest), inner);

        outer.write(&[0xaa, 0x00]).unwrap();
        outer.final_write(&[0xff]).unwrap();

        // Digest saw the plaintext, the endpoint saw the transform output.
        assert_eq!(reader.value(), crc32fast::hash(&[0xaa, 0x00, 0xff]));
        let sink = outer.into_next().into_next().into_inner();
        assert_eq!(sink.data, vec![0x00, 0xaa, 0x55]);
    }

    #[test]
    fn test_locked_after_final_write() {
        let mut stage = FilterWriter::new(Filter::Identity, SerialSink::new(MemoryWriter::default()));
        stage.final_write(&[1]).unwrap();
        assert!(matches!(
            stage.write(&[2]).unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            stage.final_write(&[3]).unwrap_err(),
            Error::InvalidState(_)
        ));
    }
}
