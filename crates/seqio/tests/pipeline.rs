//! End-to-end pipeline tests: sequencer → filter chain → file endpoint.

use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use seqio::{Crc32Digest, Filter, FilterWriter, IoResult, SerialSink, SerialWrite, WriteSequencer};
use std::fs;
use std::io::Write;

/// Serial file endpoint used as the pipeline terminal.
struct FileWriter {
    file: fs::File,
    offset: u64,
}

impl FileWriter {
    fn new(file: fs::File) -> Self {
        Self { file, offset: 0 }
    }
}

impl SerialWrite for FileWriter {
    fn write(&mut self, buf: &[u8]) -> seqio::Result<IoResult> {
        let n = self.file.write(buf)?;
        let offset = self.offset;
        self.offset += n as u64;
        Ok(IoResult::new(offset, n, false))
    }

    fn final_write(&mut self, buf: &[u8]) -> seqio::Result<u64> {
        self.file.write_all(buf)?;
        self.file.flush()?;
        self.offset += buf.len() as u64;
        Ok(self.offset)
    }
}

#[test]
fn test_shuffled_writes_reach_file_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sequenced.bin");

    let payload: Vec<u8> = (0u32..4096).map(|i| (i % 251) as u8).collect();
    let chunk = 97usize; // deliberately not a divisor of the payload size

    let (digest, reader) = Crc32Digest::new();
    let stage = FilterWriter::new(
        Filter::Digest(digest),
        SerialSink::new(FileWriter::new(fs::File::create(&path).unwrap())),
    );
    let seq = WriteSequencer::new(Box::new(stage));

    let mut offsets: Vec<usize> = (0..payload.len()).step_by(chunk).collect();
    let last = offsets.pop().unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eb0);
    offsets.shuffle(&mut rng);

    for off in offsets {
        let end = (off + chunk).min(payload.len());
        assert!(seq
            .write(Bytes::copy_from_slice(&payload[off..end]), off as u64)
            .unwrap());
    }
    // The tail chunk fixes the final size and completes the pipeline.
    assert!(seq
        .end_write(Bytes::copy_from_slice(&payload[last..]), last as u64)
        .unwrap());
    assert!(seq.is_complete());

    let written = fs::read(&path).unwrap();
    assert_eq!(written, payload);
    assert_eq!(reader.value(), crc32fast::hash(&payload));
}

#[test]
fn test_abort_leaves_partial_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aborted.bin");

    let stage = FilterWriter::new(
        Filter::Identity,
        SerialSink::new(FileWriter::new(fs::File::create(&path).unwrap())),
    );
    let seq = WriteSequencer::new(Box::new(stage));

    seq.write(Bytes::from_static(&[1, 2, 3]), 0).unwrap();
    // Gapped request that never becomes ready.
    seq.write(Bytes::from_static(&[9, 9]), 10).unwrap();
    assert!(seq.set_complete(true).unwrap());

    // Only the contiguous prefix made it out.
    assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3]);
}
