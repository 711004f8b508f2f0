//! Adapters lifting sync endpoints into the async capability set.

use async_trait::async_trait;
use bytes::Bytes;
use seqio::{IoResult, RandomWrite, SerialWrite};
use tokio::sync::Mutex;

use crate::error::StreamError;
use crate::traits::{RandomAsyncWrite, SerialAsyncWrite};

/// Lifts a sync [`RandomWrite`] (e.g. a `WriteSequencer`) into
/// [`RandomAsyncWrite`].
///
/// The inner writer serializes internally, so calls go straight through.
pub struct BlockingRandomWriter<W> {
    inner: W,
}

impl<W: RandomWrite> BlockingRandomWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W: RandomWrite> RandomAsyncWrite for BlockingRandomWriter<W> {
    async fn write_at(&self, data: Bytes, offset: u64) -> Result<bool, StreamError> {
        self.inner.write_at(data, offset).map_err(StreamError::from)
    }

    async fn end_write_at(&self, data: Bytes, offset: u64) -> Result<bool, StreamError> {
        self.inner
            .end_write_at(data, offset)
            .map_err(StreamError::from)
    }

    async fn set_complete(&self, abort: bool) -> Result<bool, StreamError> {
        self.inner.set_complete(abort).map_err(StreamError::from)
    }
}

/// Lifts a sync [`SerialWrite`] into [`SerialAsyncWrite`], copying the
/// caller's bytes before suspending.
///
/// The copy is deliberate: callers are free to reuse their buffer the
/// moment the call returns, while the write may still be waiting its
/// turn on the inner lock.
pub struct CloningSerialWriter<W> {
    inner: Mutex<W>,
}

impl<W: SerialWrite + Send> CloningSerialWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

#[async_trait]
impl<W: SerialWrite + Send> SerialAsyncWrite for CloningSerialWriter<W> {
    async fn write(&self, buf: &[u8]) -> Result<IoResult, StreamError> {
        let owned = Bytes::copy_from_slice(buf);
        let mut writer = self.inner.lock().await;
        writer.write(&owned).map_err(StreamError::from)
    }

    async fn final_write(&self, buf: &[u8]) -> Result<u64, StreamError> {
        let owned = Bytes::copy_from_slice(buf);
        let mut writer = self.inner.lock().await;
        writer.final_write(&owned).map_err(StreamError::from)
    }
}
