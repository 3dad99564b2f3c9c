use crate::merger::ResultMerger;
use bytes::Bytes;
use skyq_common::{ChunkId, Result};
use std::sync::Arc;

/// Streaming intake buffer of one chunk request.
///
/// The transport writes response bytes into the fixed buffer; on each
/// framed boundary (or when the buffer fills) the accumulated region is
/// flushed to the merger. `flush` blocks until the merger ingested the
/// fragment, which is the back-pressure contract: the transport must not
/// issue a new read until the prior flush returned.
pub struct ResultReceiver {
    chunk: ChunkId,
    attempt: u32,
    merger: Arc<ResultMerger>,
    buf: Vec<u8>,
    cursor: usize,
    flush_count: u32,
    saw_last: bool,
}

impl ResultReceiver {
    /// Receiver over a fixed `capacity`-byte buffer.
    pub fn new(chunk: ChunkId, attempt: u32, capacity: usize, merger: Arc<ResultMerger>) -> Self {
        Self {
            chunk,
            attempt,
            merger,
            buf: vec![0; capacity.max(1)],
            cursor: 0,
            flush_count: 0,
            saw_last: false,
        }
    }

    /// Capacity of the reusable buffer.
    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    /// Writable region after the cursor.
    pub fn buffer(&mut self) -> &mut [u8] {
        let cursor = self.cursor;
        &mut self.buf[cursor..]
    }

    /// Number of completed flushes.
    pub fn flush_count(&self) -> u32 {
        self.flush_count
    }

    /// Whether the final flush was seen.
    pub fn saw_last(&self) -> bool {
        self.saw_last
    }

    /// Hand `[0, cursor + n_bytes)` to the merger and reset the cursor.
    ///
    /// Blocks until the merger ingested the fragment.
    pub async fn flush(&mut self, n_bytes: usize, is_last: bool) -> Result<()> {
        let end = self.cursor + n_bytes.min(self.buf.len() - self.cursor);
        let fragment = Bytes::copy_from_slice(&self.buf[..end]);
        self.cursor = 0;
        if !fragment.is_empty() || is_last {
            self.merger
                .ingest(self.chunk, self.attempt, fragment)
                .await?;
            self.flush_count += 1;
        }
        if is_last {
            self.saw_last = true;
        }
        Ok(())
    }

    /// Append streamed bytes, flushing whenever the buffer fills and once
    /// more on the final frame.
    pub async fn append(&mut self, mut bytes: &[u8], is_last: bool) -> Result<()> {
        while !bytes.is_empty() {
            let room = self.buf.len() - self.cursor;
            let take = room.min(bytes.len());
            self.buf[self.cursor..self.cursor + take].copy_from_slice(&bytes[..take]);
            self.cursor += take;
            bytes = &bytes[take..];
            if self.cursor == self.buf.len() {
                self.flush(0, false).await?;
            }
        }
        if is_last {
            self.flush(0, true).await?;
        }
        Ok(())
    }

    /// Terminate the stream with a structured error; staged rows of this
    /// attempt will be discarded by the owning request.
    pub async fn error_flush(&mut self, msg: &str, code: i32) {
        self.cursor = 0;
        self.merger.error_flush(self.chunk, code, msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::{ResultMerger, ResultStore};
    use async_trait::async_trait;
    use skyq_common::{QueryId, Result};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        fragments: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ResultStore for RecordingStore {
        async fn stage_rows(
            &self,
            _query: QueryId,
            _chunk: ChunkId,
            _attempt: u32,
            payload: Bytes,
        ) -> Result<u64> {
            self.fragments.lock().expect("fragments").push(payload.len());
            Ok(payload.len() as u64)
        }

        async fn commit_attempt(&self, _: QueryId, _: ChunkId, _: u32) -> Result<()> {
            Ok(())
        }

        async fn discard_attempt(&self, _: QueryId, _: ChunkId, _: u32) -> Result<()> {
            Ok(())
        }

        async fn run_merge(&self, _: QueryId, _: Option<&str>, _: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    fn receiver(capacity: usize, store: Arc<RecordingStore>) -> ResultReceiver {
        let merger = Arc::new(ResultMerger::new(QueryId(1), 1, None, None, store));
        ResultReceiver::new(ChunkId(100), 1, capacity, merger)
    }

    #[tokio::test]
    async fn final_append_always_flushes_with_is_last() {
        let store = Arc::new(RecordingStore::default());
        let mut rx = receiver(64, Arc::clone(&store));
        rx.append(b"some rows", true).await.expect("append");
        assert!(rx.saw_last());
        assert!(rx.flush_count() >= 1);
        assert_eq!(store.fragments.lock().expect("fragments").as_slice(), &[9]);
    }

    #[tokio::test]
    async fn full_buffer_flushes_mid_stream() {
        let store = Arc::new(RecordingStore::default());
        let mut rx = receiver(4, Arc::clone(&store));
        rx.append(b"0123456789", false).await.expect("append");
        // Two full-buffer flushes; two bytes remain buffered.
        assert_eq!(store.fragments.lock().expect("fragments").as_slice(), &[4, 4]);
        assert!(!rx.saw_last());
        rx.append(b"", true).await.expect("final");
        assert_eq!(
            store.fragments.lock().expect("fragments").as_slice(),
            &[4, 4, 2]
        );
        assert!(rx.saw_last());
    }

    #[tokio::test]
    async fn empty_last_frame_still_counts_as_final_flush() {
        let store = Arc::new(RecordingStore::default());
        let mut rx = receiver(16, store);
        rx.append(b"", true).await.expect("append");
        assert!(rx.saw_last());
        assert_eq!(rx.flush_count(), 1);
    }
}
