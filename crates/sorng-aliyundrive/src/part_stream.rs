//! Streaming body for one upload part.
//!
//! Each read is slice → progress callback → rate limiter. A `false` from the
//! progress callback, or a cancelled limiter wait, fails the stream and sets
//! the shared `cancelled` flag so the caller can tell a user abort apart
//! from a network error.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::rate_limit::TokenBucket;
use crate::transport::PartStream;

/// Called with the byte count of every read. Return `false` to cancel.
pub type ProgressCallback = Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// Bytes handed to the transport per read.
pub const READ_SIZE: usize = 64 * 1024;

/// Everything a part body needs besides its bytes.
#[derive(Clone)]
pub struct PartLayers {
    pub progress: Option<ProgressCallback>,
    pub limiter: Option<Arc<TokenBucket>>,
    pub cancel: CancellationToken,
    pub cancelled: Arc<AtomicBool>,
}

impl PartLayers {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            progress: None,
            limiter: None,
            cancel,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn mark_cancelled(&self, why: &str) -> io::Error {
        self.cancelled.store(true, Ordering::Release);
        debug!("Part stream cancelled: {}", why);
        io::Error::new(io::ErrorKind::Interrupted, why.to_string())
    }
}

struct ReadState {
    data: Bytes,
    offset: usize,
    read_size: usize,
    layers: PartLayers,
    done: bool,
}

/// Wrap `data` in a stream that reports progress and obeys the limiter.
pub fn part_stream(data: Bytes, layers: PartLayers) -> PartStream {
    part_stream_with_read_size(data, layers, READ_SIZE)
}

pub(crate) fn part_stream_with_read_size(data: Bytes, layers: PartLayers, read_size: usize) -> PartStream {
    let state = ReadState {
        data,
        offset: 0,
        read_size: read_size.max(1),
        layers,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        if st.done || st.offset >= st.data.len() {
            return None;
        }
        let end = (st.offset + st.read_size).min(st.data.len());
        let chunk = st.data.slice(st.offset..end);
        let n = chunk.len() as u64;

        if let Some(ref progress) = st.layers.progress {
            if !progress(n) {
                st.done = true;
                let err = st.layers.mark_cancelled("upload cancelled by progress callback");
                return Some((Err(err), st));
            }
        }
        if let Some(ref limiter) = st.layers.limiter {
            if limiter.acquire(n, &st.layers.cancel).await.is_err() {
                st.done = true;
                let err = st.layers.mark_cancelled("upload cancelled while rate limited");
                return Some((Err(err), st));
            }
        }

        st.offset = end;
        Some((Ok(chunk), st))
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
