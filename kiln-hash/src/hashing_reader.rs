//! An async reader adapter that computes a SHA-1 digest on the fly.
//!
//! Every byte read through this wrapper is fed into a [`sha1::Sha1`] context
//! so the full file never needs to be buffered in memory to be hashed.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use sha1::{Digest as _, Sha1};
use tokio::io::AsyncRead;

use crate::Digest;

/// Shared accumulator for the incremental hash.
pub struct HashState {
    ctx: Sha1,
    pub bytes_read: u64,
}

impl HashState {
    fn new() -> Self {
        Self {
            ctx: Sha1::new(),
            bytes_read: 0,
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.ctx.update(data);
        self.bytes_read += data.len() as u64;
    }

    /// Consume the state and return the final digest.
    pub fn finish(self) -> Digest {
        Digest::from_bytes(self.ctx.finalize().into())
    }
}

pin_project! {
    /// Wraps an [`AsyncRead`] and incrementally hashes every byte that passes
    /// through. Use the [`Arc<Mutex<HashState>>`] returned by
    /// [`new`](Self::new) to retrieve the digest once the stream is drained.
    pub struct HashingReader<R> {
        #[pin]
        inner: R,
        state: Arc<Mutex<HashState>>,
    }
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> (Self, Arc<Mutex<HashState>>) {
        let state = Arc::new(Mutex::new(HashState::new()));
        let reader = Self {
            inner,
            state: Arc::clone(&state),
        };
        (reader, state)
    }
}

impl<R: AsyncRead> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let result = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let new_bytes = &buf.filled()[before..];
            if !new_bytes.is_empty() {
                this.state.lock().unwrap().update(new_bytes);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt as _;

    #[tokio::test]
    async fn hashes_while_streaming() {
        let data = b"the quick brown fox".to_vec();
        let (mut reader, state) = HashingReader::new(&data[..]);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await.unwrap();
        assert_eq!(sink, data);

        let digest = Arc::try_unwrap(state).unwrap().into_inner().unwrap().finish();
        assert_eq!(digest, crate::sha1_bytes(&data));
    }
}
