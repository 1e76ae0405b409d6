//! Helpers shared by the SOCKS codecs.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::AsyncRead;

/// Remembers every byte read through it.
///
/// The `socksv5` parsers describe a bad field only in prose. They read
/// byte-exact, so the last byte seen is the one that was refused.
pub(crate) struct Tap<R> {
    inner: R,
    seen: Vec<u8>,
}

impl<R> Tap<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            seen: Vec::new(),
        }
    }

    pub fn seen(&self) -> &[u8] {
        &self.seen
    }

    pub fn last(&self) -> Option<u8> {
        self.seen.last().copied()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Tap<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(read)) = poll {
            this.seen.extend_from_slice(&buf[..read]);
        }
        poll
    }
}
