// Jackson Coxson

//! One direction of a session: copy until the source ends, then let go of
//! both ends.
//!
//! The two directions of a session never talk to each other directly. They
//! share a [`Teardown`] flag instead: whichever direction finishes first
//! raises it, and the other one stops waiting on its source as soon as it
//! notices. Each direction owns the read half of one socket and the write half
//! of the other, so every half is dropped exactly once, and a socket is fully
//! closed once both directions are gone.

use std::{io, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::watch,
};

use crate::events::{Event, EventSink};

/// Shared end-of-session flag for the two directions of a session.
#[derive(Debug, Clone)]
pub struct Teardown {
    tx: Arc<watch::Sender<bool>>,
}

impl Teardown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`Teardown::trigger`] has been called, including calls
    /// made before this was polled.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for Teardown {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies `source` into `dest` until `source` reaches end-of-stream, either
/// side fails, or the paired direction tears the session down.
///
/// On every exit path the teardown is raised, `dest` is shut down so its peer
/// sees end-of-stream, both ends are dropped, and a single
/// [`Event::Closed`] is emitted. Returns the number of bytes copied.
pub async fn relay<R, W>(
    mut source: R,
    mut dest: W,
    description: &str,
    teardown: &Teardown,
    events: &dyn EventSink,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;
    let result = {
        let copy = copy_counting(&mut source, &mut dest, &mut bytes);
        tokio::select! {
            biased;
            _ = teardown.triggered() => Ok(()),
            res = copy => res,
        }
    };

    teardown.trigger();
    // The peer may already be gone; a failed FIN changes nothing.
    let _ = dest.shutdown().await;
    drop(dest);
    drop(source);

    events.emit(Event::Closed {
        description: description.to_string(),
        bytes,
        cause: result.as_ref().err().map(|e| e.to_string()),
    });
    result.map(|()| bytes)
}

/// `tokio::io::copy` loses its count when interrupted, so keep a running total.
async fn copy_counting<R, W>(source: &mut R, dest: &mut W, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        dest.write_all(&buf[..n]).await?;
        *total += n as u64;
    }
}

/// Same as the buffer `tokio::io::copy` uses.
const COPY_BUFFER_SIZE: usize = 8 * 1024;
