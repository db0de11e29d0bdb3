// src/enrich/body.rs
use futures::StreamExt;
use std::io::{self, Read};
use tokio::{runtime::Handle, time::Instant};

use crate::fetch::BodyStream;

/// Blocking `Read` over an async body stream. Must be used from a blocking
/// thread (`spawn_blocking`), never from inside the runtime.
///
/// With a deadline, a read still waiting on the stream when it passes fails
/// with `TimedOut`, so a stalled body cannot pin the blocking thread.
pub struct BlockingBody {
    stream: BodyStream,
    handle: Handle,
    deadline: Option<Instant>,
    chunk: Vec<u8>,
    pos: usize,
}

impl BlockingBody {
    pub fn new(stream: BodyStream, handle: Handle) -> Self {
        Self {
            stream,
            handle,
            deadline: None,
            chunk: Vec::new(),
            pos: 0,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let next = match self.deadline {
            Some(at) => self
                .handle
                .block_on(tokio::time::timeout_at(at, self.stream.next()))
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "body read deadline passed"))?,
            None => self.handle.block_on(self.stream.next()),
        };
        next.transpose()
    }
}

impl Read for BlockingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.chunk.len() {
            match self.next_chunk()? {
                Some(next) => {
                    self.chunk = next;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_across_chunks_and_skips_empty_ones() {
        let parts: Vec<io::Result<Vec<u8>>> = vec![
            Ok(b"CUI;DEN".to_vec()),
            Ok(Vec::new()),
            Ok(b"UMIRE\n1;A\n".to_vec()),
        ];
        let body = BlockingBody::new(stream::iter(parts).boxed(), Handle::current());

        let text = tokio::task::spawn_blocking(move || {
            let mut body = body;
            let mut out = String::new();
            body.read_to_string(&mut out).map(|_| out)
        })
        .await
        .expect("blocking task")
        .expect("read ok");
        assert_eq!(text, "CUI;DENUMIRE\n1;A\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stream_errors_surface_as_io_errors() {
        let parts: Vec<io::Result<Vec<u8>>> = vec![
            Ok(b"CUI".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let body = BlockingBody::new(stream::iter(parts).boxed(), Handle::current());

        let err = tokio::task::spawn_blocking(move || {
            let mut body = body;
            let mut out = Vec::new();
            body.read_to_end(&mut out)
        })
        .await
        .expect("blocking task")
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stalled_stream_fails_at_the_deadline() {
        let parts: Vec<io::Result<Vec<u8>>> = vec![Ok(b"CUI;DENUMIRE\n".to_vec())];
        let stalled = stream::iter(parts).chain(stream::pending()).boxed();
        let deadline = Instant::now() + std::time::Duration::from_millis(30);
        let body = BlockingBody::new(stalled, Handle::current()).with_deadline(Some(deadline));

        let err = tokio::task::spawn_blocking(move || {
            let mut body = body;
            let mut out = Vec::new();
            body.read_to_end(&mut out)
        })
        .await
        .expect("blocking task")
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
