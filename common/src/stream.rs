//! Byte sources and their sequential concatenation.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

use crate::{Error, Result};

/// A readable byte stream. Dropping it closes the underlying handle.
pub type Source = Box<dyn AsyncRead + Send + Unpin>;

/// Logical concatenation of several sources, read in order.
///
/// A source is closed as soon as it reports end of stream. A read error
/// from the active source is returned as is and the reader stays on that
/// source. Sources not yet drained are closed, in order, by
/// [`MultiReader::close`] or on drop.
pub struct MultiReader {
    sources: VecDeque<Source>,
}

impl MultiReader {
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }

    /// Number of sources not yet drained.
    pub fn remaining(&self) -> usize {
        self.sources.len()
    }

    /// Close every remaining source. Later reads report end of stream.
    pub fn close(&mut self) {
        if !self.sources.is_empty() {
            trace!("closing {} unread sources", self.sources.len());
        }
        while let Some(source) = self.sources.pop_front() {
            drop(source);
        }
    }
}

impl AsyncRead for MultiReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        while let Some(source) = this.sources.front_mut() {
            let filled = buf.filled().len();
            ready!(Pin::new(source).poll_read(cx, buf))?;
            if buf.filled().len() > filled {
                return Poll::Ready(Ok(()));
            }

            // Nothing read into a non-empty buffer: this source is done.
            this.sources.pop_front();
        }

        Poll::Ready(Ok(()))
    }
}

impl Drop for MultiReader {
    fn drop(&mut self) {
        self.close();
    }
}

/////////////////////////////////////////////////////////////////////////////
// URI helpers
/////////////////////////////////////////////////////////////////////////////

/// Split `url` at the first `://`. URLs without a scheme get an empty one.
pub fn scheme_split(url: &str) -> (&str, &str) {
    match url.find("://") {
        Some(index) => (&url[..index], &url[index + 3..]),
        None => ("", url),
    }
}

/// Split `url` into scheme, location (host part) and path, without the
/// leading slash of the path.
pub fn loc_str(url: &str) -> (&str, &str, &str) {
    let (scheme, rest) = scheme_split(url);
    match rest.find('/') {
        Some(index) => (scheme, &rest[..index], &rest[index + 1..]),
        None => (scheme, rest, ""),
    }
}

/// Open a streaming HTTP GET of `url`.
pub async fn http_source(client: &reqwest::Client, url: &str) -> Result<Source> {
    debug!("opening {url}");
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(Error::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let body = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
    Ok(Box::new(StreamReader::new(Box::pin(body))))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use tokio::io::AsyncReadExt;

    use super::*;

    /// Records its id into a shared log when closed.
    struct Tracked {
        id: usize,
        inner: Cursor<&'static [u8]>,
        closed: Arc<Mutex<Vec<usize>>>,
    }

    impl AsyncRead for Tracked {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.closed.lock().unwrap().push(self.id);
        }
    }

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "replica went away")))
        }
    }

    fn tracked(contents: &[&'static str]) -> (MultiReader, Arc<Mutex<Vec<usize>>>) {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let sources = contents.iter().enumerate().map(|(id, body)| {
            Box::new(Tracked {
                id,
                inner: Cursor::new(body.as_bytes()),
                closed: closed.clone(),
            }) as Source
        });
        (MultiReader::new(sources.collect::<Vec<_>>()), closed)
    }

    #[tokio::test]
    async fn concatenates_in_order() {
        let (mut reader, closed) = tracked(&["ab", "", "cd"]);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();

        assert_eq!(out, "abcd");
        assert_eq!(reader.remaining(), 0);
        assert_eq!(*closed.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn early_close_closes_the_rest_in_order() {
        let (mut reader, closed) = tracked(&["ab", "", "cd"]);

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ab");
        assert!(closed.lock().unwrap().is_empty());

        reader.close();
        assert_eq!(*closed.lock().unwrap(), vec![0, 1, 2]);

        // Closing twice, and dropping afterwards, is harmless.
        reader.close();
        drop(reader);
        assert_eq!(closed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn error_surfaces_before_later_sources() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let first = Tracked {
            id: 0,
            inner: Cursor::new(&b"ab"[..]),
            closed: closed.clone(),
        };
        let third = Tracked {
            id: 2,
            inner: Cursor::new(&b"cd"[..]),
            closed: closed.clone(),
        };
        let mut reader = MultiReader::new(vec![
            Box::new(first) as Source,
            Box::new(Broken),
            Box::new(third),
        ]);

        let mut seen = Vec::new();
        let mut buf = [0u8; 8];
        let err = loop {
            match reader.read(&mut buf).await {
                Ok(0) => panic!("reached end of stream"),
                Ok(n) => seen.extend_from_slice(&buf[..n]),
                Err(e) => break e,
            }
        };

        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(seen, b"ab");
        assert_eq!(reader.remaining(), 2);

        // The failing source is retried, not skipped.
        assert!(reader.read(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn empty_reader_is_at_end() {
        let mut reader = MultiReader::new(Vec::new());
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).await.unwrap(), 0);
    }

    #[test]
    fn splits_scheme() {
        assert_eq!(scheme_split("http://host/path"), ("http", "host/path"));
        assert_eq!(scheme_split("noscheme"), ("", "noscheme"));
        assert_eq!(scheme_split("disco://h/disco/a://b"), ("disco", "h/disco/a://b"));
    }

    #[test]
    fn splits_location() {
        assert_eq!(
            loc_str("disco://node1/disco/node1/ab/job/map_out_0_1"),
            ("disco", "node1", "disco/node1/ab/job/map_out_0_1")
        );
        assert_eq!(loc_str("http://node1"), ("http", "node1", ""));
    }
}
