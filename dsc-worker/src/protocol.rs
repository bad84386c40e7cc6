//! Line protocol spoken with the launching process.
//!
//! Every message, in both directions, is framed as
//! `<KEY> <BYTE_LENGTH> <JSON_PAYLOAD>\n`. The worker sends one request and
//! reads exactly one reply before sending the next.

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use common::{Error, Result};

use crate::task::{decode_inputs, Input, Output, Task};

pub const PROTOCOL_VERSION: &str = "1.1";

/// Upper bound on an inbound payload, to fail fast on a corrupt length.
const MAX_PAYLOAD: usize = 1 << 30;

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::decode(format!("`{}` payload: {e}", self.key)))
    }
}

/// Request/reply channel to the launcher.
pub struct Channel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Channel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Frame and flush one message.
    pub async fn send<T: Serialize + ?Sized>(&mut self, key: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        trace!("-> {key} {}", body.len());

        let mut frame = Vec::with_capacity(key.len() + body.len() + 16);
        frame.extend_from_slice(key.as_bytes());
        frame.push(b' ');
        frame.extend_from_slice(body.len().to_string().as_bytes());
        frame.push(b' ');
        frame.extend_from_slice(&body);
        frame.push(b'\n');

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read one framed message.
    pub async fn recv(&mut self) -> Result<Message> {
        let key = self.read_field("key").await?;
        let len = self.read_field("length").await?;
        let len: usize = len
            .parse()
            .map_err(|_| Error::protocol(format!("bad payload length `{len}` for `{key}`")))?;
        if len > MAX_PAYLOAD {
            return Err(Error::protocol(format!("payload of {len} bytes for `{key}` is too large")));
        }

        let mut payload = vec![0; len];
        self.reader.read_exact(&mut payload).await.map_err(eof_as_protocol)?;

        let mut newline = [0u8; 1];
        self.reader.read_exact(&mut newline).await.map_err(eof_as_protocol)?;
        if newline[0] != b'\n' {
            return Err(Error::protocol(format!("`{key}` message is not newline terminated")));
        }

        trace!("<- {key} {len}");
        Ok(Message { key, payload })
    }

    /// Send a message and read its reply.
    pub async fn request<T: Serialize + ?Sized>(&mut self, key: &str, payload: &T) -> Result<Message> {
        self.send(key, payload).await?;
        self.recv().await
    }

    async fn read_field(&mut self, what: &str) -> Result<String> {
        let mut field = Vec::new();
        let n = self.reader.read_until(b' ', &mut field).await?;
        if n == 0 || field.pop() != Some(b' ') {
            return Err(Error::protocol(format!("connection closed while reading message {what}")));
        }

        String::from_utf8(field).map_err(|_| Error::protocol(format!("message {what} is not UTF-8")))
    }

    /// Announce ourselves. The launcher must answer `"ok"`.
    pub async fn handshake(&mut self) -> Result<()> {
        let reply = self
            .request("WORKER", &json!({ "pid": std::process::id(), "version": PROTOCOL_VERSION }))
            .await?;
        let answer: serde_json::Value = reply.decode()?;
        if answer != "ok" {
            return Err(Error::protocol(format!("handshake rejected: {} {answer}", reply.key)));
        }

        debug!("handshake done");
        Ok(())
    }

    pub async fn task(&mut self) -> Result<Task> {
        self.request("TASK", "").await?.decode()
    }

    pub async fn inputs(&mut self) -> Result<Vec<Input>> {
        let reply = self.request("INPUT", "").await?;
        decode_inputs(&reply.payload)
    }

    pub async fn output(&mut self, output: &Output) -> Result<()> {
        debug!("reporting output {} ({} bytes) for label {}", output.location, output.size, output.label);
        self.request("OUTPUT", &output.message()).await?;
        Ok(())
    }

    pub async fn done(&mut self) -> Result<()> {
        self.request("DONE", "").await?;
        Ok(())
    }

    /// Report a fatal error. No reply is expected and send failures are
    /// only logged.
    pub async fn fatal(&mut self, message: &str) {
        if let Err(e) = self.send("FATAL", message).await {
            warn!("could not report fatal error to launcher: {e}");
        }
    }
}

fn eof_as_protocol(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::protocol("connection closed inside a message")
    } else {
        Error::Io(e)
    }
}
