//! Debug protocol wire framing
//!
//! Messages travel as HTTP-style headers followed by a JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;

use serde_json::Value;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};

use crate::common::{Error, Result};

/// Refuse bodies past this size; no sane message comes close
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Framed reader/writer pair over a debugger's stdio (or any byte streams)
pub struct DapTransport<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
}

impl<R, W> DapTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    /// Read the next framed message
    pub async fn recv(&mut self) -> Result<Value> {
        let mut content_length: Option<usize> = None;

        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await.map_err(eof_is_crash)?;
            if read == 0 {
                return Err(Error::DebuggerCrashed);
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            if let Some(value) = line.trim().strip_prefix("Content-Length:") {
                let parsed = value.trim().parse().map_err(|_| {
                    Error::DapProtocol(format!("Invalid Content-Length: {}", value.trim()))
                })?;
                content_length = Some(parsed);
            }
            // Other headers (Content-Type...) are ignored
        }

        let length = content_length
            .ok_or_else(|| Error::DapProtocol("Missing Content-Length header".to_string()))?;
        if length > MAX_BODY_BYTES {
            return Err(Error::DapProtocol(format!(
                "Content-Length too large: {length} bytes"
            )));
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(eof_is_crash)?;

        serde_json::from_slice(&body)
            .map_err(|e| Error::DapProtocol(format!("Invalid JSON body: {e}")))
    }

    /// Frame and write one message
    pub async fn send(&mut self, message: &Value) -> Result<()> {
        let body = serde_json::to_string(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(body.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

fn eof_is_crash(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::DebuggerCrashed
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trip_through_framing() {
        let mut written = Vec::new();
        {
            let mut transport = DapTransport::new(Cursor::new(Vec::new()), &mut written);
            transport.send(&json!({"seq": 1, "type": "request"})).await.unwrap();
        }

        let mut transport = DapTransport::new(Cursor::new(written), Vec::new());
        let message = transport.recv().await.unwrap();
        assert_eq!(message["seq"], 1);
        assert_eq!(message["type"], "request");
    }

    #[tokio::test]
    async fn extra_headers_are_ignored() {
        let data =
            b"Content-Length: 13\r\nContent-Type: application/json\r\n\r\n{\"test\":true}".to_vec();
        let mut transport = DapTransport::new(Cursor::new(data), Vec::new());
        let message = transport.recv().await.unwrap();
        assert_eq!(message["test"], true);
    }

    #[tokio::test]
    async fn closed_stream_reports_crash() {
        let mut transport = DapTransport::new(Cursor::new(Vec::new()), Vec::new());
        assert!(matches!(
            transport.recv().await,
            Err(Error::DebuggerCrashed)
        ));
    }

    #[tokio::test]
    async fn missing_content_length_is_a_protocol_error() {
        let data = b"Content-Type: application/json\r\n\r\n{}".to_vec();
        let mut transport = DapTransport::new(Cursor::new(data), Vec::new());
        assert!(matches!(transport.recv().await, Err(Error::DapProtocol(_))));
    }
}
