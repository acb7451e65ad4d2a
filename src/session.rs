//! Control-plane message channel
//!
//! Carries [`SessionMessage`]s as newline-delimited JSON over any async byte
//! stream. Used by the server's control handler and by test clients.

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

use crate::protocol::SessionMessage;

/// Maximum control message line length to prevent memory DoS
const MAX_LINE_LENGTH: usize = 8192;

pub struct SessionChannel<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    line: Vec<u8>,
}

impl<S> SessionChannel<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            line: Vec::new(),
        }
    }

    /// Send one message
    pub async fn send(&mut self, msg: &SessionMessage) -> anyhow::Result<()> {
        self.writer
            .write_all(format!("{}\n", msg.serialize()?).as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive one message. EOF is reported as an error.
    pub async fn recv(&mut self) -> anyhow::Result<SessionMessage> {
        let n = read_bounded_line(&mut self.reader, &mut self.line).await?;
        if n == 0 {
            return Err(anyhow::anyhow!("Control connection closed"));
        }
        SessionMessage::deserialize(std::str::from_utf8(&self.line)?.trim())
    }

    /// Block until the peer sends anything or goes away.
    ///
    /// Any outcome, including EOF and read errors, means the session is over.
    pub async fn wait_for_close(&mut self) {
        let mut b = [0u8; 1];
        let _ = self.reader.read(&mut b).await;
    }

    /// Close the write side so the peer observes EOF
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Read a line with bounded length.
///
/// Raw bytes are collected so a UTF-8 sequence split across reads survives;
/// the caller decodes the complete line.
async fn read_bounded_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
) -> anyhow::Result<usize> {
    buf.clear();
    let mut total = 0;
    loop {
        let bytes = reader.fill_buf().await?;
        if bytes.is_empty() {
            return Ok(total);
        }

        if let Some(newline_pos) = bytes.iter().position(|&b| b == b'\n') {
            let to_read = newline_pos + 1;
            if total + to_read > MAX_LINE_LENGTH {
                return Err(anyhow::anyhow!("Line exceeds maximum length"));
            }
            buf.extend_from_slice(&bytes[..to_read]);
            reader.consume(to_read);
            return Ok(total + to_read);
        }

        let len = bytes.len();
        if total + len > MAX_LINE_LENGTH {
            return Err(anyhow::anyhow!("Line exceeds maximum length"));
        }
        buf.extend_from_slice(bytes);
        reader.consume(len);
        total += len;
    }
}
