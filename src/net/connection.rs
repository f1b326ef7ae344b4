//! A buffered, newline-delimited connection. Plays the role of the teacher's `Connection`
//! (which framed RESP messages); this port frames plain lines instead.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::Error;

/// Wraps a `TcpStream` with a read buffer, reading and writing one line at a time.
pub struct Connection {
    stream: BufReader<TcpStream>,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Self {
        Self {
            stream: BufReader::new(socket),
        }
    }

    /// Reads a single line, with its trailing newline stripped. Returns `Ok(None)` on a clean
    /// EOF (the client closed the connection between commands).
    pub async fn read_line(&mut self) -> Result<Option<String>, Error> {
        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Writes a single line, appending the trailing newline.
    pub async fn write_line(&mut self, line: &str) -> Result<(), Error> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        Ok(())
    }
}
