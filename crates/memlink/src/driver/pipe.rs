//! Named pipe side channel for shared memory writes.
//!
//! Each write is one JSON object on its own line. The integration owns the
//! listening end; we connect, send and drop the connection.
//!
//! On Unix the pipe is a Unix domain socket. A relative name is placed in
//! the temp directory, an absolute path is used as given. On Windows the
//! name maps to `\\.\pipe\<name>`.

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Write request understood by the integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    /// Target domain id
    pub identifier: String,
    /// Bytes to write
    pub data: Vec<u8>,
    /// Always `data.len()`
    pub data_length: usize,
    /// Offset of the first byte inside the domain
    pub relative_address_start: u32,
}

impl WriteRequest {
    /// Build a request for `data` at `relative_address_start` in `identifier`.
    pub fn new(identifier: &str, relative_address_start: u32, data: &[u8]) -> Self {
        Self {
            identifier: identifier.to_string(),
            data: data.to_vec(),
            data_length: data.len(),
            relative_address_start,
        }
    }

    /// Newline-terminated JSON encoding
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[cfg(unix)]
type PipeStream = tokio::net::UnixStream;
#[cfg(windows)]
type PipeStream = tokio::net::windows::named_pipe::NamedPipeClient;

/// Connected client end of the side channel.
pub(crate) struct PipeWriter {
    stream: PipeStream,
}

impl PipeWriter {
    /// Connect within `timeout`.
    ///
    /// Fails with [`DriverError::ConnectionUnavailable`] when nobody is
    /// listening, which means the integration tool is not running.
    pub(crate) async fn connect(pipe_name: &str, timeout: Duration) -> Result<Self> {
        let unavailable =
            |reason: String| DriverError::ConnectionUnavailable(format!("pipe {pipe_name}: {reason}"));

        let stream = tokio::time::timeout(timeout, open(pipe_name))
            .await
            .map_err(|_| unavailable(format!("no answer within {}ms", timeout.as_millis())))?
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Self { stream })
    }

    /// Send one line and close the connection.
    pub(crate) async fn send(mut self, line: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(line).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await
    }
}

#[cfg(unix)]
async fn open(pipe_name: &str) -> std::io::Result<PipeStream> {
    tokio::net::UnixStream::connect(pipe_path(pipe_name)).await
}

#[cfg(windows)]
async fn open(pipe_name: &str) -> std::io::Result<PipeStream> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(pipe_path(pipe_name))
}

/// Filesystem location of the pipe
#[cfg(unix)]
pub(crate) fn pipe_path(pipe_name: &str) -> std::path::PathBuf {
    let path = std::path::Path::new(pipe_name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::temp_dir().join(pipe_name)
    }
}

/// Pipe namespace path
#[cfg(windows)]
pub(crate) fn pipe_path(pipe_name: &str) -> String {
    format!(r"\\.\pipe\{pipe_name}")
}
