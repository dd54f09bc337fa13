use anyhow::Result;
use smol::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use std::net::Shutdown;

/// Thin adapter over one TCP socket's read/write halves.
///
/// Cloning a `smol::net::TcpStream` shares the same underlying file
/// descriptor rather than opening a new connection, so a read-side clone
/// and a write-side clone can be driven concurrently without interfering
/// with each other.
#[derive(Clone, Debug)]
pub struct Endpoint {
    stream: TcpStream,
}

impl Endpoint {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Reads up to `buf.len()` bytes. `Ok(0)` signals EOF.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut half = self.stream.clone();
        Ok(half.read(buf).await?)
    }

    /// Writes all of `data`, flushing before returning.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut half = self.stream.clone();
        half.write_all(data).await?;
        half.flush().await?;
        Ok(())
    }

    /// Half-closes the write side only. Clones of this `Endpoint` share
    /// one fd, so a full shutdown here would also break a sibling
    /// clone's in-flight read; this just signals EOF to the peer and
    /// leaves whoever is still reading free to drain whatever is left
    /// before it observes its own EOF.
    pub fn close_write(&self) {
        let _ = self.stream.shutdown(Shutdown::Write);
    }

    /// Idempotent full close: safe to call from either direction,
    /// regardless of whether the peer has already half-closed.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
