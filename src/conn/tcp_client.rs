use crate::{FepError, FepResult};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

// Opens one channel of the dual link. The stream is split by the caller:
// the send handler keeps the write half and drains the (protocol-silent)
// read half, the receive handler keeps the read half.
pub(crate) async fn connect(addr: &str, timeout: Duration) -> FepResult<TcpStream> {
    let start = Instant::now();
    trace!("connecting to {addr}");
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_elapsed| {
            FepError::ConnectionDown(format!("connect to {addr} timed out after {timeout:?}"))
        })??;
    stream.set_nodelay(true)?;
    trace!(
        "connected to {addr} ({} µs)",
        Instant::now().duration_since(start).as_micros()
    );
    Ok(stream)
}
