use std::net::SocketAddr;
use std::sync::Arc;

use bitcoin::network::constants::Magic;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Error;
use crate::peer::{run_connection, PeerEventHandler, PeerHandle};

/// Binds `addr` and accepts connections until `shutdown` fires, handing each
/// accepted socket to `on_accept` once its connection task is running.
///
/// Plain tokio accept loop, one task per connection, rather than a shared
/// poll-driven reactor: simpler to reason about at this node's connection
/// counts and matches a cached network I/O thread pool more directly than a
/// single-threaded reactor would.
pub async fn listen<F>(
    addr: SocketAddr,
    magic: Magic,
    handler: Arc<dyn PeerEventHandler>,
    shutdown: CancellationToken,
    mut on_accept: F,
) -> Result<(), Error>
where
    F: FnMut(PeerHandle) + Send,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(%addr, "listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%addr, %err, "accept failed");
                        continue;
                    }
                };

                let handle = spawn_inbound(stream, peer_addr, magic, handler.clone()).await;
                on_accept(handle);
            }
        }
    }
}

/// Connects out to `addr` and returns once the connection task is running.
/// Used by both the relay node's best-effort outbound peers and by the
/// trusted-peer outbound half (C5), which layers its own reconnect policy on
/// top of this.
pub async fn connect(
    addr: SocketAddr,
    magic: Magic,
    handler: Arc<dyn PeerEventHandler>,
) -> Result<PeerHandle, Error> {
    let stream = TcpStream::connect(addr).await?;
    Ok(run_connection(stream, addr, true, magic, handler).await)
}

async fn spawn_inbound(
    stream: TcpStream,
    addr: SocketAddr,
    magic: Magic,
    handler: Arc<dyn PeerEventHandler>,
) -> PeerHandle {
    run_connection(stream, addr, false, magic, handler).await
}
