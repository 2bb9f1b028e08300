//! Backend task loops.
//!
//! The backend is plain synchronous state; these loops feed it from a
//! channel and hand every response to `route`, which returns false when the
//! addressed worker is gone.

use idbx::tracing::prefix;
use idbx_proto::{codec, ClientMessage, HostMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::MemoryBackend;

/// Serve typed requests until the channel closes. Returns the backend so
/// callers can inspect what is left in it.
pub async fn serve<R>(
    mut backend: MemoryBackend,
    mut requests: mpsc::UnboundedReceiver<HostMessage>,
    route: R,
) -> MemoryBackend
where
    R: Fn(ClientMessage) -> bool,
{
    info!("{} memory backend serving", prefix::OPEN);
    while let Some(message) = requests.recv().await {
        deliver(&mut backend, message, &route);
    }
    info!("{} memory backend stopped", prefix::CLOSE);
    backend
}

/// Serve encoded frames. Frames that fail to decode are logged and skipped.
pub async fn serve_frames<R>(
    mut backend: MemoryBackend,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    route: R,
) -> MemoryBackend
where
    R: Fn(ClientMessage) -> bool,
{
    while let Some(frame) = frames.recv().await {
        match codec::decode_host(&frame) {
            Ok(message) => deliver(&mut backend, message, &route),
            Err(e) => warn!("{} dropping undecodable frame: {}", prefix::STORE, e),
        }
    }
    backend
}

fn deliver<R>(backend: &mut MemoryBackend, message: HostMessage, route: &R)
where
    R: Fn(ClientMessage) -> bool,
{
    for response in backend.handle(message) {
        let worker = response.worker;
        if !route(response) {
            debug!("{} {} is gone, response dropped", prefix::STORE, worker);
        }
    }
}
