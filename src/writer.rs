use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::Error;
use crate::session::Shared;
use crate::transport::{Connection as _, Connector, FrameKind};

/// One caller write, queued for the serializer.
///
/// The reply sender is the caller's private outcome channel; dropping it
/// without sending (writer teardown) surfaces as `NotConnected` on the
/// caller's side.
pub(crate) struct PendingWrite {
    pub(crate) kind: FrameKind,
    pub(crate) payload: Vec<u8>,
    pub(crate) reply: oneshot::Sender<Result<()>>,
}

/// Single-writer loop: turns concurrent caller writes into one strictly
/// ordered stream of frame writes.
///
/// Exactly one request is in flight at any instant. The underlying protocol
/// does not tolerate interleaved concurrent writers, so every data frame in
/// the process goes through here, recovery-command replay included. A write
/// failure raises a drop signal and is still relayed to the caller that
/// issued it; the two side effects are independent.
pub(crate) async fn write_loop<C: Connector>(
    shared: Arc<Shared<C>>,
    mut requests: mpsc::UnboundedReceiver<PendingWrite>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            () = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        // clone the handle out of the slot; the lock is never held across the write
        let Some(conn) = shared.current_conn() else {
            _ = request.reply.send(Err(Error::not_connected()));
            continue;
        };

        let result = conn.write_frame(request.kind, request.payload).await;
        if let Err(error) = &result {
            #[cfg(feature = "tracing")]
            tracing::warn!(%error, "frame write failed, dropping connection");
            #[cfg(not(feature = "tracing"))]
            let _ = &error;

            shared.drop_connection();
        }

        _ = request.reply.send(result);
    }
}
