use bytes::Bytes;
use tokio::{net::UdpSocket, sync::mpsc};
use tracing::{debug, error, trace};

/// Receives datagrams on `socket` and forwards each one as a payload.
///
/// Returns once the receiving end of `payloads` is dropped. Receive errors are logged and the loop continues.
pub async fn run_listener(socket: UdpSocket, buffer_size: usize, payloads: mpsc::Sender<Bytes>) {
    let mut buf = vec![0; buffer_size];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((0, _)) => continue,
            Ok((len, peer)) => {
                trace!(len, %peer, "Received datagram.");
                if payloads.send(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                    debug!("Payload receiver dropped. Stopping listener.");
                    break;
                }
            }
            Err(e) => error!(error = %e, "Failed to receive datagram."),
        }
    }
}
