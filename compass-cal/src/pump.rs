//! Decoding task between the link's raw bytes and the orchestrator

use pni_compass::{CompassEvent, FrameDecoder};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// Decode raw inbound chunks into events until either side of the pump closes.
///
/// Malformed frames are logged by the decoder and dropped; the orchestrator
/// only ever sees complete events, in arrival order.
pub fn spawn_event_pump(
    mut bytes_rx: UnboundedReceiver<Vec<u8>>,
    events_tx: UnboundedSender<CompassEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = bytes_rx.recv().await {
            for event in decoder.decode(&chunk) {
                if events_tx.send(event).is_err() {
                    debug!("Event receiver dropped, stopping event pump");
                    return;
                }
            }
        }
        debug!(
            "Inbound byte stream closed ({} bytes skipped)",
            decoder.skipped_bytes()
        );
    })
}
