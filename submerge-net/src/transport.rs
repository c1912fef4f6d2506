use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{NodeID, PeerConfig, WireMsg};

/// Artificial delay every outbound send waits out before it is actually
/// written to the wire. This is not incidental latency — it is what makes
/// concurrent-proposer races reproducible under manual testing, so it is
/// preserved verbatim rather than "optimized away."
pub const NET_DELAY: Duration = Duration::from_secs(3);

/// `Transport` delivers [`WireMsg`]s to peers addressed by [`NodeID`]. Every
/// send opens a fresh short-lived TCP connection: connect, write the
/// JSON-encoded message, shut down the write half, and let the peer close
/// it. There is no retry and no ordering guarantee across different
/// destinations.
pub struct Transport {
    self_id: NodeID,
    peers: PeerConfig,
    failed: Arc<AtomicBool>,
}

impl Transport {
    /// `inbound` is the single mailbox every decoded message is forwarded
    /// into; `failed` is shared with the Node Controller so sends and
    /// listener threads can both observe `fail`/`recover` without any
    /// additional locking.
    pub fn new(
        self_id: NodeID,
        peers: PeerConfig,
        failed: Arc<AtomicBool>,
        inbound: Sender<(NodeID, WireMsg)>,
    ) -> std::io::Result<Transport> {
        let bind_addr = peers
            .addr_of(self_id)
            .expect("self_id must be present in its own peer config");
        let listener = TcpListener::bind(bind_addr)?;
        let transport = Transport {
            self_id,
            peers,
            failed,
        };
        transport.spawn_listener(listener, inbound);
        Ok(transport)
    }

    fn spawn_listener(&self, listener: TcpListener, inbound: Sender<(NodeID, WireMsg)>) {
        let failed = Arc::clone(&self.failed);
        std::thread::spawn(move || {
            for conn in listener.incoming() {
                let Ok(stream) = conn else { continue };
                let inbound = inbound.clone();
                let failed = Arc::clone(&failed);
                std::thread::spawn(move || read_one_message(stream, failed, inbound));
            }
        });
    }

    /// Non-blocking: schedules delivery on a detached thread after
    /// [`NET_DELAY`]. Drops silently if this node is failed (checked both
    /// before the delay and again right before connecting, so a `fail`
    /// issued mid-delay still takes effect), or if the peer is unreachable.
    pub fn send(&self, target: NodeID, msg: WireMsg) {
        let Some(addr) = self.peers.addr_of(target) else {
            warn!(node = self.self_id.0, target = target.0, "send to unknown peer, dropping");
            return;
        };
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        let failed = Arc::clone(&self.failed);
        std::thread::spawn(move || {
            std::thread::sleep(NET_DELAY);
            if failed.load(Ordering::SeqCst) {
                return;
            }
            let Ok(bytes) = serde_json::to_vec(&msg) else {
                return;
            };
            match TcpStream::connect(addr) {
                Ok(mut stream) => {
                    if failed.load(Ordering::SeqCst) {
                        return;
                    }
                    if stream.write_all(&bytes).is_ok() {
                        let _ = stream.shutdown(std::net::Shutdown::Write);
                    }
                }
                Err(e) => debug!(%addr, error = %e, "send failed, dropping"),
            }
        });
    }

    pub fn broadcast(&self, msg: WireMsg) {
        for peer in self.peers.peers_other_than(self.self_id) {
            self.send(peer, msg.clone());
        }
    }
}

fn read_one_message(mut stream: TcpStream, failed: Arc<AtomicBool>, inbound: Sender<(NodeID, WireMsg)>) {
    let mut buf = Vec::new();
    if stream.read_to_end(&mut buf).is_err() {
        return;
    }
    if failed.load(Ordering::SeqCst) {
        return;
    }
    match serde_json::from_slice::<WireMsg>(&buf) {
        Ok(msg) => {
            let _ = inbound.send((msg.from(), msg));
        }
        Err(e) => debug!(error = %e, "dropping malformed inbound message"),
    }
}
