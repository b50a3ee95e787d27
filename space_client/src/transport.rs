//! Client transport.
//!
//! `send` only queues. `flush` hands the queued messages to the writer task as
//! one batch, which writes them in order. A reader task turns inbound frames
//! into [`TransportEvent`]s that the tick loop polls; nothing is applied from
//! inside the I/O tasks.
//!
//! Connection loss surfaces once as [`TransportEvent::Disconnect`]. There is no
//! reconnect.

use std::{collections::VecDeque, net::SocketAddr};

use space_shared::net::{NetMsg, ReliableConn};
use tokio::{
    sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// What the transport reports to the tick loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connect,
    Message(NetMsg),
    Disconnect { reason: String },
}

/// Ordered, buffered connection to the relay.
pub struct Transport {
    outbox: VecDeque<NetMsg>,
    writer: Option<UnboundedSender<Vec<NetMsg>>>,
    events_tx: UnboundedSender<TransportEvent>,
    events_rx: UnboundedReceiver<TransportEvent>,
    read_task: Option<JoinHandle<()>>,
    closed: bool,
    reported: bool,
}

impl Transport {
    /// Connects to the relay and starts the reader/writer tasks.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let conn = ReliableConn::connect(addr).await?;
        debug!(%addr, "transport connected");
        Ok(Self::spawn(conn))
    }

    /// Drives an established connection. Must be called inside a tokio runtime.
    pub fn spawn(conn: ReliableConn) -> Self {
        let (mut reader, mut writer) = conn.into_split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<NetMsg>>();

        let read_tx = events_tx.clone();
        let read_task = tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(msg) => {
                        if read_tx.send(TransportEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = read_tx.send(TransportEvent::Disconnect {
                            reason: format!("{e:#}"),
                        });
                        break;
                    }
                }
            }
        });

        let write_tx = events_tx.clone();
        // Ends once the sender is dropped and the last batch is written.
        tokio::spawn(async move {
            while let Some(batch) = out_rx.recv().await {
                if let Err(e) = writer.send_all(&batch).await {
                    let _ = write_tx.send(TransportEvent::Disconnect {
                        reason: format!("{e:#}"),
                    });
                    break;
                }
            }
        });

        let _ = events_tx.send(TransportEvent::Connect);
        Self {
            outbox: VecDeque::new(),
            writer: Some(out_tx),
            events_tx,
            events_rx,
            read_task: Some(read_task),
            closed: false,
            reported: false,
        }
    }

    /// In-memory transport for tests and offline use. No runtime needed.
    pub fn loopback() -> (Self, LoopbackPeer) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(TransportEvent::Connect);
        let peer = LoopbackPeer {
            inbound: events_tx.clone(),
            outbound: out_rx,
        };
        let transport = Self {
            outbox: VecDeque::new(),
            writer: Some(out_tx),
            events_tx,
            events_rx,
            read_task: None,
            closed: false,
            reported: false,
        };
        (transport, peer)
    }

    /// Queues a message. Nothing is written until [`Transport::flush`].
    pub fn send(&mut self, msg: NetMsg) {
        if self.closed {
            debug!(event = msg.event(), "dropping send on closed transport");
            return;
        }
        self.outbox.push_back(msg);
    }

    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// Hands every queued message to the writer in FIFO order. Returns how many.
    pub fn flush(&mut self) -> usize {
        if self.outbox.is_empty() {
            return 0;
        }
        let batch: Vec<NetMsg> = self.outbox.drain(..).collect();
        let n = batch.len();
        let Some(writer) = &self.writer else {
            return 0;
        };
        if writer.send(batch).is_err() {
            warn!("transport writer gone");
            self.writer = None;
            let _ = self.events_tx.send(TransportEvent::Disconnect {
                reason: "writer closed".to_string(),
            });
            return 0;
        }
        n
    }

    /// Next pending event, if any. Only the first disconnect is reported.
    pub fn poll(&mut self) -> Option<TransportEvent> {
        loop {
            let event = match self.events_rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            };
            if let TransportEvent::Disconnect { .. } = event {
                if self.reported {
                    continue;
                }
                self.reported = true;
                self.close();
            }
            return Some(event);
        }
    }

    /// Flushes what is queued, then closes the connection locally.
    pub fn disconnect(&mut self, reason: impl Into<String>) {
        if self.closed {
            return;
        }
        self.flush();
        self.close();
        let _ = self.events_tx.send(TransportEvent::Disconnect {
            reason: reason.into(),
        });
    }

    fn close(&mut self) {
        self.closed = true;
        self.outbox.clear();
        self.writer = None;
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.closed && self.writer.is_some()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

/// The far end of [`Transport::loopback`].
pub struct LoopbackPeer {
    inbound: UnboundedSender<TransportEvent>,
    outbound: UnboundedReceiver<Vec<NetMsg>>,
}

impl LoopbackPeer {
    /// Delivers a message as if it came from the relay.
    pub fn deliver(&self, msg: NetMsg) {
        let _ = self.inbound.send(TransportEvent::Message(msg));
    }

    /// Simulates connection loss.
    pub fn close(&self, reason: &str) {
        let _ = self.inbound.send(TransportEvent::Disconnect {
            reason: reason.to_string(),
        });
    }

    /// Everything flushed so far, in order.
    pub fn sent(&mut self) -> Vec<NetMsg> {
        let mut out = Vec::new();
        while let Ok(batch) = self.outbound.try_recv() {
            out.extend(batch);
        }
        out
    }

    /// Flushed batches, preserving batch boundaries.
    pub fn batches(&mut self) -> Vec<Vec<NetMsg>> {
        let mut out = Vec::new();
        while let Ok(batch) = self.outbound.try_recv() {
            out.push(batch);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use space_shared::net::{ClientId, EntityId};

    use super::*;

    #[test]
    fn send_queues_until_flush_and_keeps_order() {
        let (mut transport, mut peer) = Transport::loopback();
        assert_eq!(transport.poll(), Some(TransportEvent::Connect));

        transport.send(NetMsg::RemoveEntity {
            id: EntityId::new("1.1"),
        });
        transport.send(NetMsg::RemoveClient { id: ClientId(4) });
        assert!(peer.sent().is_empty());
        assert_eq!(transport.queued(), 2);

        assert_eq!(transport.flush(), 2);
        let batches = peer.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].event(), "remove-entity");
        assert_eq!(batches[0][1].event(), "remove-client");
        assert_eq!(transport.flush(), 0);
    }

    #[test]
    fn disconnect_is_reported_once() {
        let (mut transport, peer) = Transport::loopback();
        assert_eq!(transport.poll(), Some(TransportEvent::Connect));
        peer.close("reset");
        peer.close("reset again");
        assert!(matches!(
            transport.poll(),
            Some(TransportEvent::Disconnect { .. })
        ));
        assert_eq!(transport.poll(), None);
        assert!(!transport.is_connected());

        transport.send(NetMsg::RemoveClient { id: ClientId(1) });
        assert_eq!(transport.queued(), 0);
    }

    #[test]
    fn local_disconnect_raises_event() {
        let (mut transport, _peer) = Transport::loopback();
        assert_eq!(transport.poll(), Some(TransportEvent::Connect));
        transport.disconnect("bye");
        assert!(matches!(
            transport.poll(),
            Some(TransportEvent::Disconnect { .. })
        ));
        assert_eq!(transport.poll(), None);
    }
}
