//! Session lifecycle: worker threads, handshake and teardown.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::link::Link;
use crate::node_table::NodeState;
use crate::receiver::run_receiver;
use crate::send::SendOutcome;
use crate::stats::LinkStatsSnapshot;
use crate::transport::{ByteSink, ByteSource};
use bidib_protocol::{ActionId, Message, MessageType, NodeAddress};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const HANDSHAKE_POLL: Duration = Duration::from_millis(1);

/// A running link: the receiver thread, the optional flush thread and the
/// shared [`Link`] state.
pub struct Session {
    link: Arc<Link>,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
    flusher: Option<(JoinHandle<()>, mpsc::Sender<()>)>,
}

impl Session {
    /// Starts the worker threads and, when configured, waits for the
    /// interface to answer a magic request.
    ///
    /// A missing answer tears the session down again and is reported as
    /// [`EngineError::HandshakeTimeout`].
    pub fn start<S, K>(config: EngineConfig, source: S, sink: K) -> Result<Self, EngineError>
    where
        S: ByteSource + 'static,
        K: ByteSink + 'static,
    {
        config.validate()?;
        let handshake = config.session.handshake;
        let flush_interval = config.link.flush_interval();

        let link = Arc::new(Link::new(config, Box::new(sink)));
        let running = Arc::new(AtomicBool::new(true));

        let receiver = {
            let link = link.clone();
            let running = running.clone();
            let source: Box<dyn ByteSource> = Box::new(source);
            thread::Builder::new()
                .name("bidib-rx".into())
                .spawn(move || run_receiver(link, source, running))?
        };

        let mut session = Session {
            link,
            running,
            receiver: Some(receiver),
            flusher: None,
        };

        if let Some(interval) = flush_interval {
            let link = session.link.clone();
            let (tx, rx) = mpsc::channel::<()>();
            let handle = thread::Builder::new()
                .name("bidib-flush".into())
                .spawn(move || run_flusher(link, rx, interval))?;
            session.flusher = Some((handle, tx));
        }

        tracing::info!(
            "Session started (max_packet_size={}, default_credit={}, flush_interval={:?})",
            session.link.config().link.max_packet_size,
            session.link.config().flow_control.default_credit,
            flush_interval
        );

        if handshake {
            session.handshake()?;
        }
        Ok(session)
    }

    fn handshake(&self) -> Result<(), EngineError> {
        let timeout = self.link.config().session.handshake_timeout();
        self.link
            .send(NodeAddress::ROOT, MessageType::SYS_GET_MAGIC, Bytes::new(), None)?;
        self.link.flush();

        let deadline = Instant::now() + timeout;
        loop {
            let answer = self.link.uplink().pop_matching(|m| {
                m.address.is_root() && m.msg_type == MessageType::SYS_MAGIC
            });
            if let Some(msg) = answer {
                tracing::info!(magic = ?msg.payload, "Interface answered handshake");
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!("Interface did not answer within {:?}", timeout);
                return Err(EngineError::HandshakeTimeout(timeout));
            }
            thread::sleep(HANDSHAKE_POLL);
        }
    }

    /// Sends a message to `address`. See [`Link::send`].
    pub fn send(
        &self,
        address: NodeAddress,
        msg_type: MessageType,
        payload: impl Into<Bytes>,
    ) -> Result<SendOutcome, EngineError> {
        self.link.send(address, msg_type, payload, None)
    }

    /// Sends a message whose answer will carry `action_id`.
    pub fn send_with_action(
        &self,
        address: NodeAddress,
        msg_type: MessageType,
        payload: impl Into<Bytes>,
        action_id: ActionId,
    ) -> Result<SendOutcome, EngineError> {
        self.link.send(address, msg_type, payload, Some(action_id))
    }

    /// Next inbound message, if any.
    pub fn poll_uplink(&self) -> Option<Message> {
        self.link.uplink().pop()
    }

    /// Next inbound error report, if any.
    pub fn poll_error(&self) -> Option<Message> {
        self.link.errors().pop()
    }

    pub fn flush(&self) {
        self.link.flush();
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.link.stats().snapshot()
    }

    pub fn node_state(&self, address: NodeAddress) -> Option<NodeState> {
        self.link.node_state(address)
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Tells the interface to stop sending, flushes, joins the worker
    /// threads and clears all link state.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.receiver.is_none() && self.flusher.is_none() {
            return;
        }

        if let Err(e) =
            self.link
                .send_unchecked(NodeAddress::ROOT, MessageType::SYS_DISABLE, Bytes::new())
        {
            tracing::warn!(error = %e, "failed to queue disable request");
        }
        self.link.flush();
        self.running.store(false, Ordering::Release);

        if let Some((handle, tx)) = self.flusher.take() {
            drop(tx);
            if handle.join().is_err() {
                tracing::error!("Flush thread panicked");
            }
        }
        if let Some(handle) = self.receiver.take() {
            if handle.join().is_err() {
                tracing::error!("Receiver thread panicked");
            }
        }

        self.link.reset();
        tracing::info!("Session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Flushes the packet buffer every `interval` until the sender is dropped.
fn run_flusher(link: Arc<Link>, stop: mpsc::Receiver<()>, interval: Duration) {
    tracing::debug!("Flush thread started (interval={:?})", interval);
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => link.flush(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Flush thread stopped");
}
