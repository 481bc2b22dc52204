//! The TCPCLv3 bidirectional session state machine: contact header already
//! exchanged, now pumping data segments, acks, and keepalives until a
//! shutdown (ours, the peer's, or an error) ends the session.

use crate::codec::{DataSegmentFlags, Message, RefuseReason, ShutdownReason};
use crate::error::{Error, Result};
use crate::timers::KeepaliveTimers;
use bpcore_cla_link::{AckRing, LinkTelemetry};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Callbacks the session invokes from its own executor thread. A host
/// implements this to wire the link into its induct/outduct plumbing; the
/// core makes no assumption about what `U` (the per-forward user-data
/// token) actually is.
pub trait LinkCallbacks<U>: Send {
    fn on_bundle_received(&self, bundle: Bytes);
    fn on_successful_send(&self, user_data: U, uuid: u64);
    fn on_failed_send(&self, bundle: Bytes, user_data: U, uuid: u64);
    fn on_link_status_changed(&self, down: bool, uuid: u64);
}

/// Handle used by other threads to enqueue a bundle for sending or request
/// shutdown; both operations post onto the session's own executor and
/// return immediately, per the core's cross-thread entry point contract.
#[derive(Clone)]
pub struct SessionHandle<U> {
    to_session: mpsc::Sender<(Bytes, U)>,
    shutdown_called: Arc<AtomicBool>,
}

impl<U> SessionHandle<U> {
    /// Enqueues `bundle` for sending. Returns `false` (back-pressure, per
    /// §5) if the link's internal queue is saturated; the caller should
    /// re-queue at a higher layer rather than retry here.
    pub fn forward(&self, bundle: Bytes, user_data: U) -> bool {
        self.to_session.try_send((bundle, user_data)).is_ok()
    }

    pub fn shutdown(&self) {
        self.shutdown_called.store(true, Ordering::SeqCst);
    }
}

struct SegmentExpectation {
    cumulative_length: u64,
    is_end: bool,
}

/// Acks only echo cumulative length, never a start/end flag, so matching
/// compares `cumulative_length` alone; `is_end` just tags what the sender
/// should do once that length is acked.
impl PartialEq for SegmentExpectation {
    fn eq(&self, other: &Self) -> bool {
        self.cumulative_length == other.cumulative_length
    }
}

pub struct Session<T, C, U> {
    transport: T,
    callbacks: C,
    telemetry: Arc<LinkTelemetry>,
    ack_ring: AckRing<SegmentExpectation, Option<(U, u64)>>,
    keepalive: KeepaliveTimers,
    max_fragment_size: usize,
    from_caller: mpsc::Receiver<(Bytes, U)>,
    ingress_bundle: Option<BytesMut>,
    next_uuid: u64,
    send_error_sticky: bool,
    shutdown_called: Arc<AtomicBool>,
    link_uuid: u64,
    last_acked_cumulative: u64,
}

impl<T, C, U> Session<T, C, U>
where
    T: StreamExt<Item = Result<Message>> + SinkExt<Message> + Unpin,
    C: LinkCallbacks<U>,
    <T as futures::Sink<Message>>::Error: std::fmt::Debug,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: T,
        callbacks: C,
        telemetry: Arc<LinkTelemetry>,
        negotiated_keepalive_secs: u16,
        max_fragment_size: usize,
        ack_ring_capacity: usize,
        link_uuid: u64,
    ) -> (Self, SessionHandle<U>) {
        let (tx, rx) = mpsc::channel(ack_ring_capacity.max(1));
        let shutdown_called = Arc::new(AtomicBool::new(false));
        let session = Self {
            transport,
            callbacks,
            telemetry,
            ack_ring: AckRing::new(ack_ring_capacity),
            keepalive: KeepaliveTimers::new(Duration::from_secs(negotiated_keepalive_secs as u64)),
            max_fragment_size,
            from_caller: rx,
            ingress_bundle: None,
            next_uuid: 0,
            send_error_sticky: false,
            shutdown_called: shutdown_called.clone(),
            link_uuid,
            last_acked_cumulative: 0,
        };
        (session, SessionHandle { to_session: tx, shutdown_called })
    }

    async fn send_msg(&mut self, msg: Message) -> Result<()> {
        self.transport.send(msg).await.map_err(|e| {
            warn!("send failed: {e:?}");
            Error::Io(std::io::Error::other("transport send failed"))
        })
    }

    async fn send_bundle(&mut self, mut bundle: Bytes, user_data: U) {
        if self.send_error_sticky {
            self.callbacks.on_failed_send(bundle, user_data, self.next_uuid);
            self.next_uuid += 1;
            return;
        }

        let uuid = self.next_uuid;
        self.next_uuid += 1;

        let total_len = bundle.len() as u64;
        let mut cumulative: u64 = 0;
        let mut user_data = Some(user_data);

        loop {
            let chunk_len = bundle.len().min(self.max_fragment_size.max(1));
            let chunk = bundle.split_to(chunk_len);
            cumulative += chunk_len as u64;
            let is_end = bundle.is_empty();
            let is_start = cumulative == chunk_len as u64;

            let flags = DataSegmentFlags { start: is_start, end: is_end };
            if !self.ack_ring.push(
                SegmentExpectation { cumulative_length: cumulative, is_end },
                if is_end { user_data.take().map(|u| (u, uuid)) } else { None },
            ) {
                // Ring full: treat as a local failure for this bundle.
                if let Some(user_data) = user_data.take() {
                    self.callbacks.on_failed_send(Bytes::new(), user_data, uuid);
                }
                return;
            }

            if self
                .send_msg(Message::DataSegment { flags, data: chunk })
                .await
                .is_err()
            {
                self.on_send_error();
                if let Some(user_data) = user_data.take() {
                    self.callbacks.on_failed_send(Bytes::new(), user_data, uuid);
                }
                return;
            }
            self.keepalive.on_data_sent();
            self.telemetry.record_segment_sent(chunk_len as u64);

            if is_end {
                self.telemetry.record_bundle_sent();
                break;
            }
        }
        debug_assert_eq!(cumulative, total_len);
    }

    fn on_send_error(&mut self) {
        self.send_error_sticky = true;
        self.telemetry.set_link_up(false);
        self.callbacks.on_link_status_changed(true, self.link_uuid);
        for pending in self.ack_ring.drain_all() {
            if let Some((user_data, uuid)) = pending.user_data {
                self.callbacks.on_failed_send(Bytes::new(), user_data, uuid);
            }
        }
    }

    async fn on_ack(&mut self, length: u64) -> Result<()> {
        let expectation = SegmentExpectation { cumulative_length: length, is_end: false };
        // `is_end` isn't part of the match key; only cumulative_length is
        // compared, since the peer doesn't echo a start/end flag in an Ack.
        match self.ack_ring.pop_matching(&expectation) {
            Ok(Some(pending)) => {
                let segment_bytes = length.saturating_sub(self.last_acked_cumulative);
                self.telemetry.record_segment_acked(segment_bytes);
                if pending.descriptor.is_end {
                    self.telemetry.record_bundle_acked();
                    self.last_acked_cumulative = 0;
                    if let Some((user_data, uuid)) = pending.user_data {
                        self.callbacks.on_successful_send(user_data, uuid);
                    }
                } else {
                    self.last_acked_cumulative = length;
                }
                Ok(())
            }
            Ok(None) => Err(Error::AckMismatch { expected: 0, actual: length }),
            Err(()) => {
                let expected = self
                    .ack_ring
                    .peek_head()
                    .map(|d| d.cumulative_length)
                    .unwrap_or(0);
                Err(Error::AckMismatch { expected, actual: length })
            }
        }
    }

    async fn on_data_segment(&mut self, flags: DataSegmentFlags, data: Bytes) -> Result<()> {
        self.keepalive.on_data_received();
        self.telemetry.record_segment_received(data.len() as u64);

        if flags.start {
            if self.ingress_bundle.is_some() {
                return Err(Error::UnexpectedSegment);
            }
            self.ingress_bundle = Some(BytesMut::with_capacity(data.len()));
        }
        let Some(buf) = &mut self.ingress_bundle else {
            return Err(Error::UnexpectedSegment);
        };
        buf.extend_from_slice(&data);
        let cumulative = buf.len() as u64;

        if flags.end {
            let bundle = self.ingress_bundle.take().unwrap().freeze();
            self.telemetry.record_bundle_received();
            self.callbacks.on_bundle_received(bundle);
        }

        self.send_msg(Message::AckSegment { length: cumulative }).await
    }

    async fn recv_one(&mut self) -> Result<Message> {
        if self.keepalive.is_disabled() {
            return match self.transport.next().await {
                Some(msg) => msg,
                None => Err(Error::Io(std::io::Error::other("hangup"))),
            };
        }
        match tokio::time::timeout(self.keepalive.idle_timeout(), self.transport.next()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => Err(Error::Io(std::io::Error::other("hangup"))),
            Err(_) => {
                if self.keepalive.on_idle_timeout_fired() {
                    // Data arrived during the interval; the caller loop
                    // will simply call recv_one again.
                    Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::WouldBlock,
                        "idle-timeout-restart",
                    )))
                } else {
                    Err(Error::IdleTimeout(self.keepalive.idle_timeout()))
                }
            }
        }
    }

    /// Runs the session until shutdown. Consumes `self`.
    pub async fn run(mut self) {
        self.telemetry.set_link_up(true);
        loop {
            if self.shutdown_called.load(Ordering::SeqCst) {
                return self.graceful_shutdown(None).await;
            }

            let send_timeout = self.keepalive.send_timeout();
            tokio::select! {
                biased;

                maybe = self.from_caller.recv() => {
                    match maybe {
                        Some((bundle, user_data)) => self.send_bundle(bundle, user_data).await,
                        None => return self.graceful_shutdown(None).await,
                    }
                }

                result = self.recv_one() => {
                    match result {
                        Ok(msg) => {
                            if let Err(e) = self.handle_message(msg).await {
                                return self.graceful_shutdown(Some(reason_for(&e))).await;
                            }
                        }
                        Err(e) if e.is_would_block() => continue,
                        Err(Error::IdleTimeout(_)) => {
                            return self.graceful_shutdown(Some(ShutdownReason::Idle)).await;
                        }
                        Err(e) => {
                            return self.graceful_shutdown(Some(reason_for(&e))).await;
                        }
                    }
                }

                _ = bpcore_async::time::sleep(send_timeout), if !self.keepalive.is_disabled() => {
                    if self.send_msg(Message::KeepAlive).await.is_err() {
                        self.on_send_error();
                    }
                    self.keepalive.on_send_timeout_fired();
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Result<()> {
        match msg {
            Message::DataSegment { flags, data } => self.on_data_segment(flags, data).await,
            Message::AckSegment { length } => self.on_ack(length).await,
            Message::RefuseBundle { reason } => {
                info!("peer refused bundle: {reason:?}");
                // The peer refuses the bundle currently in flight; fail it
                // the same way a send error would, via the head of the ack
                // ring, rather than silently dropping it.
                if let Some(pending) = self.ack_ring.pop_head() {
                    if let Some((user_data, uuid)) = pending.user_data {
                        self.callbacks.on_failed_send(Bytes::new(), user_data, uuid);
                    }
                }
                Ok(())
            }
            Message::KeepAlive => Ok(()),
            Message::Shutdown { reason, .. } => Err(Error::PeerShutdown { reason: reason.map(u8::from) }),
            Message::Length { length } => {
                debug!("peer announced upcoming bundle length {length}");
                Ok(())
            }
        }
    }

    async fn graceful_shutdown(mut self, reason: Option<ShutdownReason>) {
        let msg = Message::Shutdown { reason, reconnection_delay: None };
        let _ = self.send_msg(msg).await;

        tokio::select! {
            _ = bpcore_async::time::sleep(Duration::from_secs(3)) => {}
            _ = async {
                while let Ok(msg) = self.recv_one().await {
                    if matches!(msg, Message::Shutdown { .. }) {
                        break;
                    }
                }
            } => {}
        }

        self.telemetry.set_link_up(false);
        self.callbacks.on_link_status_changed(true, self.link_uuid);
        let _ = self.transport.close().await;
    }
}

fn reason_for(e: &Error) -> ShutdownReason {
    match e {
        Error::UnsupportedVersion(_) => ShutdownReason::VersionMismatch,
        Error::UnexpectedRemoteEid { .. } => ShutdownReason::ContactFailure,
        Error::AckMismatch { .. } | Error::UnexpectedSegment => ShutdownReason::ResourceExhaustion,
        _ => ShutdownReason::Idle,
    }
}

impl Error {
    fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}
