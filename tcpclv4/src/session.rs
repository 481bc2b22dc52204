//! The TCPCLv4 session state machine: SESSION_INIT already exchanged, now
//! pumping transfers (each a sequence of XFER_SEGMENT messages sharing a
//! transfer id), acks, and keepalives until a graceful SESS_TERM (ours or
//! the peer's) or an error ends the session.

use crate::codec::{
    Message, SessTermReason, SessionInit, TransferFlags, XferRefuseReason,
};
use crate::error::{Error, Result};
use crate::extension::{self, Extension};
use crate::timers::KeepaliveTimers;
use bpcore_cla_link::{AckRing, LinkTelemetry};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The only transfer extension this implementation understands: the total
/// bundle length, carried on a multi-segment transfer's start segment.
const EXT_TYPE_TRANSFER_LENGTH: u16 = 0x0001;
const KNOWN_TRANSFER_EXTENSIONS: &[u16] = &[EXT_TYPE_TRANSFER_LENGTH];
const KNOWN_SESSION_EXTENSIONS: &[u16] = &[];

/// Checks `init.extensions` for a critical extension this implementation
/// doesn't understand. Called on the peer's SESSION_INIT.
pub fn reject_unknown_session_extensions(init: &SessionInit) -> Result<()> {
    match extension::has_unknown_critical(&init.extensions, KNOWN_SESSION_EXTENSIONS) {
        Some(item_type) => Err(Error::UnknownCriticalSessionExtension(item_type)),
        None => Ok(()),
    }
}

pub trait LinkCallbacks<U>: Send {
    fn on_bundle_received(&self, bundle: Bytes);
    fn on_successful_send(&self, user_data: U, uuid: u64);
    fn on_failed_send(&self, bundle: Bytes, user_data: U, uuid: u64);
    fn on_link_status_changed(&self, down: bool, uuid: u64);
}

#[derive(Clone)]
pub struct SessionHandle<U> {
    to_session: mpsc::Sender<(Bytes, U)>,
    shutdown_called: Arc<AtomicBool>,
}

impl<U> SessionHandle<U> {
    pub fn forward(&self, bundle: Bytes, user_data: U) -> bool {
        self.to_session.try_send((bundle, user_data)).is_ok()
    }

    pub fn shutdown(&self) {
        self.shutdown_called.store(true, Ordering::SeqCst);
    }
}

struct SegmentExpectation {
    transfer_id: u64,
    cumulative_length: u64,
    is_end: bool,
}

/// Acks echo `(transfer_id, cumulative_length)` but not start/end, so
/// matching ignores `is_end`.
impl PartialEq for SegmentExpectation {
    fn eq(&self, other: &Self) -> bool {
        self.transfer_id == other.transfer_id && self.cumulative_length == other.cumulative_length
    }
}

struct IngressTransfer {
    buf: BytesMut,
    declared_total_len: Option<u64>,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Phase {
    Established,
    /// SESS_TERM sent or received; in-flight transfers may still complete,
    /// but no new outgoing transfer may begin and incoming starts are
    /// refused.
    Ending,
}

pub struct Session<T, C, U> {
    transport: T,
    callbacks: C,
    telemetry: Arc<LinkTelemetry>,
    ack_ring: AckRing<SegmentExpectation, Option<(U, u64)>>,
    keepalive: KeepaliveTimers,
    remote_segment_mru: u64,
    local_segment_mru: u64,
    local_transfer_mru: u64,
    from_caller: mpsc::Receiver<(Bytes, U)>,
    ingress: HashMap<u64, IngressTransfer>,
    next_transfer_id: u64,
    next_uuid: u64,
    send_error_sticky: bool,
    shutdown_called: Arc<AtomicBool>,
    link_uuid: u64,
    last_acked_cumulative: u64,
    phase: Phase,
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
        remote_segment_mru: u64,
        local_segment_mru: u64,
        local_transfer_mru: u64,
        segment_ring_capacity: usize,
        link_uuid: u64,
    ) -> (Self, SessionHandle<U>) {
        let (tx, rx) = mpsc::channel(segment_ring_capacity.max(1));
        let shutdown_called = Arc::new(AtomicBool::new(false));
        let session = Self {
            transport,
            callbacks,
            telemetry,
            ack_ring: AckRing::new(segment_ring_capacity),
            keepalive: KeepaliveTimers::new(Duration::from_secs(negotiated_keepalive_secs as u64)),
            remote_segment_mru: remote_segment_mru.max(1),
            local_segment_mru,
            local_transfer_mru,
            from_caller: rx,
            ingress: HashMap::new(),
            next_transfer_id: 0,
            next_uuid: 0,
            send_error_sticky: false,
            shutdown_called: shutdown_called.clone(),
            link_uuid,
            last_acked_cumulative: 0,
            phase: Phase::Established,
        };
        (session, SessionHandle { to_session: tx, shutdown_called })
    }

    async fn send_msg(&mut self, msg: Message) -> Result<()> {
        self.transport.send(msg).await.map_err(|e| {
            warn!("send failed: {e:?}");
            Error::Io(std::io::Error::other("transport send failed"))
        })
    }

    fn allocate_transfer_id(&mut self) -> Result<u64> {
        let id = self.next_transfer_id;
        self.next_transfer_id = self.next_transfer_id.checked_add(1).ok_or(Error::TransferIdExhausted)?;
        Ok(id)
    }

    async fn send_bundle(&mut self, mut bundle: Bytes, user_data: U) {
        let uuid = self.next_uuid;
        self.next_uuid += 1;

        if self.send_error_sticky || self.phase == Phase::Ending {
            self.callbacks.on_failed_send(bundle, user_data, uuid);
            return;
        }

        let transfer_id = match self.allocate_transfer_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("transfer id space exhausted: {e}");
                self.callbacks.on_failed_send(bundle, user_data, uuid);
                return self.graceful_shutdown(Some(SessTermReason::ResourceExhaustion)).await;
            }
        };

        let total_len = bundle.len() as u64;
        let mut cumulative: u64 = 0;
        let mut user_data = Some(user_data);

        loop {
            let chunk_len = bundle.len().min(self.remote_segment_mru as usize);
            let chunk = bundle.split_to(chunk_len);
            cumulative += chunk_len as u64;
            let is_end = bundle.is_empty();
            let is_start = cumulative == chunk_len as u64;

            let extensions = if is_start && !is_end {
                vec![Extension {
                    critical: false,
                    item_type: EXT_TYPE_TRANSFER_LENGTH,
                    value: Bytes::copy_from_slice(&total_len.to_be_bytes()),
                }]
            } else {
                Vec::new()
            };
            let flags = TransferFlags { start: is_start, end: is_end };

            if !self.ack_ring.push(
                SegmentExpectation { transfer_id, cumulative_length: cumulative, is_end },
                if is_end { user_data.take().map(|u| (u, uuid)) } else { None },
            ) {
                if let Some(user_data) = user_data.take() {
                    self.callbacks.on_failed_send(Bytes::new(), user_data, uuid);
                }
                return;
            }

            if self
                .send_msg(Message::XferSegment { flags, transfer_id, extensions, data: chunk })
                .await
                .is_err()
            {
                self.on_send_error();
                if let Some(user_data) = user_data.take() {
                    self.callbacks.on_failed_send(Bytes::new(), user_data, uuid);
                }
                return;
            }
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

    async fn on_ack(&mut self, flags: TransferFlags, transfer_id: u64, acked_length: u64) -> Result<()> {
        let expectation = SegmentExpectation { transfer_id, cumulative_length: acked_length, is_end: flags.end };
        match self.ack_ring.pop_matching(&expectation) {
            Ok(Some(pending)) => {
                let segment_bytes = acked_length.saturating_sub(self.last_acked_cumulative);
                self.telemetry.record_segment_acked(segment_bytes);
                if pending.descriptor.is_end {
                    self.telemetry.record_bundle_acked();
                    self.last_acked_cumulative = 0;
                    if let Some((user_data, uuid)) = pending.user_data {
                        self.callbacks.on_successful_send(user_data, uuid);
                    }
                } else {
                    self.last_acked_cumulative = acked_length;
                }
                Ok(())
            }
            Ok(None) => Err(Error::AckMismatch {
                expected_transfer_id: transfer_id,
                expected: 0,
                transfer_id,
                actual: acked_length,
            }),
            Err(()) => {
                let head = self.ack_ring.peek_head();
                Err(Error::AckMismatch {
                    expected_transfer_id: head.map(|d| d.transfer_id).unwrap_or(transfer_id),
                    expected: head.map(|d| d.cumulative_length).unwrap_or(0),
                    transfer_id,
                    actual: acked_length,
                })
            }
        }
    }

    async fn on_xfer_segment(
        &mut self,
        flags: TransferFlags,
        transfer_id: u64,
        extensions: Vec<Extension>,
        data: Bytes,
    ) -> Result<()> {
        self.keepalive.on_data_received();

        if flags.start {
            if self.phase == Phase::Ending {
                return self
                    .send_msg(Message::XferRefuse { reason: XferRefuseReason::SessionTerminating, transfer_id })
                    .await;
            }
            if let Some(item_type) = extension::has_unknown_critical(&extensions, KNOWN_TRANSFER_EXTENSIONS) {
                warn!("unknown critical transfer extension {item_type:#x} on transfer {transfer_id}");
                return self
                    .send_msg(Message::XferRefuse { reason: XferRefuseReason::ExtensionFailure, transfer_id })
                    .await;
            }
            let declared_total_len = extensions
                .iter()
                .find(|e| e.item_type == EXT_TYPE_TRANSFER_LENGTH && e.value.len() == 8)
                .map(|e| u64::from_be_bytes(e.value[..8].try_into().unwrap()));
            if declared_total_len.is_some_and(|len| len > self.local_transfer_mru) {
                return self
                    .send_msg(Message::XferRefuse { reason: XferRefuseReason::NotAcceptable, transfer_id })
                    .await;
            }
            self.ingress.insert(
                transfer_id,
                IngressTransfer { buf: BytesMut::with_capacity(data.len()), declared_total_len },
            );
        }

        if data.len() as u64 > self.local_segment_mru {
            self.ingress.remove(&transfer_id);
            return self
                .send_msg(Message::XferRefuse { reason: XferRefuseReason::NotAcceptable, transfer_id })
                .await;
        }

        let Some(entry) = self.ingress.get_mut(&transfer_id) else {
            return Err(Error::UnexpectedTransferId(transfer_id));
        };
        entry.buf.extend_from_slice(&data);
        self.telemetry.record_segment_received(data.len() as u64);
        let cumulative = entry.buf.len() as u64;

        if cumulative > self.local_transfer_mru {
            self.ingress.remove(&transfer_id);
            return self
                .send_msg(Message::XferRefuse { reason: XferRefuseReason::NotAcceptable, transfer_id })
                .await;
        }

        if flags.end {
            let entry = self.ingress.remove(&transfer_id).unwrap();
            self.telemetry.record_bundle_received();
            self.callbacks.on_bundle_received(entry.buf.freeze());
        }

        self.send_msg(Message::XferAck { flags, transfer_id, acked_length: cumulative }).await
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
                    Err(Error::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, "idle-timeout-restart")))
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
            if self.shutdown_called.load(Ordering::SeqCst) && self.phase == Phase::Established {
                self.phase = Phase::Ending;
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
                            return self.graceful_shutdown(Some(SessTermReason::IdleTimeout)).await;
                        }
                        Err(e) => {
                            return self.graceful_shutdown(Some(reason_for(&e))).await;
                        }
                    }
                }

                _ = bpcore_async::time::sleep(send_timeout), if !self.keepalive.is_disabled() => {
                    if self.send_msg(Message::Keepalive).await.is_err() {
                        self.on_send_error();
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Result<()> {
        match msg {
            Message::XferSegment { flags, transfer_id, extensions, data } => {
                self.on_xfer_segment(flags, transfer_id, extensions, data).await
            }
            Message::XferAck { flags, transfer_id, acked_length } => self.on_ack(flags, transfer_id, acked_length).await,
            Message::XferRefuse { reason, transfer_id } => {
                info!("peer refused transfer {transfer_id}: {reason:?}");
                Ok(())
            }
            Message::MsgReject { reason, rejected_type } => {
                info!("peer rejected message type {rejected_type:#x}: {reason:?}");
                Ok(())
            }
            Message::Keepalive => Ok(()),
            Message::SessTerm { reply, reason } => Err(Error::PeerSessTerm { reason: reason.into(), reply }),
            Message::SessionInit(_) => {
                debug!("unexpected SESS_INIT after session established");
                Ok(())
            }
        }
    }

    /// Sends our own SESS_TERM (unless `reason` is `None` and we're only
    /// replying to one we already saw), waits up to 3s for the peer's ack,
    /// then waits a further 1s grace before closing.
    async fn graceful_shutdown(mut self, reason: Option<SessTermReason>) {
        self.phase = Phase::Ending;
        let msg = Message::SessTerm { reply: false, reason: reason.unwrap_or(SessTermReason::Unknown) };
        let _ = self.send_msg(msg).await;

        tokio::select! {
            _ = bpcore_async::time::sleep(Duration::from_secs(3)) => {}
            _ = async {
                while let Ok(msg) = self.recv_one().await {
                    if let Message::SessTerm { reply: false, .. } = msg {
                        let _ = self.send_msg(Message::SessTerm {
                            reply: true,
                            reason: SessTermReason::Unknown,
                        }).await;
                        break;
                    }
                    if matches!(msg, Message::SessTerm { reply: true, .. }) {
                        break;
                    }
                }
            } => {}
        }

        bpcore_async::time::sleep(Duration::from_secs(1)).await;

        self.telemetry.set_link_up(false);
        self.callbacks.on_link_status_changed(true, self.link_uuid);
        let _ = self.transport.close().await;
    }
}

fn reason_for(e: &Error) -> SessTermReason {
    match e {
        Error::UnsupportedVersion(_) | Error::UnexpectedRemoteEid { .. } | Error::TlsRequired => {
            SessTermReason::ContactFailure
        }
        Error::UnknownCriticalSessionExtension(_) => SessTermReason::ContactFailure,
        Error::TransferIdExhausted
        | Error::AckMismatch { .. }
        | Error::UnexpectedTransferId(_)
        | Error::SegmentMruExceeded { .. }
        | Error::TransferMruExceeded { .. } => SessTermReason::ResourceExhaustion,
        _ => SessTermReason::Unknown,
    }
}

impl Error {
    fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}
