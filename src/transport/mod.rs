//! `RPStream` transport core (spec.md §4.5): owns the session's UDP
//! socket, multiplexes channels 1/2/3/9, envelopes every datagram through
//! `StreamCipher`, and runs the retransmit/heartbeat disciplines.
//!
//! Shaped after the teacher's `AlnpStream<T: FrameTransport>` (`stream.rs`)
//! for the send side and `ReliableControlChannel` (`handshake/transport.rs`)
//! for the retry discipline, generalized from a single CBOR frame type to
//! the RP datagram's channel multiplex and from exponential backoff to
//! spec.md §7's fixed 3×/200 ms rule (`retransmit::RetransmitTracker`).

mod header;
mod retransmit;

pub use header::{
    PacketHeader, CHANNEL_AUDIO, CHANNEL_CONTROL, CHANNEL_FEEDBACK_HISTORY,
    CHANNEL_FEEDBACK_STATE, CHANNEL_STREAMINFO_ACK, CHANNEL_VIDEO, FLAG_ACK, FLAG_DATA,
    FLAG_RETRANSMIT, HEADER_LEN,
};
pub use retransmit::RetransmitTracker;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::config::Codec;
use crate::crypto::{PacketKind, SessionKeys};
use crate::demux::{AudioAssembler, AvReceiver, Fragment, FrameAssembler, VideoDemuxEvent};
use crate::error::{Result, TransportError};
use crate::feedback::FeedbackEvent;

/// 1 Hz keepalive per spec.md §4.5. Payload is 15 zero bytes, unencrypted,
/// GMAC'd — identical shape to `PacketKind::Congestion`.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum UDP payload the socket reader will allocate a buffer for.
const MAX_DATAGRAM: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Stopping,
    Stopped,
}

/// One direction of the session's cipher state, matched to the role this
/// process plays (gateway talks to the console, so it sends with its own
/// `send` cipher and opens inbound datagrams with `recv`).
struct Directional {
    send_tsn: AtomicU32,
}

/// The session's transport core. One instance per active stream; created
/// once the handshake reaches `Streaming` and handed the negotiated
/// `SessionKeys`.
pub struct RpStream {
    socket: UdpSocket,
    peer: SocketAddr,
    keys: SessionKeys,
    dir: Directional,
    retransmit: Mutex<RetransmitTracker>,
    receivers: Mutex<Vec<Arc<dyn AvReceiver>>>,
    video: Mutex<FrameAssembler>,
    audio: Mutex<AudioAssembler>,
    state: Mutex<RunState>,
    disconnect_notified: AtomicBool,
}

impl RpStream {
    pub fn new(socket: UdpSocket, peer: SocketAddr, keys: SessionKeys, video_codec: Codec) -> Arc<Self> {
        Arc::new(Self {
            socket,
            peer,
            keys,
            dir: Directional {
                send_tsn: AtomicU32::new(0),
            },
            retransmit: Mutex::new(RetransmitTracker::new()),
            receivers: Mutex::new(Vec::new()),
            video: Mutex::new(FrameAssembler::new(video_codec)),
            audio: Mutex::new(AudioAssembler::new()),
            state: Mutex::new(RunState::Running),
            disconnect_notified: AtomicBool::new(false),
        })
    }

    pub fn add_receiver(&self, receiver: Arc<dyn AvReceiver>) {
        self.receivers.lock().push(receiver);
    }

    fn next_tsn(&self) -> u32 {
        self.dir.send_tsn.fetch_add(1, Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        *self.state.lock() == RunState::Running
    }

    /// Build, seal, and send one datagram. Returns the exact bytes put on
    /// the wire so callers that need reliability (`send_control`) can hand
    /// them to the retransmit tracker unchanged.
    async fn seal_and_send(
        &self,
        channel: u8,
        flags: u8,
        tsn: u32,
        mut payload: Vec<u8>,
        kind: PacketKind,
    ) -> Result<Vec<u8>> {
        let header = PacketHeader::new(channel, flags, tsn, self.keys.send.key_pos());
        let header_bytes = header.encode_zeroed();
        let gmac = self
            .keys
            .send
            .seal(&header_bytes, &mut payload, kind.encrypt_payload(), kind)?;

        let mut datagram = Vec::with_capacity(HEADER_LEN + payload.len());
        datagram.extend_from_slice(&header_bytes[..14]);
        datagram.extend_from_slice(&gmac);
        datagram.extend_from_slice(&payload);

        self.socket
            .send_to(&datagram, self.peer)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(datagram)
    }

    /// Send a reliable control-channel message (spec.md §4.5, §6.3):
    /// Protobuf bytes, GMAC'd, unencrypted, tracked for retransmission by
    /// TSN until the console's `DATA_ACK` arrives.
    pub async fn send_control(&self, payload: Vec<u8>) -> Result<()> {
        let tsn = self.next_tsn();
        let kind = PacketKind::Control {
            payload_len: payload.len(),
        };
        let datagram = self
            .seal_and_send(CHANNEL_CONTROL, FLAG_DATA, tsn, payload, kind)
            .await?;
        self.retransmit.lock().track(tsn, datagram, Instant::now());
        Ok(())
    }

    /// `IDRREQUEST` over channel 1 (spec.md §4.5, §4.7). The actual
    /// Protobuf encoding is an external collaborator's concern (spec.md
    /// §1: "the spec treats them as opaque byte-strings"); this crate
    /// sends the bare message-name marker `ProtoCodec` helpers elsewhere
    /// would wrap.
    pub async fn send_keyframe_request(&self) -> Result<()> {
        debug!(target: "rp_gateway::transport", "requesting keyframe");
        self.send_control(b"IDRREQUEST".to_vec()).await
    }

    /// 1 Hz keepalive: unencrypted, GMAC'd, `advance_by = 15`, not
    /// tracked for retransmission (spec.md §4.5).
    pub async fn send_heartbeat(&self) -> Result<()> {
        let tsn = self.next_tsn();
        self.seal_and_send(CHANNEL_CONTROL, 0, tsn, vec![0u8; 15], PacketKind::Congestion)
            .await?;
        Ok(())
    }

    /// Send one feedback message built by `feedback::FeedbackSender`
    /// (spec.md §4.8, §6.4). Feedback has its own sequence space and is
    /// not retransmit-tracked — a dropped heartbeat is superseded by the
    /// next one within 200 ms.
    pub async fn send_feedback(&self, event: FeedbackEvent) -> Result<()> {
        match event {
            FeedbackEvent::State { seq, payload } => {
                self.seal_and_send(
                    CHANNEL_FEEDBACK_STATE,
                    0,
                    seq as u32,
                    payload.to_vec(),
                    PacketKind::FeedbackState,
                )
                .await?;
            }
            FeedbackEvent::History { seq, payload } => {
                let kind = PacketKind::FeedbackHistory {
                    payload_len: payload.len(),
                };
                self.seal_and_send(CHANNEL_FEEDBACK_HISTORY, 0, seq as u32, payload, kind)
                    .await?;
            }
        }
        Ok(())
    }

    async fn send_data_ack(&self, channel: u8, tsn: u32) -> Result<()> {
        self.seal_and_send(channel, FLAG_ACK, tsn, vec![0u8; 29], PacketKind::DataAck)
            .await?;
        Ok(())
    }

    /// Resend anything the retransmit tracker says is due; surfaces
    /// exhausted TSNs (3 failed attempts) as a warning — the caller
    /// decides whether that escalates to a session failure.
    pub async fn service_retransmits(&self, now: Instant) -> Result<Vec<u32>> {
        let (due, exhausted) = self.retransmit.lock().due(now);
        for (_, datagram) in due {
            self.socket
                .send_to(&datagram, self.peer)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
        }
        for tsn in &exhausted {
            warn!(target: "rp_gateway::transport", tsn, "control message exhausted retransmit budget");
        }
        Ok(exhausted)
    }

    /// The peer acknowledged `tsn`; stop tracking it for retransmission.
    pub fn on_ack(&self, tsn: u32) {
        self.retransmit.lock().on_ack(tsn);
    }

    /// Classify an inbound datagram's packet kind from its header and
    /// payload length. Congestion (heartbeat) and DATA_ACK share the
    /// control channel with ordinary control messages and are
    /// distinguished by their fixed lengths/flags, matching the fixed
    /// `advance_by` the sender used for each.
    fn classify_inbound(header: &PacketHeader, payload_len: usize) -> PacketKind {
        if header.is_ack() && payload_len == 29 {
            return PacketKind::DataAck;
        }
        match header.channel {
            CHANNEL_CONTROL if !header.is_data() && payload_len == 15 => PacketKind::Congestion,
            CHANNEL_CONTROL | CHANNEL_STREAMINFO_ACK => PacketKind::Control { payload_len },
            CHANNEL_VIDEO | CHANNEL_AUDIO => PacketKind::Data { payload_len },
            CHANNEL_FEEDBACK_STATE => PacketKind::FeedbackState,
            CHANNEL_FEEDBACK_HISTORY => PacketKind::FeedbackHistory { payload_len },
            _ => PacketKind::Control { payload_len },
        }
    }

    /// One pass of the socket reader task (spec.md §5, role 1): receive,
    /// verify/decrypt, route by channel. Runs until the stream stops or
    /// the socket errors.
    async fn read_one(&self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = self
            .socket
            .recv(&mut buf)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        buf.truncate(len);
        self.on_datagram(&buf).await
    }

    async fn on_datagram(&self, datagram: &[u8]) -> Result<()> {
        let header = PacketHeader::decode(datagram)?;
        let mut payload = datagram[HEADER_LEN..].to_vec();
        let kind = Self::classify_inbound(&header, payload.len());

        let expected = self.keys.recv.key_pos();
        if header.key_pos != expected {
            return Err(TransportError::KeyPosGap {
                expected,
                actual: header.key_pos,
            }
            .into());
        }

        let header_bytes = PacketHeader::new(header.channel, header.flags, header.tsn, header.key_pos)
            .encode_zeroed();
        self.keys
            .recv
            .open(&header_bytes, &mut payload, &header.gmac, kind.encrypt_payload(), kind)?;

        if header.is_ack() {
            self.on_ack(header.tsn);
            return Ok(());
        }

        let result = match header.channel {
            CHANNEL_VIDEO => self.route_video(payload),
            CHANNEL_AUDIO => self.route_audio(payload),
            _ => {
                trace!(target: "rp_gateway::transport", channel = header.channel, "control/feedback datagram received");
                Ok(())
            }
        };

        // Reliable DATA messages get a DATA_ACK back on the channel they
        // arrived on (spec.md §4.5). Feedback/heartbeat are fire-and-forget.
        if header.is_data() && matches!(header.channel, CHANNEL_CONTROL | CHANNEL_VIDEO | CHANNEL_AUDIO) {
            self.send_data_ack(header.channel, header.tsn).await?;
        }
        result
    }

    fn route_video(&self, payload: Vec<u8>) -> Result<()> {
        let Some(fragment) = Fragment::decode(&payload) else {
            return Ok(());
        };
        let event = self.video.lock().insert_fragment(fragment);
        if let Some(event) = event {
            self.dispatch_video_event(event);
        }
        Ok(())
    }

    fn dispatch_video_event(&self, event: VideoDemuxEvent) {
        match event {
            VideoDemuxEvent::Unit(unit) => {
                let receivers = self.receivers.lock();
                let mut prefixed = Vec::with_capacity(unit.annex_b.len() + 1);
                prefixed.push(0x02);
                prefixed.extend_from_slice(&unit.annex_b);
                for receiver in receivers.iter() {
                    receiver.on_video_packet(&prefixed);
                }
            }
            VideoDemuxEvent::CorruptFrame { start, end } => {
                warn!(target: "rp_gateway::transport", start, end, "corrupt frame, requesting keyframe");
            }
        }
    }

    fn route_audio(&self, payload: Vec<u8>) -> Result<()> {
        let Some(fragment) = Fragment::decode(&payload) else {
            return Ok(());
        };
        if let Some(unit) = self.audio.lock().insert_fragment(fragment) {
            let receivers = self.receivers.lock();
            let mut prefixed = Vec::with_capacity(unit.bytes.len() + 1);
            prefixed.push(0x03);
            prefixed.extend_from_slice(&unit.bytes);
            for receiver in receivers.iter() {
                receiver.on_audio_packet(&prefixed);
            }
        }
        Ok(())
    }

    /// Expire any video/audio frames that have been incomplete too long
    /// (spec.md §4.7's 40 ms bound). Call periodically from the owning
    /// task's timer tick.
    pub fn expire_stale_frames(&self, now: Instant) {
        let events = self.video.lock().expire_stale(now);
        for event in events {
            self.dispatch_video_event(event);
        }
        self.audio.lock().expire_stale(now);
    }

    /// Drive the socket reader until the stream stops (spec.md §5, role
    /// 1). Intended to run as its own task.
    pub async fn run_reader(self: Arc<Self>) {
        while self.is_running() {
            if let Err(err) = self.read_one().await {
                warn!(target: "rp_gateway::transport", error = %err, "socket reader error");
            }
        }
    }

    /// Drive the 1 Hz heartbeat and retransmit service loop (spec.md §5).
    pub async fn run_maintenance(self: Arc<Self>) {
        let mut ticker = time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            if let Err(err) = self.send_heartbeat().await {
                warn!(target: "rp_gateway::transport", error = %err, "heartbeat send failed");
            }
            let _ = self.service_retransmits(Instant::now()).await;
            self.expire_stale_frames(Instant::now());
        }
    }

    /// Client or server `DISCONNECT`: transition to `Stopping`, notify
    /// every receiver exactly once, then mark `Stopped` (spec.md §4.5).
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if *state != RunState::Running {
                return;
            }
            *state = RunState::Stopping;
        }
        if !self.disconnect_notified.swap(true, Ordering::SeqCst) {
            for receiver in self.receivers.lock().iter() {
                receiver.on_disconnect();
            }
        }
        *self.state.lock() = RunState::Stopped;
    }
}
