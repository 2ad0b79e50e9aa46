//! WebRTC receiver adapter (spec.md §4.10): the one `demux::AvReceiver`
//! implementation this crate ships. Feeds assembled video units into the
//! RTP pipeline and forwards the pipeline's backpressure-driven keyframe
//! requests back to the transport core over a one-way channel (spec.md
//! §9: break the receiver↔stream cycle with message passing, never a
//! shared back-reference).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::Codec;
use crate::demux::{AvReceiver, StreamInfoHeader};
use crate::rtp_pipeline::{QueuedFrame, RtpSink, VideoPipeline};
use crate::transport::RpStream;

/// Implements `IAVReceiver` (spec.md §6.6) by packetizing video onto an
/// owned `VideoPipeline`. Audio is forwarded to the sink directly —
/// decoding/rendering is out of scope (spec.md §1) and audio carries no
/// IDR/fragmentation concept, so no queue discipline is needed for it.
pub struct WebRtcReceiverAdapter {
    pipeline: Arc<VideoPipeline>,
    sink: Arc<dyn RtpSink>,
    video_codec: Mutex<Codec>,
    waiting_for_idr: AtomicBool,
    disposed: AtomicBool,
    next_frame_index: std::sync::atomic::AtomicU32,
    audio_payload_type: u8,
}

/// Default audio RTP payload type (spec.md §4.9 only names video
/// defaults; opus/aac negotiation is an external collaborator's concern,
/// so this is a placeholder until the sink's SDP negotiation overrides it).
const AUDIO_PAYLOAD_TYPE_DEFAULT: u8 = 111;

impl WebRtcReceiverAdapter {
    /// Builds the adapter plus the keyframe-request receiver the caller
    /// should forward into `RpStream::send_keyframe_request` (typically
    /// via `forward_keyframe_requests`).
    pub fn new(
        sink: Arc<dyn RtpSink>,
        mtu: usize,
        initial_codec: Codec,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (pipeline, keyframe_rx) = VideoPipeline::new(sink.clone(), mtu);
        let adapter = Arc::new(Self {
            pipeline,
            sink,
            video_codec: Mutex::new(initial_codec),
            waiting_for_idr: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            next_frame_index: std::sync::atomic::AtomicU32::new(0),
            audio_payload_type: AUDIO_PAYLOAD_TYPE_DEFAULT,
        });
        (adapter, keyframe_rx)
    }

    /// Spawns the RTP pipeline's single worker task. Call once after
    /// construction.
    pub fn spawn_pipeline_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let codec = *self.video_codec.lock();
        tokio::spawn(pipeline.run(codec))
    }

    fn codec(&self) -> Codec {
        *self.video_codec.lock()
    }
}

impl AvReceiver for WebRtcReceiverAdapter {
    fn on_stream_info(&self, video_header: &StreamInfoHeader, _audio_header: &StreamInfoHeader) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if !video_header.parameter_sets.is_empty() {
            self.waiting_for_idr.store(true, Ordering::SeqCst);
        }
    }

    fn on_video_packet(&self, bytes: &[u8]) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        // spec.md §6.6: one byte type prefix (0x02=video) + Annex-B unit.
        let Some((&0x02, annex_b)) = bytes.split_first() else {
            return;
        };
        let codec = self.codec();
        let idr = crate::demux::is_idr(codec, annex_b);

        if self.waiting_for_idr.load(Ordering::SeqCst) {
            if !idr {
                return; // discarded until the first IDR (spec.md §4.10)
            }
            self.waiting_for_idr.store(false, Ordering::SeqCst);
        }

        let frame_index = self.next_frame_index.fetch_add(1, Ordering::SeqCst);
        self.pipeline.enqueue(QueuedFrame {
            frame_index,
            idr,
            codec,
            annex_b: annex_b.to_vec(),
        });
    }

    fn on_audio_packet(&self, bytes: &[u8]) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Some((&0x03, frame)) = bytes.split_first() else {
            return;
        };
        let sink = self.sink.clone();
        let payload_type = self.audio_payload_type;
        let frame = frame.to_vec();
        tokio::spawn(async move {
            if !sink.send_frame(payload_type, false, 0, &frame).await {
                warn!(target: "rp_gateway::webrtc_adapter", "audio frame send failed");
            }
        });
    }

    fn set_video_codec(&self, codec: &str) {
        let parsed = match codec {
            "hevc" => Codec::Hevc,
            _ => Codec::Avc,
        };
        *self.video_codec.lock() = parsed;
    }

    fn set_audio_codec(&self, _codec: &str) {
        // Opaque to this crate (spec.md §1: decoding/rendering out of
        // scope); the codec name only matters to the browser's decoder.
    }

    fn enter_wait_for_idr(&self) {
        self.waiting_for_idr.store(true, Ordering::SeqCst);
    }

    fn on_disconnect(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.pipeline.shutdown();
    }
}

/// Forwards the pipeline's keyframe-request signal into the transport
/// core (spec.md §4.10: "Exposes an `OnKeyframeRequested` signal consumed
/// by the transport core"). Runs until the channel closes (the adapter
/// was disposed and dropped).
pub async fn forward_keyframe_requests(stream: Arc<RpStream>, mut rx: mpsc::UnboundedReceiver<()>) {
    while rx.recv().await.is_some() {
        if let Err(err) = stream.send_keyframe_request().await {
            warn!(target: "rp_gateway::webrtc_adapter", error = %err, "keyframe request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct RecordingSink {
        frames: Mutex<Vec<Vec<u8>>>,
        raws: AtomicUsize,
    }

    #[async_trait]
    impl RtpSink for RecordingSink {
        async fn send_frame(&self, _pt: u8, _marker: bool, _ts: u32, payload: &[u8]) -> bool {
            self.frames.lock().push(payload.to_vec());
            true
        }
        async fn send_rtp_raw(
            &self,
            _pt: u8,
            _marker: bool,
            _ts: u32,
            _seq: u16,
            _payload: &[u8],
        ) -> bool {
            self.raws.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn idr_annex_b() -> Vec<u8> {
        vec![0, 0, 0, 1, 0x65, 1, 2, 3]
    }

    fn non_idr_annex_b() -> Vec<u8> {
        vec![0, 0, 0, 1, 0x41, 1, 2, 3]
    }

    #[tokio::test]
    async fn discards_until_first_idr() {
        let sink = Arc::new(RecordingSink {
            frames: Mutex::new(Vec::new()),
            raws: AtomicUsize::new(0),
        });
        let (adapter, _keyframe_rx) = WebRtcReceiverAdapter::new(sink.clone(), 1200, Codec::Avc);
        adapter.spawn_pipeline_worker();

        let mut prefixed_non_idr = vec![0x02];
        prefixed_non_idr.extend_from_slice(&non_idr_annex_b());
        adapter.on_video_packet(&prefixed_non_idr);

        let mut prefixed_idr = vec![0x02];
        prefixed_idr.extend_from_slice(&idr_annex_b());
        adapter.on_video_packet(&prefixed_idr);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(sink.raws.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_stops_further_enqueues() {
        let sink = Arc::new(RecordingSink {
            frames: Mutex::new(Vec::new()),
            raws: AtomicUsize::new(0),
        });
        let (adapter, _keyframe_rx) = WebRtcReceiverAdapter::new(sink.clone(), 1200, Codec::Avc);
        adapter.on_disconnect();

        let mut prefixed_idr = vec![0x02];
        prefixed_idr.extend_from_slice(&idr_annex_b());
        adapter.on_video_packet(&prefixed_idr);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sink.raws.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn set_video_codec_parses_known_names() {
        let sink = Arc::new(RecordingSink {
            frames: Mutex::new(Vec::new()),
            raws: AtomicUsize::new(0),
        });
        let (adapter, _keyframe_rx) = WebRtcReceiverAdapter::new(sink, 1200, Codec::Avc);
        adapter.set_video_codec("hevc");
        assert_eq!(adapter.codec(), Codec::Hevc);
        adapter.set_video_codec("h264");
        assert_eq!(adapter.codec(), Codec::Avc);
    }
}
