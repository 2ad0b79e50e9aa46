//! The A/V receiver contract (spec.md §6.6, §9): "model as a trait over
//! a fixed capability set `{on_stream_info, on_video, on_audio,
//! on_disconnect}`; store as a list of owned handles; never invoke
//! under a lock." Transport holds a list of these; the WebRTC adapter
//! (`webrtc_adapter`) is the one implementation this crate ships.
//!
//! Callers MUST treat every method as non-blocking (spec.md §5: "receiver
//! callbacks MUST be non-blocking, bounded by ≤ 1 ms of CPU work;
//! anything heavier ... MUST hop onto the receiver's own queue").

/// Parameter sets handed to a receiver once `STREAMINFO` arrives
/// (spec.md §6.6: "parameter sets (SPS/PPS/VPS)").
#[derive(Debug, Clone, Default)]
pub struct StreamInfoHeader {
    pub parameter_sets: Vec<Vec<u8>>,
}

pub trait AvReceiver: Send + Sync {
    fn on_stream_info(&self, video_header: &StreamInfoHeader, audio_header: &StreamInfoHeader);

    /// One Annex-B video unit, type-prefixed with `0x02` (spec.md §6.6).
    fn on_video_packet(&self, bytes: &[u8]);

    /// One codec audio frame, type-prefixed with `0x03` (spec.md §6.6).
    fn on_audio_packet(&self, bytes: &[u8]);

    fn set_video_codec(&self, codec: &str);

    fn set_audio_codec(&self, codec: &str);

    /// Discard packets until the next IDR (spec.md §4.10, §6.6).
    fn enter_wait_for_idr(&self);

    /// The transport or peer connection is tearing down; this is called
    /// exactly once per receiver (spec.md §7: "invoke `OnDisconnect` on
    /// all receivers once").
    fn on_disconnect(&self);
}
