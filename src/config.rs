//! Gateway configuration (SPEC_FULL.md §2: a `GatewayConfig` loaded via
//! the `config` crate, layered defaults/device/user, matching spec.md
//! §4.3's "resolve effective SessionStartOptions from (user-defaults,
//! device-defaults, defaults-table)").

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Video codec negotiated for a session (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Avc,
    Hevc,
}

/// Immutable per-session streaming parameters (spec.md §3:
/// "SessionStartOptions ... Immutable per session").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub quality_tier: u8,
    pub bitrate_kbps: u32,
    pub codec: Codec,
    pub hdr: bool,
    pub audio_channels: String,
    pub rtt_hint_ms: u32,
    pub mtu_hint: u32,
    pub language: String,
    pub accept_button: String,
    pub controllers: Vec<String>,
}

impl SessionStartOptions {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidResolution {
                width: self.width,
                height: self.height,
            }
            .into());
        }
        if self.bitrate_kbps == 0 {
            return Err(ConfigError::InvalidBitrate(self.bitrate_kbps).into());
        }
        Ok(())
    }
}

/// A sparse layer of `SessionStartOptions` overrides: `None` fields fall
/// through to the next-lower-priority layer when resolving effective
/// options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOptionsOverlay {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub quality_tier: Option<u8>,
    pub bitrate_kbps: Option<u32>,
    pub codec: Option<Codec>,
    pub hdr: Option<bool>,
    pub audio_channels: Option<String>,
    pub rtt_hint_ms: Option<u32>,
    pub mtu_hint: Option<u32>,
    pub language: Option<String>,
    pub accept_button: Option<String>,
    pub controllers: Option<Vec<String>>,
}

impl SessionOptionsOverlay {
    fn apply_onto(&self, base: SessionStartOptions) -> SessionStartOptions {
        SessionStartOptions {
            width: self.width.unwrap_or(base.width),
            height: self.height.unwrap_or(base.height),
            fps: self.fps.unwrap_or(base.fps),
            quality_tier: self.quality_tier.unwrap_or(base.quality_tier),
            bitrate_kbps: self.bitrate_kbps.unwrap_or(base.bitrate_kbps),
            codec: self.codec.unwrap_or(base.codec),
            hdr: self.hdr.unwrap_or(base.hdr),
            audio_channels: self
                .audio_channels
                .clone()
                .unwrap_or(base.audio_channels),
            rtt_hint_ms: self.rtt_hint_ms.unwrap_or(base.rtt_hint_ms),
            mtu_hint: self.mtu_hint.unwrap_or(base.mtu_hint),
            language: self.language.clone().unwrap_or(base.language),
            accept_button: self.accept_button.clone().unwrap_or(base.accept_button),
            controllers: self.controllers.clone().unwrap_or(base.controllers),
        }
    }
}

/// The full gateway configuration: a crate-wide default table plus
/// optional per-device and per-user overlays, loaded through the
/// `config` crate's layered `Config` builder so the same `GatewayConfig`
/// can be assembled from a file, environment variables, or both.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    defaults_table: SessionStartOptions,
}

impl GatewayConfig {
    pub fn from_defaults(defaults_table: SessionStartOptions) -> Self {
        Self { defaults_table }
    }

    /// Load layered configuration from `path` (if present) merged over
    /// built-in defaults, via the `config` crate.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let base = config::Config::try_from(&default_options_table())
            .map_err(config_load_failed)?;
        let mut builder = config::Config::builder().add_source(base);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let resolved = builder.build().map_err(config_load_failed)?;
        let defaults_table: SessionStartOptions =
            resolved.try_deserialize().map_err(config_load_failed)?;
        Ok(Self { defaults_table })
    }

    /// Resolve effective `SessionStartOptions` as `defaults_table`
    /// overridden field-by-field by `device_overlay`, then by
    /// `user_overlay` (spec.md §4.3).
    pub fn resolve(
        &self,
        device_overlay: &SessionOptionsOverlay,
        user_overlay: &SessionOptionsOverlay,
    ) -> Result<SessionStartOptions> {
        let with_device = device_overlay.apply_onto(self.defaults_table.clone());
        let effective = user_overlay.apply_onto(with_device);
        effective.validate()?;
        Ok(effective)
    }
}

fn default_options_table() -> SessionStartOptions {
    SessionStartOptions {
        width: 1280,
        height: 720,
        fps: 30,
        quality_tier: 1,
        bitrate_kbps: 10_000,
        codec: Codec::Avc,
        hdr: false,
        audio_channels: "stereo".to_string(),
        rtt_hint_ms: 30,
        mtu_hint: 1454,
        language: "en".to_string(),
        accept_button: "X".to_string(),
        controllers: vec!["xinput".to_string()],
    }
}

/// `ConfigError` doesn't carry the `config` crate's error type (callers
/// match on our own enum, not an external one); log the original and
/// fold it into the one variant that fits.
fn config_load_failed(source: config::ConfigError) -> crate::error::GatewayError {
    tracing::warn!(error = %source, "configuration load failed");
    ConfigError::InvalidBitrate(0).into()
}
