//! Session control (spec.md §4.3): resolves effective start options,
//! enforces at most one active session per host per user, and drives the
//! `RemoteSession` lifecycle.

mod state;

pub use state::{SessionLifecycle, SessionState};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::{Codec, GatewayConfig, SessionOptionsOverlay, SessionStartOptions};
use crate::error::{GatewayError, Result};
use crate::registration::DeviceStore;

/// `StartOptions` resolved down to what actually gets negotiated with
/// the console (spec.md §3: "LaunchOptions (effective codec/bitrate)").
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub codec: Codec,
    pub bitrate_kbps: u32,
}

impl From<&SessionStartOptions> for LaunchOptions {
    fn from(opts: &SessionStartOptions) -> Self {
        Self {
            codec: opts.codec,
            bitrate_kbps: opts.bitrate_kbps,
        }
    }
}

/// Options passed by a caller asking to start a session; overlays sit on
/// top of the gateway's defaults table (spec.md §4.3).
pub struct SessionStartRequest<'a> {
    pub host_id: &'a str,
    pub user_id: &'a str,
    pub host_ip: std::net::IpAddr,
    pub device_overlay: SessionOptionsOverlay,
    pub user_overlay: SessionOptionsOverlay,
}

/// One Remote Play session: identity, the resolved options, and the
/// lifecycle state machine. Exclusively owns its `Stream` once one
/// exists (spec.md §3 ownership note) — the stream itself is wired in by
/// `transport`/`handshake` once the handshake completes.
pub struct RemoteSession {
    pub session_id: Uuid,
    pub host_id: String,
    pub host_ip: std::net::IpAddr,
    pub start_options: SessionStartOptions,
    pub launch_options: LaunchOptions,
    pub created_at: SystemTime,
    state: Mutex<SessionState>,
}

impl RemoteSession {
    pub fn lifecycle(&self) -> SessionLifecycle {
        self.state.lock().lifecycle()
    }

    pub fn transition(&self, to: SessionLifecycle) -> Result<()> {
        let mut state = self.state.lock();
        *state = state.transition(to)?;
        Ok(())
    }

    pub fn fail(&self, reason: String) {
        let mut state = self.state.lock();
        *state = state.fail(reason);
    }
}

/// Key a session is deduplicated on: at most one active session per
/// host per user (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    host_id: String,
    user_id: String,
}

/// Tracks active sessions and resolves effective start options from the
/// layered config.
pub struct SessionManager {
    config: GatewayConfig,
    active: Mutex<HashMap<SessionKey, Arc<RemoteSession>>>,
}

impl SessionManager {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or return the existing) session for `(host_id, user_id)`.
    /// Fails with `DeviceNotFound`/`NotRegistered` if `device_store` has
    /// no record for `host_id`.
    pub fn start(
        &self,
        request: SessionStartRequest<'_>,
        device_store: &DeviceStore,
    ) -> Result<Arc<RemoteSession>> {
        let key = SessionKey {
            host_id: request.host_id.to_string(),
            user_id: request.user_id.to_string(),
        };

        let mut active = self.active.lock();
        if let Some(existing) = active.get(&key) {
            return Ok(Arc::clone(existing));
        }

        if device_store.get(request.host_id).is_none() {
            return Err(GatewayError::NotRegistered);
        }

        let start_options = self
            .config
            .resolve(&request.device_overlay, &request.user_overlay)?;
        let launch_options = LaunchOptions::from(&start_options);

        let session = Arc::new(RemoteSession {
            session_id: Uuid::new_v4(),
            host_id: request.host_id.to_string(),
            host_ip: request.host_ip,
            start_options,
            launch_options,
            created_at: SystemTime::now(),
            state: Mutex::new(SessionState::new()),
        });
        active.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Remove a session from the active table once it reaches `Stopped`.
    pub fn retire(&self, host_id: &str, user_id: &str) {
        let key = SessionKey {
            host_id: host_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.active.lock().remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOptionsOverlay;
    use crate::registration::{DeviceRecord, DeviceStore};

    fn device_store_with(host_id: &str) -> DeviceStore {
        let dir = std::env::temp_dir().join(format!(
            "rp-gateway-session-test-{}-{}",
            std::process::id(),
            host_id
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("devices.json");
        let _ = std::fs::remove_file(&path);
        let mut store = DeviceStore::open(&path).unwrap();
        store
            .put(DeviceRecord {
                host_id: host_id.to_string(),
                rp_key: "deadbeef".to_string(),
                rp_key_type: 0,
                regist_key: "313233".to_string(),
                mac: "00:11:22:33:44:55".to_string(),
                ap_bssid: "aa:bb:cc:dd:ee:ff".to_string(),
            })
            .unwrap();
        store
    }

    fn manager() -> SessionManager {
        SessionManager::new(GatewayConfig::from_defaults(SessionStartOptions {
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
        }))
    }

    #[test]
    fn duplicate_start_returns_the_existing_session() {
        let mgr = manager();
        let store = device_store_with("host-1");
        let req = || SessionStartRequest {
            host_id: "host-1",
            user_id: "user-1",
            host_ip: "127.0.0.1".parse().unwrap(),
            device_overlay: SessionOptionsOverlay::default(),
            user_overlay: SessionOptionsOverlay::default(),
        };
        let a = mgr.start(req(), &store).unwrap();
        let b = mgr.start(req(), &store).unwrap();
        assert_eq!(a.session_id, b.session_id);
    }

    #[test]
    fn unregistered_host_fails() {
        let mgr = manager();
        let store = device_store_with("host-other");
        let result = mgr.start(
            SessionStartRequest {
                host_id: "host-unknown",
                user_id: "user-1",
                host_ip: "127.0.0.1".parse().unwrap(),
                device_overlay: SessionOptionsOverlay::default(),
                user_overlay: SessionOptionsOverlay::default(),
            },
            &store,
        );
        assert!(matches!(result, Err(GatewayError::NotRegistered)));
    }
}
