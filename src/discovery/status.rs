//! Host status inference from repeated discovery scans (spec.md §4.1:
//! "per-host absent after N broadcasts → STANDBY/OFFLINE inference by the
//! status service, grace period N scans before flipping OFFLINE").

use std::collections::HashMap;

pub type HostId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Online,
    Standby,
    Offline,
}

struct Tracked {
    status: HostStatus,
    missed_scans: u32,
}

/// Tracks, per `HostId`, how many consecutive scans have gone by without
/// a reply before downgrading a host to `Standby`/`Offline`.
pub struct StatusService {
    grace_scans: u32,
    hosts: HashMap<HostId, Tracked>,
}

impl StatusService {
    pub fn new(grace_scans: u32) -> Self {
        Self {
            grace_scans: grace_scans.max(1),
            hosts: HashMap::new(),
        }
    }

    /// Record a reply seen in the current scan: resets the miss counter
    /// and sets status from the reply's own `OK`/`STANDBY` field.
    pub fn observe_reply(&mut self, host_id: HostId, online: bool) {
        let status = if online {
            HostStatus::Online
        } else {
            HostStatus::Standby
        };
        self.hosts.insert(
            host_id,
            Tracked {
                status,
                missed_scans: 0,
            },
        );
    }

    /// Call once per completed scan with the set of host ids that
    /// replied this round; every tracked host absent from `seen` has its
    /// miss counter incremented, flipping to `Offline` once it exceeds
    /// the grace period.
    pub fn tick(&mut self, seen: &[HostId]) {
        for (host_id, tracked) in self.hosts.iter_mut() {
            if seen.iter().any(|id| id == host_id) {
                continue;
            }
            tracked.missed_scans += 1;
            if tracked.missed_scans >= self.grace_scans {
                tracked.status = HostStatus::Offline;
            }
        }
    }

    pub fn status(&self, host_id: &str) -> Option<HostStatus> {
        self.hosts.get(host_id).map(|t| t.status)
    }
}
