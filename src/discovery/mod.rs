//! Discovery/wake-up (spec.md §4.1, §6.1): UDP broadcast DDP text protocol,
//! per-NIC iteration, and a grace-period host status tracker.

mod ddp;
mod status;
mod wakeup;

pub use ddp::{parse_response, DdpResponse, PORT_PS4, PORT_PS5};
pub use status::{HostId, HostStatus, StatusService};
pub use wakeup::encode_user_credential;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::error::{Result, TransportError};

const SEARCH_REQUEST: &str = "SRCH * HTTP/1.1\ndevice-discovery-protocol-version:00030010\n";

/// One console discovered by a broadcast scan.
#[derive(Debug, Clone)]
pub struct DiscoveredHost {
    pub addr: IpAddr,
    pub response: DdpResponse,
}

/// Broadcasts `SRCH` across every active non-virtual IPv4 interface and
/// collects replies until `timeout` elapses. A NIC whose broadcast send
/// fails is skipped rather than aborting the whole scan (spec.md §4.1:
/// "per-NIC errors isolated").
pub async fn discover(port: u16, timeout: Duration) -> Result<Vec<DiscoveredHost>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    socket
        .set_broadcast(true)
        .map_err(|e| TransportError::Io(e.to_string()))?;

    for iface in if_addrs::get_if_addrs().unwrap_or_default() {
        if iface.is_loopback() {
            continue;
        }
        let IpAddr::V4(ip) = iface.ip() else {
            continue;
        };
        let broadcast = match iface.addr {
            if_addrs::IfAddr::V4(v4) => v4.broadcast,
            _ => None,
        };
        let Some(broadcast) = broadcast else {
            continue;
        };
        let dest = SocketAddr::new(IpAddr::V4(broadcast), port);
        if let Err(e) = socket.send_to(SEARCH_REQUEST.as_bytes(), dest).await {
            warn!(nic = %ip, error = %e, "discovery broadcast failed on interface");
        }
    }

    let mut hosts = Vec::new();
    let mut buf = [0u8; 2048];
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => {
                if let Ok(text) = std::str::from_utf8(&buf[..n]) {
                    if let Some(response) = parse_response(text) {
                        hosts.push(DiscoveredHost {
                            addr: from.ip(),
                            response,
                        });
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "discovery recv error");
                break;
            }
            Err(_) => break,
        }
    }
    Ok(hosts)
}
