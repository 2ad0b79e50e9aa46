//! The DDP text wire format (spec.md §6.1): `\n`-terminated lines, a
//! status line matching `HTTP/1.1 <code> <status>`, and `key:value` lines.

use std::collections::HashMap;

pub const PORT_PS5: u16 = 9302;
pub const PORT_PS4: u16 = 987;

/// A parsed `SRCH`/`WAKEUP` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub host_name: Option<String>,
    pub host_id: Option<String>,
    pub host_type: Option<String>,
    pub system_version: Option<String>,
    pub status: Option<String>,
}

impl DdpResponse {
    pub fn is_online(&self) -> bool {
        self.status.as_deref() == Some("OK")
    }

    pub fn is_standby(&self) -> bool {
        self.status.as_deref() == Some("STANDBY")
    }
}

/// Parse a DDP response. Returns `None` if the status line doesn't match
/// `HTTP/1.1\s+<code>\s+<status>`.
pub fn parse_response(text: &str) -> Option<DdpResponse> {
    let mut lines = text.split('\n').filter(|l| !l.is_empty());
    let status_line = lines.next()?;
    let mut parts = status_line.splitn(3, ' ');
    let proto = parts.next()?;
    if !proto.starts_with("HTTP/1.1") {
        return None;
    }
    let status_code: u16 = parts.next()?.trim().parse().ok()?;
    let status_text = parts.next().unwrap_or("").trim().to_string();

    let mut fields: HashMap<String, String> = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Some(DdpResponse {
        status_code,
        status_text,
        host_name: fields.remove("host-name"),
        host_id: fields.remove("host-id"),
        host_type: fields.remove("host-type"),
        system_version: fields.remove("system-version"),
        status: fields.remove("status"),
    })
}
