//! Atomic on-disk persistence for bound device records (SPEC_FULL.md §3:
//! "`DeviceRecord` persists to a single JSON file per gateway instance
//! ... written atomically").

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};
use crate::registration::DeviceRecord;

pub struct DeviceStore {
    path: PathBuf,
    records: HashMap<String, DeviceRecord>,
}

impl DeviceStore {
    /// Load `devices.json` at `path` if it exists, otherwise start empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| TransportError::Io(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| TransportError::Io(e.to_string()))?
        } else {
            HashMap::new()
        };
        Ok(Self { path, records })
    }

    pub fn get(&self, host_id: &str) -> Option<&DeviceRecord> {
        self.records.get(host_id)
    }

    /// Insert or replace a record and persist the whole table via
    /// write-to-temp-file-then-rename, so a crash mid-write never leaves
    /// `devices.json` truncated or partially written.
    pub fn put(&mut self, record: DeviceRecord) -> Result<()> {
        self.records.insert(record.host_id.clone(), record);
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        let serialized =
            serde_json::to_vec_pretty(&self.records).map_err(|e| TransportError::Io(e.to_string()))?;
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, &serialized).map_err(|e| TransportError::Io(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::DeviceRecord;

    fn sample(host_id: &str) -> DeviceRecord {
        DeviceRecord {
            host_id: host_id.to_string(),
            rp_key: "deadbeef".to_string(),
            rp_key_type: 0,
            regist_key: "313233".to_string(),
            mac: "00:11:22:33:44:55".to_string(),
            ap_bssid: "aa:bb:cc:dd:ee:ff".to_string(),
        }
    }

    #[test]
    fn put_then_reopen_round_trips() {
        let dir = std::env::temp_dir().join(format!("rp-gateway-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("devices.json");
        let _ = fs::remove_file(&path);

        let mut store = DeviceStore::open(&path).unwrap();
        store.put(sample("host-1")).unwrap();
        drop(store);

        let reopened = DeviceStore::open(&path).unwrap();
        assert_eq!(reopened.get("host-1"), Some(&sample("host-1")));

        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(&dir);
    }
}
