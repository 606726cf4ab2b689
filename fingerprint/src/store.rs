//! Fingerprint Store
//!
//! One fingerprint per room. Uploading replaces whatever was stored
//! before as a whole, so readers never observe a half-written profile.

use crate::{FingerprintError, FingerprintSummary, Result, RoomFingerprint};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Current on-disk document version
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Persistence for trained rooms
pub trait FingerprintStore: Send + Sync {
    /// Store `fingerprint` under `room_id`, replacing any previous one
    fn upload(&self, room_id: &str, fingerprint: &RoomFingerprint) -> Result<()>;

    /// Fingerprint for `room_id`, if one has been trained
    fn get(&self, room_id: &str) -> Result<Option<RoomFingerprint>>;

    /// Summaries of every stored room, most recently trained first
    fn list(&self) -> Result<Vec<FingerprintSummary>>;

    /// Remove the fingerprint for `room_id`
    fn delete(&self, room_id: &str) -> Result<()>;
}

fn check_upload(room_id: &str, fingerprint: &RoomFingerprint) -> Result<()> {
    if room_id.trim().is_empty() {
        return Err(FingerprintError::MissingRoomId);
    }
    if fingerprint.room_id != room_id {
        return Err(FingerprintError::Store(format!(
            "fingerprint is for room '{}', not '{}'",
            fingerprint.room_id, room_id
        )));
    }
    fingerprint.validate()
}

fn summarize<'a>(fingerprints: impl Iterator<Item = &'a RoomFingerprint>) -> Vec<FingerprintSummary> {
    let mut summaries: Vec<FingerprintSummary> = fingerprints.map(RoomFingerprint::summary).collect();
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.room_id.cmp(&b.room_id)));
    summaries
}

fn poisoned<T>(_: T) -> FingerprintError {
    FingerprintError::Store("store lock poisoned".to_string())
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, RoomFingerprint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FingerprintStore for MemoryStore {
    fn upload(&self, room_id: &str, fingerprint: &RoomFingerprint) -> Result<()> {
        check_upload(room_id, fingerprint)?;
        self.rooms
            .write()
            .map_err(poisoned)?
            .insert(room_id.to_string(), fingerprint.clone());
        Ok(())
    }

    fn get(&self, room_id: &str) -> Result<Option<RoomFingerprint>> {
        Ok(self.rooms.read().map_err(poisoned)?.get(room_id).cloned())
    }

    fn list(&self) -> Result<Vec<FingerprintSummary>> {
        Ok(summarize(self.rooms.read().map_err(poisoned)?.values()))
    }

    fn delete(&self, room_id: &str) -> Result<()> {
        match self.rooms.write().map_err(poisoned)?.remove(room_id) {
            Some(_) => Ok(()),
            None => Err(FingerprintError::FingerprintNotFound(room_id.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    fingerprints: Vec<RoomFingerprint>,
}

/// Store backed by a single JSON document
///
/// The trainer and the CLI may have the same document open at once, so
/// nothing is cached: reads parse the file, and every change re-reads it
/// under an exclusive lock on a sibling `.lock` file, applies the one
/// change, then writes a temp file and renames it over the document. A
/// failed write leaves the document as it was.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories as needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)
                    .map_err(|e| FingerprintError::Store(format!("Failed to create directory: {}", e)))?;
            }
        }

        let store = Self {
            path: path.to_path_buf(),
            lock_path: path.with_extension("json.lock"),
        };
        let rooms = store.load()?;
        tracing::info!("Opened fingerprint store {:?} ({} rooms)", path, rooms.len());

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents of the document; a missing file is an empty store
    fn load(&self) -> Result<HashMap<String, RoomFingerprint>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(FingerprintError::Store(format!("Failed to read {:?}: {}", self.path, e))),
        };

        let document: StoreDocument = serde_json::from_str(&content)
            .map_err(|e| FingerprintError::Store(format!("Failed to parse {:?}: {}", self.path, e)))?;
        if document.version > STORE_FORMAT_VERSION {
            return Err(FingerprintError::Store(format!(
                "{:?} has format version {}, newest supported is {}",
                self.path, document.version, STORE_FORMAT_VERSION
            )));
        }

        Ok(document
            .fingerprints
            .into_iter()
            .map(|fp| (fp.room_id.clone(), fp))
            .collect())
    }

    /// Exclusive lock over the document, held until the file is dropped
    fn lock(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| FingerprintError::Store(format!("Failed to open {:?}: {}", self.lock_path, e)))?;
        file.lock_exclusive()
            .map_err(|e| FingerprintError::Store(format!("Failed to lock {:?}: {}", self.lock_path, e)))?;
        Ok(file)
    }

    /// Re-read the document, apply `change` and write it back, all under the lock
    fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, RoomFingerprint>) -> Result<()>,
    {
        let _lock = self.lock()?;
        let mut rooms = self.load()?;
        change(&mut rooms)?;
        self.persist(&rooms)
    }

    fn persist(&self, rooms: &HashMap<String, RoomFingerprint>) -> Result<()> {
        let mut fingerprints: Vec<RoomFingerprint> = rooms.values().cloned().collect();
        fingerprints.sort_by(|a, b| a.room_id.cmp(&b.room_id));

        let json = serde_json::to_string_pretty(&StoreDocument {
            version: STORE_FORMAT_VERSION,
            fingerprints,
        })
        .map_err(|e| FingerprintError::Store(format!("Failed to serialize store: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| FingerprintError::Store(format!("Failed to write {:?}: {}", tmp, e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| FingerprintError::Store(format!("Failed to replace {:?}: {}", self.path, e)))?;
        Ok(())
    }
}

impl FingerprintStore for JsonFileStore {
    fn upload(&self, room_id: &str, fingerprint: &RoomFingerprint) -> Result<()> {
        check_upload(room_id, fingerprint)?;

        self.modify(|rooms| {
            rooms.insert(room_id.to_string(), fingerprint.clone());
            Ok(())
        })?;

        tracing::debug!("Stored fingerprint for {} in {:?}", room_id, self.path);
        Ok(())
    }

    fn get(&self, room_id: &str) -> Result<Option<RoomFingerprint>> {
        Ok(self.load()?.remove(room_id))
    }

    fn list(&self) -> Result<Vec<FingerprintSummary>> {
        Ok(summarize(self.load()?.values()))
    }

    fn delete(&self, room_id: &str) -> Result<()> {
        self.modify(|rooms| match rooms.remove(room_id) {
            Some(_) => Ok(()),
            None => Err(FingerprintError::FingerprintNotFound(room_id.to_string())),
        })?;

        tracing::info!("Deleted fingerprint for {}", room_id);
        Ok(())
    }
}

/// Read a single fingerprint exported to a file
///
/// Accepts either the fingerprint document itself or an envelope of
/// the form `{"roomId": ..., "fingerprint": {...}}`, in which case the
/// envelope's room ID fills in a missing one on the inner document.
pub fn read_fingerprint_file(path: &Path) -> Result<RoomFingerprint> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FingerprintError::Store(format!("Failed to read {:?}: {}", path, e)))?;
    parse_fingerprint(&content).map_err(|e| match e {
        FingerprintError::Store(msg) => FingerprintError::Store(format!("{:?}: {}", path, msg)),
        other => other,
    })
}

/// Parse a fingerprint document or envelope
pub fn parse_fingerprint(content: &str) -> Result<RoomFingerprint> {
    let mut value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| FingerprintError::Store(e.to_string()))?;

    if let Some(inner) = value.get_mut("fingerprint").map(serde_json::Value::take) {
        let room_id = value.get("roomId").cloned();
        value = inner;
        if let (Some(room_id), Some(obj)) = (room_id, value.as_object_mut()) {
            obj.entry("roomId").or_insert(room_id);
        }
    }

    let fingerprint: RoomFingerprint =
        serde_json::from_value(value).map_err(|e| FingerprintError::Store(e.to_string()))?;
    fingerprint.validate()?;
    Ok(fingerprint)
}

/// Write one fingerprint as a standalone JSON document
pub fn write_fingerprint_file(path: &Path, fingerprint: &RoomFingerprint) -> Result<()> {
    let json = serde_json::to_string_pretty(fingerprint)
        .map_err(|e| FingerprintError::Store(format!("Failed to serialize fingerprint: {}", e)))?;
    std::fs::write(path, json).map_err(|e| FingerprintError::Store(format!("Failed to write {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FingerprintStats, Position};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn fingerprint(room_id: &str, avg_rssi: i32) -> RoomFingerprint {
        RoomFingerprint {
            room_id: room_id.to_string(),
            ssid: "College-WiFi".to_string(),
            gateway: None,
            bssid_list: vec!["aa:bb:cc:dd:ee:01".to_string(), "aa:bb:cc:dd:ee:02".to_string()],
            stats: FingerprintStats {
                avg_rssi,
                min_rssi: avg_rssi - 20,
                variance: 25.0,
                std_dev: 5.0,
                sample_count: 21,
                trained_positions: Position::ALL.to_vec(),
            },
            ap_profile: BTreeMap::new(),
            trained_at: Utc::now(),
            trained_by: "Faculty".to_string(),
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("roomprint-store-{}-{}", name, std::process::id()))
            .join("fingerprints.json")
    }

    #[test]
    fn upload_replaces_previous_fingerprint() {
        let store = MemoryStore::new();
        store.upload("LAB 1", &fingerprint("LAB 1", -50)).unwrap();
        store.upload("LAB 1", &fingerprint("LAB 1", -60)).unwrap();

        let stored = store.get("LAB 1").unwrap().unwrap();
        assert_eq!(stored.stats.avg_rssi, -60);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn upload_rejects_mismatched_room() {
        let store = MemoryStore::new();
        let err = store.upload("LAB 2", &fingerprint("LAB 1", -50)).unwrap_err();
        assert!(matches!(err, FingerprintError::Store(_)));
        assert!(store.get("LAB 2").unwrap().is_none());
    }

    #[test]
    fn delete_missing_room_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete("nowhere"),
            Err(FingerprintError::FingerprintNotFound(_))
        ));
    }

    #[test]
    fn list_is_newest_first() {
        let store = MemoryStore::new();
        let mut old = fingerprint("OLD", -50);
        old.trained_at = Utc::now() - Duration::days(3);
        store.upload("OLD", &old).unwrap();
        store.upload("NEW", &fingerprint("NEW", -55)).unwrap();

        let rooms: Vec<String> = store.list().unwrap().into_iter().map(|s| s.room_id).collect();
        assert_eq!(rooms, vec!["NEW", "OLD"]);
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = temp_path("reopen");
        std::fs::remove_file(&path).ok();

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.upload("CMD LAB", &fingerprint("CMD LAB", -55)).unwrap();
            store.upload("LIBRARY", &fingerprint("LIBRARY", -62)).unwrap();
            store.delete("LIBRARY").unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        let stored = reopened.get("CMD LAB").unwrap().unwrap();
        assert_eq!(stored.stats.avg_rssi, -55);
        assert_eq!(stored.num_access_points(), 2);
        assert!(reopened.get("LIBRARY").unwrap().is_none());

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn handles_on_one_file_see_each_others_changes() {
        let path = temp_path("shared");
        std::fs::remove_file(&path).ok();

        let trainer = JsonFileStore::open(&path).unwrap();
        trainer.upload("OLD", &fingerprint("OLD", -50)).unwrap();

        let cli = JsonFileStore::open(&path).unwrap();
        cli.delete("OLD").unwrap();
        assert!(trainer.get("OLD").unwrap().is_none());

        trainer.upload("NEW", &fingerprint("NEW", -55)).unwrap();
        cli.upload("IMPORTED", &fingerprint("IMPORTED", -60)).unwrap();
        trainer.upload("NEW", &fingerprint("NEW", -57)).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert!(reopened.get("OLD").unwrap().is_none());
        assert_eq!(reopened.get("NEW").unwrap().unwrap().stats.avg_rssi, -57);
        assert!(reopened.get("IMPORTED").unwrap().is_some());
        assert_eq!(cli.list().unwrap().len(), 2);

        // a second delete from the stale handle finds nothing
        assert!(matches!(
            trainer.delete("OLD"),
            Err(FingerprintError::FingerprintNotFound(_))
        ));

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn concurrent_uploads_from_separate_handles_all_land() {
        let path = temp_path("concurrent");
        std::fs::remove_file(&path).ok();
        JsonFileStore::open(&path).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = JsonFileStore::open(&path).unwrap();
                    for i in 0..5 {
                        let room = format!("ROOM {worker}-{i}");
                        store.upload(&room, &fingerprint(&room, -50 - i)).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(JsonFileStore::open(&path).unwrap().list().unwrap().len(), 20);

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn envelope_supplies_room_id() {
        let mut inner = serde_json::to_value(fingerprint("ignored", -58)).unwrap();
        inner.as_object_mut().unwrap().remove("roomId");
        let envelope = serde_json::json!({ "roomId": "SEMINAR", "fingerprint": inner });

        let parsed = parse_fingerprint(&envelope.to_string()).unwrap();
        assert_eq!(parsed.room_id, "SEMINAR");
        assert_eq!(parsed.stats.min_rssi, -78);
    }

    #[test]
    fn flat_document_parses() {
        let json = serde_json::to_string(&fingerprint("HALL", -47)).unwrap();
        assert_eq!(parse_fingerprint(&json).unwrap().room_id, "HALL");
    }

    #[test]
    fn export_then_import_file() {
        let path = temp_path("export");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        write_fingerprint_file(&path, &fingerprint("AUDITORIUM", -66)).unwrap();
        let imported = read_fingerprint_file(&path).unwrap();
        assert_eq!(imported.room_id, "AUDITORIUM");

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
