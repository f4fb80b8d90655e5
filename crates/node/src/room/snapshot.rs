// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content-addressed room snapshots: one JSON object per rollup, named by
//! its hash, plus a per-room pointer to the latest.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use super::crdt::RoomDoc;

/// Filesystem-backed snapshot store.
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persist a snapshot. Returns its content hash.
    pub fn store(&self, doc: &RoomDoc) -> anyhow::Result<String> {
        let body = serde_json::to_vec(doc)?;
        let hash = hex_digest(&body);

        std::fs::create_dir_all(self.objects_dir())?;
        std::fs::create_dir_all(self.rooms_dir())?;
        let object = self.objects_dir().join(format!("{hash}.json"));
        // Content-addressed: an existing object is already identical.
        if !object.exists() {
            std::fs::write(&object, &body)?;
        }
        std::fs::write(self.pointer_path(&doc.room_id), &hash)?;
        Ok(hash)
    }

    /// Load the latest snapshot for a room, if one exists.
    pub fn load_latest(&self, room_id: &str) -> Option<RoomDoc> {
        let hash = std::fs::read_to_string(self.pointer_path(room_id)).ok()?;
        self.load(hash.trim())
    }

    /// Load a snapshot by hash.
    pub fn load(&self, hash: &str) -> Option<RoomDoc> {
        let path = self.objects_dir().join(format!("{hash}.json"));
        let body = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&body) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(hash, err = %e, "corrupt room snapshot");
                None
            }
        }
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn rooms_dir(&self) -> PathBuf {
        self.root.join("rooms")
    }

    fn pointer_path(&self, room_id: &str) -> PathBuf {
        // Room ids are UUIDs; keep the path safe regardless.
        let safe: String = room_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.rooms_dir().join(format!("{safe}.latest"))
    }
}

fn hex_digest(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Expose the root for status reporting.
impl AsRef<Path> for SnapshotStore {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
