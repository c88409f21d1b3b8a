//! World backups.
//!
//! A backup is a `tar.gz` holding one bincode-encoded snapshot of the world,
//! every entity and the challenge ledger. Its SHA-256 is kept in
//! `backups.json` next to the archives so it can be verified later.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tar::{Archive, Builder, Header};

use crate::mud::errors::PersistenceError;
use crate::mud::instance::ChallengeRecord;
use crate::mud::types::{PlayerRecord, RoomRecord};

const SNAPSHOT_ENTRY: &str = "snapshot.bin";
const METADATA_FILE: &str = "backups.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub rooms: Vec<RoomRecord>,
    pub players: Vec<PlayerRecord>,
    pub ledger: Vec<ChallengeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub rooms: usize,
    pub players: usize,
    /// SHA-256 of the archive, lowercase hex
    pub checksum: String,
    pub verified: bool,
    /// Relative to the backup directory
    pub path: PathBuf,
}

pub struct BackupManager {
    backup_path: PathBuf,
    backups: BTreeMap<String, BackupMetadata>,
}

impl BackupManager {
    pub fn new(backup_path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let backup_path = backup_path.into();
        fs::create_dir_all(&backup_path)?;
        let mut manager = Self {
            backup_path,
            backups: BTreeMap::new(),
        };
        manager.load_metadata()?;
        Ok(manager)
    }

    fn load_metadata(&mut self) -> Result<(), PersistenceError> {
        let metadata_path = self.backup_path.join(METADATA_FILE);
        if metadata_path.exists() {
            let contents = fs::read_to_string(&metadata_path)?;
            self.backups = serde_json::from_str(&contents)?;
        }
        Ok(())
    }

    fn save_metadata(&self) -> Result<(), PersistenceError> {
        let contents = serde_json::to_string_pretty(&self.backups)?;
        fs::write(self.backup_path.join(METADATA_FILE), contents)?;
        Ok(())
    }

    pub fn create_backup(&mut self, snapshot: &BackupSnapshot) -> Result<BackupMetadata, PersistenceError> {
        let timestamp = Utc::now();
        let mut id = format!("backup_{}", timestamp.format("%Y%m%d_%H%M%S_%3f"));
        let mut suffix = 1;
        while self.backups.contains_key(&id) {
            id = format!("backup_{}_{}", timestamp.format("%Y%m%d_%H%M%S_%3f"), suffix);
            suffix += 1;
        }
        let filename = format!("{}.tar.gz", id);
        let backup_file = self.backup_path.join(&filename);
        let payload = bincode::serialize(snapshot)?;

        log::info!("Creating backup {}", id);
        let tar_gz = File::create(&backup_file)?;
        let enc = GzEncoder::new(tar_gz, Compression::default());
        let mut tar = Builder::new(enc);
        let mut header = Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(timestamp.timestamp().max(0) as u64);
        header.set_cksum();
        tar.append_data(&mut header, SNAPSHOT_ENTRY, payload.as_slice())?;
        // The archive must be complete before it is hashed.
        let enc = tar.into_inner()?;
        enc.finish()?;

        let checksum = calculate_checksum(&backup_file)?;
        let size_bytes = fs::metadata(&backup_file)?.len();
        let metadata = BackupMetadata {
            id: id.clone(),
            created_at: timestamp,
            size_bytes,
            rooms: snapshot.rooms.len(),
            players: snapshot.players.len(),
            checksum,
            verified: false,
            path: PathBuf::from(&filename),
        };
        self.backups.insert(id.clone(), metadata.clone());
        self.save_metadata()?;
        log::info!("Backup created: {} ({} bytes)", id, size_bytes);
        Ok(metadata)
    }

    fn archive_path(&self, backup_id: &str) -> Result<(PathBuf, String), PersistenceError> {
        let metadata = self
            .backups
            .get(backup_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("backup: {}", backup_id)))?;
        let file = self.backup_path.join(&metadata.path);
        if !file.exists() {
            return Err(PersistenceError::NotFound(format!(
                "backup file {}",
                file.display()
            )));
        }
        Ok((file, metadata.checksum.clone()))
    }

    /// Recompute the checksum and compare it with the recorded one.
    pub fn verify_backup(&mut self, backup_id: &str) -> Result<bool, PersistenceError> {
        let (file, expected) = self.archive_path(backup_id)?;
        let valid = calculate_checksum(&file)? == expected;
        if valid {
            log::info!("Backup verification passed: {}", backup_id);
            if let Some(meta) = self.backups.get_mut(backup_id) {
                meta.verified = true;
            }
            self.save_metadata()?;
        } else {
            log::error!("Backup verification FAILED: {} (checksum mismatch)", backup_id);
        }
        Ok(valid)
    }

    /// Read a verified backup's snapshot back.
    pub fn read_snapshot(&self, backup_id: &str) -> Result<BackupSnapshot, PersistenceError> {
        let (file, expected) = self.archive_path(backup_id)?;
        if calculate_checksum(&file)? != expected {
            return Err(PersistenceError::Corrupt(format!(
                "backup {} checksum mismatch",
                backup_id
            )));
        }
        let mut archive = Archive::new(GzDecoder::new(File::open(&file)?));
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.path()?.as_ref() == Path::new(SNAPSHOT_ENTRY) {
                let mut payload = Vec::new();
                entry.read_to_end(&mut payload)?;
                return Ok(bincode::deserialize(&payload)?);
            }
        }
        Err(PersistenceError::Corrupt(format!(
            "backup {} has no snapshot",
            backup_id
        )))
    }

    /// Newest first.
    pub fn list_backups(&self) -> Vec<BackupMetadata> {
        let mut backups: Vec<BackupMetadata> = self.backups.values().cloned().collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        backups
    }
}

fn calculate_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::seed::{canonical_world, item_catalog};
    use crate::mud::types::PlayerClass;
    use tempfile::TempDir;

    fn snapshot() -> BackupSnapshot {
        BackupSnapshot {
            rooms: canonical_world(&item_catalog()),
            players: vec![PlayerRecord::new("Neo", "construct", PlayerClass::Operator)],
            ledger: Vec::new(),
        }
    }

    #[test]
    fn backup_round_trips_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let mut manager = BackupManager::new(dir.path()).expect("manager");
        let original = snapshot();
        let meta = manager.create_backup(&original).expect("backup");
        assert_eq!(meta.rooms, original.rooms.len());
        assert!(manager.verify_backup(&meta.id).expect("verify"));
        assert_eq!(manager.read_snapshot(&meta.id).expect("read"), original);
    }

    #[test]
    fn tampering_fails_verification() {
        let dir = TempDir::new().expect("tempdir");
        let mut manager = BackupManager::new(dir.path()).expect("manager");
        let meta = manager.create_backup(&snapshot()).expect("backup");
        fs::write(dir.path().join(&meta.path), b"garbage").expect("overwrite");
        assert!(!manager.verify_backup(&meta.id).expect("verify"));
        assert!(manager.read_snapshot(&meta.id).is_err());
    }

    #[test]
    fn metadata_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let id = {
            let mut manager = BackupManager::new(dir.path()).expect("manager");
            manager.create_backup(&snapshot()).expect("backup").id
        };
        let manager = BackupManager::new(dir.path()).expect("reopen");
        assert_eq!(manager.list_backups().len(), 1);
        assert_eq!(manager.list_backups()[0].id, id);
    }
}
