//! File-backed checkpoint store
//!
//! Directory layout:
//! ```text
//! {dir}/
//! ├── checkpoint_T_1.json      # partition "T", unit 1
//! ├── checkpoint_T_2.json
//! ├── checkpoint_ALL_1.json    # empty partition key
//! └── checkpoint_H_3.json.tmp  # stale: crash between write and rename
//! ```
//!
//! There is no index: [`CheckpointStore::list_all`] scans the directory.
//! Concurrent writers are safe only because each (partition, unit) has a
//! single owner at a time; the store itself takes no locks.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::checkpoint::{CURRENT_FORMAT_VERSION, Checkpoint, CheckpointId};
use crate::error::StoreError;
use crate::partition::PartitionKey;

const PREFIX: &str = "checkpoint_";
const SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".json.tmp";

/// Durable per-unit progress records in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `checkpoint_{KEY|ALL}_{unit}.json`
    pub fn file_name(partition: &PartitionKey, unit: u32) -> String {
        format!("{PREFIX}{}_{unit}{SUFFIX}", partition.file_code())
    }

    /// Inverse of [`file_name`](Self::file_name); `None` for foreign files.
    pub fn parse_file_name(name: &str) -> Option<CheckpointId> {
        let stem = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
        let (code, unit) = stem.rsplit_once('_')?;
        let unit = unit.parse().ok()?;
        let partition = PartitionKey::from_file_code(code).ok()?;
        Some(CheckpointId::new(partition, unit))
    }

    pub fn path_for(&self, partition: &PartitionKey, unit: u32) -> PathBuf {
        self.dir.join(Self::file_name(partition, unit))
    }

    /// Build a zero-progress record. Nothing is written until [`save`](Self::save).
    pub fn create(
        &self,
        partition: &PartitionKey,
        unit: u32,
        start_item: u32,
        end_item: u32,
        size_hint: u32,
        total_items_in_partition: u32,
    ) -> Checkpoint {
        Checkpoint::new(
            partition.clone(),
            unit,
            start_item,
            end_item,
            size_hint,
            total_items_in_partition,
        )
    }

    /// Read the record for (partition, unit), `None` if it was never saved.
    pub fn load(
        &self,
        partition: &PartitionKey,
        unit: u32,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.path_for(partition, unit);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        // Check the version before the full parse so old layouts get a clear error
        #[derive(serde::Deserialize)]
        struct Version {
            format_version: u32,
        }
        let version: Version = serde_json::from_str(&json).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        if version.format_version != CURRENT_FORMAT_VERSION {
            return Err(StoreError::FormatVersion {
                path,
                found: version.format_version,
                expected: CURRENT_FORMAT_VERSION,
            });
        }

        let checkpoint: Checkpoint =
            serde_json::from_str(&json).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;

        if checkpoint.partition_key != *partition || checkpoint.unit_number != unit {
            return Err(StoreError::Invalid {
                path,
                reason: format!("record belongs to {}", checkpoint.id()),
            });
        }
        checkpoint
            .validate()
            .map_err(|reason| StoreError::Invalid {
                path: path.clone(),
                reason,
            })?;

        log::debug!(
            "loaded checkpoint {}: items {}-{}, last processed {}, {} failed",
            checkpoint.id(),
            checkpoint.start_item,
            checkpoint.end_item,
            checkpoint.last_processed_item,
            checkpoint.failed_items.len()
        );
        Ok(Some(checkpoint))
    }

    /// Overwrite the record, refreshing `last_updated_at`.
    ///
    /// Writes `<file>.tmp`, syncs it, then renames over the final name, so a
    /// crash at any point leaves either the previous or the new record.
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), StoreError> {
        checkpoint.last_updated_at = Utc::now();

        let final_path = self.path_for(&checkpoint.partition_key, checkpoint.unit_number);
        let tmp_path = final_path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(checkpoint).map_err(|source| StoreError::Json {
            path: final_path.clone(),
            source,
        })?;

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
            Ok(())
        };
        write().map_err(|e| StoreError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| StoreError::io(&final_path, e))?;

        log::trace!("saved checkpoint {}", checkpoint.id());
        Ok(())
    }

    /// Every checkpoint on disk, sorted by (partition, unit).
    pub fn list_all(&self) -> Result<Vec<CheckpointId>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            match Self::parse_file_name(name) {
                Some(id) => ids.push(id),
                None if name.ends_with(TMP_SUFFIX) => {}
                None if name.starts_with(PREFIX) => {
                    log::warn!("ignoring unrecognized checkpoint file {name}");
                }
                None => {}
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Checkpoints of one partition, ascending by unit.
    pub fn list_partition(&self, partition: &PartitionKey) -> Result<Vec<u32>, StoreError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|id| id.partition == *partition)
            .map(|id| id.unit)
            .collect())
    }

    /// Remove `.tmp` files left by a crash mid-save. Returns how many were removed.
    pub fn cleanup_tmp_files(&self) -> Result<usize, StoreError> {
        self.remove_matching(|name| name.starts_with(PREFIX) && name.ends_with(TMP_SUFFIX))
            .inspect(|&n| {
                if n > 0 {
                    log::warn!("removed {n} stale checkpoint tmp file(s)");
                }
            })
    }

    /// Delete every checkpoint (and tmp) file. Explicit operator reset only.
    pub fn wipe(&self) -> Result<usize, StoreError> {
        self.remove_matching(|name| {
            Self::parse_file_name(name).is_some()
                || (name.starts_with(PREFIX) && name.ends_with(TMP_SUFFIX))
        })
    }

    fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let path = entry.path();
            let matched = entry.file_name().to_str().is_some_and(&matches);
            if matched && path.is_file() {
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
