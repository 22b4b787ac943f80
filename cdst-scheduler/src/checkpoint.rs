use anyhow::{anyhow, Result};
use cdst_engine::Individual;
use cdst_utils::{compress_obj, decompress_obj};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Blob prefix: `CDST` plus a trailing format-version byte.
pub const CHECKPOINT_MAGIC: &[u8; 5] = b"CDST\x01";

/// Everything needed to resume a run: the population with its objective
/// vectors, the generation counter, and the base seed the per-generation
/// generators derive from.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Checkpoint {
    pub scenario_id: String,
    pub generation: u32,
    pub base_seed: u64,
    pub population: Vec<Individual>,
}

pub fn encode_checkpoint(checkpoint: &Checkpoint) -> Result<Vec<u8>> {
    let mut blob = CHECKPOINT_MAGIC.to_vec();
    blob.extend(compress_obj(checkpoint)?);
    Ok(blob)
}

pub fn decode_checkpoint(blob: &[u8]) -> Result<Checkpoint> {
    if blob.len() < CHECKPOINT_MAGIC.len() || &blob[..4] != b"CDST" {
        return Err(anyhow!("blob does not carry the checkpoint magic"));
    }
    let version = blob[4];
    if version != CHECKPOINT_MAGIC[4] {
        return Err(anyhow!("unsupported checkpoint version {}", version));
    }
    decompress_obj(&blob[CHECKPOINT_MAGIC.len()..])
}

/// Durable blob storage keyed by scenario id.
pub trait CheckpointStore: Send + Sync {
    fn put(&self, scenario_id: &str, blob: &[u8]) -> Result<()>;
    fn get(&self, scenario_id: &str) -> Result<Option<Vec<u8>>>;
    fn delete(&self, scenario_id: &str) -> Result<()>;
}

/// Filesystem store with atomic writes (temp file + rename).
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, scenario_id: &str) -> PathBuf {
        self.dir.join(format!("{}.ckpt", scenario_id))
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn put(&self, scenario_id: &str, blob: &[u8]) -> Result<()> {
        let target = self.path(scenario_id);
        let tmp = self.dir.join(format!("{}.ckpt.tmp", scenario_id));
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn get(&self, scenario_id: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(scenario_id)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, scenario_id: &str) -> Result<()> {
        match fs::remove_file(self.path(scenario_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
