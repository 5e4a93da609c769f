//! JSON swap journal

use crate::error::RelayerResult;
use crate::swap::SwapResult;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Journaled snapshot of one swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub swap: SwapResult,
}

/// One JSON file per swap, rewritten after every transition
pub struct SwapJournal {
    dir: PathBuf,
}

impl SwapJournal {
    /// Open the journal, creating the directory if needed
    pub async fn open(dir: impl AsRef<Path>) -> RelayerResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        info!("Swap journal at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, swap_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", swap_id))
    }

    /// Write the latest snapshot of `swap`
    pub async fn record(&self, swap: &SwapResult) -> RelayerResult<()> {
        let record = SwapRecord {
            updated_at: Utc::now(),
            swap: swap.clone(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(io::Error::from)?;

        // Replace atomically so a crash never leaves a truncated record
        let path = self.path_for(swap.swap_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Journaled swap {} in state {}", swap.swap_id, swap.state);
        Ok(())
    }

    pub async fn load(&self, swap_id: Uuid) -> RelayerResult<Option<SwapRecord>> {
        match fs::read(self.path_for(swap_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(io::Error::from)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All records, oldest update first. Unreadable files are skipped.
    pub async fn list(&self) -> RelayerResult<Vec<SwapRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<SwapRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable journal entry {}: {}", path.display(), e),
            }
        }
        records.sort_by_key(|record| record.updated_at);
        Ok(records)
    }

    /// Swaps that stopped before a terminal state
    pub async fn unfinished(&self) -> RelayerResult<Vec<SwapRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|record| !record.swap.state.is_terminal())
            .collect())
    }
}
