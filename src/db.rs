use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};

use crate::models::{ArtistId, GigRecord, RecordError};
use crate::utils;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt gig document {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("gig index {index} out of range ({len} gigs)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("refusing to store invalid gig: {0}")]
    Invalid(#[from] RecordError),
}

/// Ordered gig lists keyed by artist.
#[async_trait]
pub trait GigStore: Send + Sync {
    async fn append(&self, artist: &ArtistId, gig: GigRecord) -> Result<(), StoreError>;
    /// Gigs in insertion order.
    async fn list(&self, artist: &ArtistId) -> Result<Vec<GigRecord>, StoreError>;
    async fn remove(&self, artist: &ArtistId, index: usize) -> Result<GigRecord, StoreError>;
    /// Swaps the gig at `index`, returning the one it replaced.
    async fn replace(
        &self,
        artist: &ArtistId,
        index: usize,
        gig: GigRecord,
    ) -> Result<GigRecord, StoreError>;
}

#[derive(Serialize, Deserialize, Default)]
struct GigDocument {
    #[serde(default)]
    gigs: Vec<GigRecord>,
}

/// One `{"gigs": [...]}` document per artist under `<root>/artists/<artist>/`.
///
/// Writes for one artist are serialized; each write lands through a rename so
/// a reader never observes half a document.
pub struct JsonGigStore {
    root: PathBuf,
    locks: Mutex<HashMap<ArtistId, Arc<Mutex<()>>>>,
}

impl JsonGigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Seeds an artist from a legacy bare JSON array of gig objects.
    ///
    /// Entries that fail validation are logged and skipped. Returns how many
    /// gigs were added.
    pub async fn import_legacy(&self, artist: &ArtistId, path: &Path) -> Result<usize, StoreError> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let entries: Vec<Value> =
            serde_json::from_str(&contents).map_err(|err| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;

        let mut accepted = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<GigRecord>(entry.clone()) {
                Ok(gig) => match gig.validate() {
                    Ok(()) => accepted.push(gig),
                    Err(err) => warn!(%artist, %entry, "skipping legacy gig: {err}"),
                },
                Err(err) => warn!(%artist, %entry, "skipping legacy gig: {err}"),
            }
        }

        let count = accepted.len();
        self.update(artist, |gigs| {
            gigs.extend(accepted);
            Ok(())
        })
        .await?;
        info!(%artist, count, "imported legacy gigs");
        Ok(count)
    }

    async fn artist_lock(&self, artist: &ArtistId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(artist.clone()).or_default().clone()
    }

    async fn read_document(&self, path: &Path) -> Result<GigDocument, StoreError> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(GigDocument::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(GigDocument::default());
        }
        serde_json::from_str(&contents).map_err(|err| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    async fn write_document(&self, path: &Path, document: &GigDocument) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        utils::ensure_parent(path).await.map_err(io_err)?;
        let contents = serde_json::to_string_pretty(document).map_err(|err| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).await.map_err(io_err)?;
        fs::rename(&tmp, path).await.map_err(io_err)
    }

    /// Read-modify-write of one artist's document under that artist's lock.
    async fn update<T, F>(&self, artist: &ArtistId, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<GigRecord>) -> Result<T, StoreError>,
    {
        let lock = self.artist_lock(artist).await;
        let _guard = lock.lock().await;

        let path = utils::gigs_path(&self.root, artist);
        let mut document = self.read_document(&path).await?;
        let out = change(&mut document.gigs)?;
        self.write_document(&path, &document).await?;
        Ok(out)
    }
}

#[async_trait]
impl GigStore for JsonGigStore {
    async fn append(&self, artist: &ArtistId, gig: GigRecord) -> Result<(), StoreError> {
        gig.validate()?;
        self.update(artist, |gigs| {
            gigs.push(gig);
            Ok(())
        })
        .await
    }

    async fn list(&self, artist: &ArtistId) -> Result<Vec<GigRecord>, StoreError> {
        let path = utils::gigs_path(&self.root, artist);
        Ok(self.read_document(&path).await?.gigs)
    }

    async fn remove(&self, artist: &ArtistId, index: usize) -> Result<GigRecord, StoreError> {
        self.update(artist, |gigs| {
            if index >= gigs.len() {
                return Err(StoreError::IndexOutOfRange {
                    index,
                    len: gigs.len(),
                });
            }
            Ok(gigs.remove(index))
        })
        .await
    }

    async fn replace(
        &self,
        artist: &ArtistId,
        index: usize,
        gig: GigRecord,
    ) -> Result<GigRecord, StoreError> {
        gig.validate()?;
        self.update(artist, |gigs| {
            let len = gigs.len();
            match gigs.get_mut(index) {
                Some(slot) => Ok(std::mem::replace(slot, gig)),
                None => Err(StoreError::IndexOutOfRange { index, len }),
            }
        })
        .await
    }
}
