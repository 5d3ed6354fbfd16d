//! In-memory collaborators for unit tests.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;

use crate::db::{GigStore, StoreError};
use crate::llm::{CompletionError, CompletionService};
use crate::models::{ArtistId, GigRecord};

pub struct StubCompletion {
    reply: Result<String, CompletionError>,
    calls: StdMutex<Vec<(String, String)>>,
}

impl StubCompletion {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            calls: StdMutex::new(Vec::new()),
        }
    }

    pub fn failing(err: CompletionError) -> Self {
        Self {
            reply: Err(err),
            calls: StdMutex::new(Vec::new()),
        }
    }

    /// `(system, user)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for StubCompletion {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        self.reply.clone()
    }
}

#[derive(Default)]
pub struct MemoryGigStore {
    gigs: Mutex<HashMap<ArtistId, Vec<GigRecord>>>,
    fail_appends: bool,
}

impl MemoryGigStore {
    pub fn failing_appends() -> Self {
        Self {
            fail_appends: true,
            ..Self::default()
        }
    }

    /// Stores `gig` as-is, the way a hand-edited document might hold it.
    pub async fn insert_unchecked(&self, artist: &ArtistId, gig: GigRecord) {
        self.gigs
            .lock()
            .await
            .entry(artist.clone())
            .or_default()
            .push(gig);
    }

    pub async fn gigs(&self, artist: &ArtistId) -> Vec<GigRecord> {
        self.gigs
            .lock()
            .await
            .get(artist)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl GigStore for MemoryGigStore {
    async fn append(&self, artist: &ArtistId, gig: GigRecord) -> Result<(), StoreError> {
        if self.fail_appends {
            return Err(StoreError::Io {
                path: "memory".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        gig.validate()?;
        self.gigs
            .lock()
            .await
            .entry(artist.clone())
            .or_default()
            .push(gig);
        Ok(())
    }

    async fn list(&self, artist: &ArtistId) -> Result<Vec<GigRecord>, StoreError> {
        Ok(self.gigs(artist).await)
    }

    async fn remove(&self, artist: &ArtistId, index: usize) -> Result<GigRecord, StoreError> {
        let mut all = self.gigs.lock().await;
        let gigs = all.entry(artist.clone()).or_default();
        if index >= gigs.len() {
            return Err(StoreError::IndexOutOfRange {
                index,
                len: gigs.len(),
            });
        }
        Ok(gigs.remove(index))
    }

    async fn replace(
        &self,
        artist: &ArtistId,
        index: usize,
        gig: GigRecord,
    ) -> Result<GigRecord, StoreError> {
        gig.validate()?;
        let mut all = self.gigs.lock().await;
        let gigs = all.entry(artist.clone()).or_default();
        let len = gigs.len();
        match gigs.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, gig)),
            None => Err(StoreError::IndexOutOfRange { index, len }),
        }
    }
}

/// Collects formatted `tracing` output for assertions.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<StdMutex<Vec<u8>>>);

impl LogCapture {
    /// Routes events on the current thread here until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
