use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use crate::{BoxFuture, KeysmashError, Result};

/// Voice that plays one short tone per key press.
pub trait ToneSink: Send + Sync {
    /// Resolves once the sink can produce sound. Tones issued before that may
    /// be dropped.
    fn ensure_started(&self) -> BoxFuture<'_, Result<()>>;
    fn play_tone(&self, note: &str) -> Result<()>;
    fn set_volume(&self, db: f32) -> Result<()>;
}

/// Tone sink without an audio backend: tracks start-up and volume and logs the
/// notes it would have played.
#[derive(Debug)]
pub struct TracingToneSink {
    started: AtomicBool,
    volume_db: Mutex<f32>,
    played: Mutex<Vec<String>>,
}

impl Default for TracingToneSink {
    fn default() -> Self {
        Self {
            started: AtomicBool::new(false),
            volume_db: Mutex::new(-6.0),
            played: Mutex::new(Vec::new()),
        }
    }
}

impl TracingToneSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn volume_db(&self) -> f32 {
        self.volume_db.lock().map(|v| *v).unwrap_or_default()
    }

    /// Notes played so far, oldest first.
    pub fn played(&self) -> Vec<String> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl ToneSink for TracingToneSink {
    fn ensure_started(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.started.swap(true, Ordering::AcqRel) {
                tracing::info!(volume_db = self.volume_db(), "tone sink started");
            }
            Ok(())
        })
    }

    fn play_tone(&self, note: &str) -> Result<()> {
        if !self.is_started() {
            tracing::debug!(note, "tone dropped before start");
            return Ok(());
        }
        tracing::debug!(note, "tone");
        self.played
            .lock()
            .map_err(|_| KeysmashError::Poisoned("tone history"))?
            .push(note.to_string());
        Ok(())
    }

    fn set_volume(&self, db: f32) -> Result<()> {
        if !db.is_finite() {
            return Err(KeysmashError::InvalidInput("tone volume must be finite"));
        }
        *self
            .volume_db
            .lock()
            .map_err(|_| KeysmashError::Poisoned("tone volume"))? = db;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drops_tones_until_started() {
        let sink = TracingToneSink::new();
        sink.play_tone("C4").unwrap();
        assert!(sink.played().is_empty());

        sink.ensure_started().await.unwrap();
        sink.play_tone("D4").unwrap();
        assert_eq!(sink.played(), vec!["D4".to_string()]);
    }

    #[test]
    fn rejects_non_finite_volume() {
        let sink = TracingToneSink::new();
        sink.set_volume(-12.0).unwrap();
        assert!(sink.set_volume(f32::NAN).is_err());
        assert_eq!(sink.volume_db(), -12.0);
    }
}
