//! Destinations for exported stills.

use std::path::{Path, PathBuf};

/// Offer bytes as a named downloadable artifact. Fire-and-forget.
pub trait ExportSink: Send + Sync {
    fn offer(&self, name: &str, bytes: Vec<u8>);
}

/// Writes each artifact into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `~/Pictures/gaugewatch`, or `./gaugewatch` without a pictures directory.
    pub fn default_dir() -> PathBuf {
        dirs::picture_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gaugewatch")
    }

    fn write(&self, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    fn save(&self, name: &str, bytes: &[u8]) {
        match self.write(name, bytes) {
            Ok(path) => log::info!("Saved capture to {}", path.display()),
            Err(e) => log::error!("Failed to save capture '{}': {}", name, e),
        }
    }
}

impl ExportSink for DirectorySink {
    /// Inside a runtime the write runs on the blocking pool, so a slow disk
    /// never stalls the calling feed.
    fn offer(&self, name: &str, bytes: Vec<u8>) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let sink = self.clone();
                let name = name.to_string();
                runtime.spawn_blocking(move || sink.save(&name, &bytes));
            }
            Err(_) => self.save(name, &bytes),
        }
    }
}
