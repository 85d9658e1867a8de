//! Deletes stale rendered PDFs from the storage directory.
//!
//! Independent of the queue: a file surviving past its age threshold
//! is swept regardless of whether its owning job row still exists, and
//! a failure on one file never blocks the rest of the sweep.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

pub struct Cleaner {
    storage_path: PathBuf,
    max_age: Duration,
}

impl Cleaner {
    pub fn new(storage_path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            storage_path: storage_path.into(),
            max_age,
        }
    }

    /// Walk the storage directory once and delete every `*.pdf` file
    /// whose mtime is older than `max_age`. Returns the number of
    /// files deleted.
    pub async fn sweep(&self) -> usize {
        let storage_path = self.storage_path.clone();
        let max_age = self.max_age;

        tokio::task::spawn_blocking(move || sweep_blocking(&storage_path, max_age))
            .await
            .unwrap_or_else(|join_error| {
                tracing::warn!(%join_error, "sweep task panicked");
                0
            })
    }
}

fn sweep_blocking(storage_path: &Path, max_age: Duration) -> usize {
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in WalkDir::new(storage_path)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some("pdf") {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!(path = %entry.path().display(), %error, "failed to stat file during sweep");
                continue;
            }
        };

        let age = match metadata.modified().and_then(|mtime| {
            now.duration_since(mtime)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "mtime in the future"))
        }) {
            Ok(age) => age,
            Err(_) => continue,
        };

        if age < max_age {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                deleted += 1;
                metrics::counter!("pdf_sweeper_files_deleted_total").increment(1);
                tracing::info!(path = %entry.path().display(), "swept stale pdf");
            }
            Err(error) => {
                tracing::warn!(path = %entry.path().display(), %error, "failed to remove stale pdf");
            }
        }
    }

    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration as StdDuration;

    fn set_mtime(path: &Path, when: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    #[tokio::test]
    async fn sweeps_only_files_older_than_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let old_time = SystemTime::now() - StdDuration::from_secs(10_000);

        let stale = tmp.path().join("stale.pdf");
        fs::write(&stale, b"%PDF-1.4").unwrap();
        set_mtime(&stale, old_time);

        let fresh = tmp.path().join("fresh.pdf");
        fs::write(&fresh, b"%PDF-1.4").unwrap();

        let not_pdf = tmp.path().join("stale.txt");
        fs::write(&not_pdf, b"not a pdf").unwrap();
        set_mtime(&not_pdf, old_time);

        let cleaner = Cleaner::new(tmp.path(), StdDuration::from_secs(1020));
        let deleted = cleaner.sweep().await;

        assert_eq!(deleted, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(not_pdf.exists());
    }

    #[tokio::test]
    async fn missing_directory_sweeps_to_zero_without_panicking() {
        let cleaner = Cleaner::new("/nonexistent/pagecast-sweeper-test", StdDuration::from_secs(1));
        assert_eq!(cleaner.sweep().await, 0);
    }
}
