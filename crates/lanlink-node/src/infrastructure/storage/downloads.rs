//! Destination sink for inbound files.
//!
//! Bytes are streamed into a private `<name>.<uuid>.part` file inside the
//! download directory, so concurrent receives of the same name never share
//! a temporary file.  Only after the whole announced size has arrived does
//! [`PartFile::commit`] move it to its final name.  Existing files are never
//! replaced: if `<name>` is taken the file is saved as `<stem> (1).<ext>`,
//! `<stem> (2).<ext>`, and so on.  A `PartFile` dropped without a commit
//! deletes its `.part` file, which covers aborted transfers, I/O errors, and
//! sessions cancelled mid-file alike.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Suffix appended to a file while it is still being received.
pub const PART_SUFFIX: &str = ".part";

/// Numbered alternatives tried before giving up on a free final name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// An in-progress download.
#[derive(Debug)]
pub struct PartFile {
    dir: PathBuf,
    file_name: String,
    part_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl PartFile {
    /// Creates `dir` if needed and opens a fresh, uniquely named `.part` file
    /// for `file_name`.
    ///
    /// `file_name` must already be a bare final path component.
    pub async fn create(dir: &Path, file_name: &str) -> io::Result<Self> {
        fs::create_dir_all(dir).await?;
        let part_path = dir.join(format!("{file_name}.{}{PART_SUFFIX}", Uuid::new_v4().simple()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part_path)
            .await?;
        debug!("receiving into {}", part_path.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            file_name: file_name.to_string(),
            part_path,
            file: Some(file),
            committed: false,
        })
    }

    /// Path of the temporary `.part` file.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Appends `bytes`.
    pub async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(bytes).await,
            None => Err(io::Error::new(io::ErrorKind::Other, "part file already closed")),
        }
    }

    /// Flushes, closes, and moves the file to the first free final name.
    ///
    /// Returns the path the file was saved under.
    pub async fn commit(mut self) -> io::Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        let target = self.reserve_target().await?;
        if let Err(e) = fs::rename(&self.part_path, &target).await {
            // Give the reserved name back.
            fs::remove_file(&target).await.ok();
            return Err(e);
        }
        self.committed = true;
        Ok(target)
    }

    /// Claims a final name by creating it exclusively.  The empty placeholder
    /// is then replaced by the rename in [`commit`](Self::commit).
    async fn reserve_target(&self) -> io::Result<PathBuf> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = self.dir.join(numbered_name(&self.file_name, attempt));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(_) => {
                    if attempt > 0 {
                        debug!("{} exists; saving as {}", self.file_name, candidate.display());
                    }
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {} in {}", self.file_name, self.dir.display()),
        ))
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.file.take();
        match std::fs::remove_file(&self.part_path) {
            Ok(()) => debug!("discarded partial file {}", self.part_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove {}: {e}", self.part_path.display()),
        }
    }
}

/// `report.pdf`, then `report (1).pdf`, `report (2).pdf`, ...
fn numbered_name(file_name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{} ({attempt}).{}",
            stem.to_string_lossy(),
            ext.to_string_lossy()
        ),
        _ => format!("{file_name} ({attempt})"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("lanlink_dl_{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_commit_renames_part_file_to_final_name() {
        // Arrange
        let dir = scratch_dir();
        let mut part = PartFile::create(&dir, "report.txt").await.unwrap();
        let part_path = part.part_path().to_path_buf();

        // Act
        part.write_chunk(b"hello ").await.unwrap();
        part.write_chunk(b"world").await.unwrap();
        let saved = part.commit().await.unwrap();

        // Assert
        assert_eq!(saved, dir.join("report.txt"));
        assert_eq!(std::fs::read(&saved).unwrap(), b"hello world");
        assert!(!part_path.exists(), ".part file must be gone after commit");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_create_makes_missing_download_directory() {
        let dir = scratch_dir().join("a").join("b");
        let part = PartFile::create(&dir, "x.bin").await.unwrap();
        assert!(dir.is_dir());
        let name = part.part_path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("x.bin.") && name.ends_with(PART_SUFFIX), "{name}");
        drop(part);
        std::fs::remove_dir_all(dir.parent().unwrap().parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_drop_without_commit_removes_part_file() {
        // Arrange
        let dir = scratch_dir();
        let mut part = PartFile::create(&dir, "movie.mkv").await.unwrap();
        part.write_chunk(&[0u8; 1024]).await.unwrap();
        let part_path = part.part_path().to_path_buf();

        // Act
        drop(part);

        // Assert
        assert!(!part_path.exists());
        assert!(!dir.join("movie.mkv").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_commit_keeps_existing_file_and_picks_numbered_name() {
        // Arrange
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("notes.txt"), b"old contents").unwrap();

        // Act
        let mut part = PartFile::create(&dir, "notes.txt").await.unwrap();
        part.write_chunk(b"new").await.unwrap();
        let saved = part.commit().await.unwrap();

        // Assert
        assert_eq!(saved, dir.join("notes (1).txt"));
        assert_eq!(std::fs::read(&saved).unwrap(), b"new");
        assert_eq!(std::fs::read(dir.join("notes.txt")).unwrap(), b"old contents");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_interleaved_same_name_receives_keep_both_files() {
        // Arrange: two receives of "same.bin" in flight at once
        let dir = scratch_dir();
        let mut first = PartFile::create(&dir, "same.bin").await.unwrap();
        let mut second = PartFile::create(&dir, "same.bin").await.unwrap();
        assert_ne!(first.part_path(), second.part_path());

        // Act: the second finishes while the first is half done
        first.write_chunk(&[b'A'; 10]).await.unwrap();
        second.write_chunk(&[b'B'; 20]).await.unwrap();
        let second_saved = second.commit().await.unwrap();
        first.write_chunk(&[b'A'; 10]).await.unwrap();
        let first_saved = first.commit().await.unwrap();

        // Assert
        assert_ne!(first_saved, second_saved);
        assert_eq!(std::fs::read(&second_saved).unwrap(), vec![b'B'; 20]);
        assert_eq!(std::fs::read(&first_saved).unwrap(), vec![b'A'; 20]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_empty_file_commits_as_zero_bytes() {
        let dir = scratch_dir();
        let part = PartFile::create(&dir, "empty").await.unwrap();
        let saved = part.commit().await.unwrap();
        assert_eq!(std::fs::metadata(saved).unwrap().len(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_numbered_name_keeps_extension() {
        assert_eq!(numbered_name("report.pdf", 0), "report.pdf");
        assert_eq!(numbered_name("report.pdf", 2), "report (2).pdf");
        assert_eq!(numbered_name("README", 1), "README (1)");
        assert_eq!(numbered_name("archive.tar.gz", 1), "archive.tar (1).gz");
    }
}
