//! Local sink for downloads written to disk.
//!
//! Downloads land in a flat directory (by default `BlobStorageFiles` next to
//! the running executable) under a name built from the container, the blob
//! name and the local download time. Writes go to a `.partial` file that is
//! fsynced and renamed into place, so a crashed download never leaves a
//! truncated file under the final name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{Result, StorageError};
use crate::transport::ByteStream;

/// Directory name used when no download directory is configured.
pub const DEFAULT_DOWNLOAD_DIR_NAME: &str = "BlobStorageFiles";

/// Timestamp suffix of downloaded file names.
const FILE_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `BlobStorageFiles` beside the executable, or beside the working
/// directory if the executable path is unknown.
pub fn default_download_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DOWNLOAD_DIR_NAME)
}

/// `{container}_{name with '/' replaced by '-'}_{yyyy-MM-dd_HH-mm-ss}`
pub fn local_file_name(container: &str, name: &str, at: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}",
        container,
        name.replace('/', "-"),
        at.format(FILE_TIME_FORMAT)
    )
}

/// Stream `stream` into `path`, creating parent directories. Returns the
/// number of bytes written. On any failure the partial file is removed.
pub async fn write_stream(path: &Path, stream: ByteStream) -> Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(path);
    match write_then_rename(&partial, path, stream).await {
        Ok(written) => {
            debug!("Wrote {} bytes to {}", written, path.display());
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn write_then_rename(partial: &Path, path: &Path, mut stream: ByteStream) -> Result<u64> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| StorageError::backend("download", e))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(partial, path).await?;
    Ok(written)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.partial", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use futures::stream;

    fn chunks(parts: Vec<anyhow::Result<Bytes>>) -> ByteStream {
        stream::iter(parts).boxed()
    }

    #[test]
    fn test_local_file_name() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
        assert_eq!(
            local_file_name("oracle-lobs", "pst/AR_FIRMWARE", at),
            "oracle-lobs_pst-AR_FIRMWARE_2024-03-09_07-05-02"
        );
    }

    #[test]
    fn test_default_download_dir_name() {
        assert!(default_download_dir().ends_with(DEFAULT_DOWNLOAD_DIR_NAME));
    }

    #[tokio::test]
    async fn test_write_stream_creates_dir_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");

        let written = write_stream(
            &path,
            chunks(vec![Ok(Bytes::from("hello ")), Ok(Bytes::from("world"))]),
        )
        .await
        .unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_stream_io_error_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory at the target makes the final rename fail.
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("inner"), b"x").unwrap();

        let err = write_stream(&path, chunks(vec![Ok(Bytes::from("data"))]))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)));
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["taken"]);
    }

    #[tokio::test]
    async fn test_write_stream_error_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bin");

        let err = write_stream(
            &path,
            chunks(vec![
                Ok(Bytes::from("partial")),
                Err(anyhow::anyhow!("connection reset")),
            ]),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Backend { .. }));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
