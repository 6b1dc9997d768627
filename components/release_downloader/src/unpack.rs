// components/release_downloader/src/unpack.rs
use crate::error::{DownloadError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Directory an archive unpacks into: the archive path minus its extension
pub fn unpack_dir(archive: &Path) -> PathBuf {
    archive.with_extension("")
}

/// Unpack a zip archive beside itself, delete the archive and list the
/// unpacked files
pub async fn unpack_archive(archive: &Path) -> Result<Vec<PathBuf>> {
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_blocking(&archive))
        .await
        .map_err(|e| DownloadError::io("unpack archive", PathBuf::new(), std::io::Error::other(e)))?
}

fn unpack_blocking(archive: &Path) -> Result<Vec<PathBuf>> {
    let dir = unpack_dir(archive);
    let file = File::open(archive).map_err(|e| DownloadError::io("open archive", archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| DownloadError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;
    zip.extract(&dir).map_err(|source| DownloadError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;
    drop(zip);

    std::fs::remove_file(archive).map_err(|e| DownloadError::io("remove archive", archive, e))?;
    let files = list_files(&dir);
    info!(dir = %dir.display(), files = files.len(), "unpacked archive");
    Ok(files)
}

/// Files below `dir`, sorted
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn unpacks_into_sibling_directory() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("Artist - Album.zip");
        write_zip(
            &archive,
            &[("01 One.flac", b"one"), ("02 Two.flac", b"two"), ("cover.jpg", b"jpg")],
        );

        let files = unpack_archive(&archive).await.unwrap();

        assert!(!archive.exists());
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["01 One.flac", "02 Two.flac", "cover.jpg"]);
        assert!(files.iter().all(|f| f.starts_with(dir.path().join("Artist - Album"))));
    }

    #[tokio::test]
    async fn corrupt_archive_is_an_archive_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"not a zip").unwrap();

        assert_matches!(
            unpack_archive(&archive).await,
            Err(DownloadError::Archive { .. })
        );
        assert!(archive.exists());
    }
}
