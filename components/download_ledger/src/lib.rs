//! Download history ledger
//!
//! One line per release:
//!
//! ```text
//! a:12345;Artist - Album.zip;81234567;zipped
//! t:777;Artist - Single.flac;9876543;unzipped
//! ```
//!
//! New releases are appended, state transitions rewrite the file through a
//! temporary sibling and an atomic rename. Lines that fail to parse are
//! skipped on load. The ledger is advisory: an entry only counts as complete
//! while its artifact is still on disk with the recorded size.

mod error;
mod failures;

pub use error::{LedgerError, Result};
pub use failures::{FailureLog, FailureRecord};

use parking_lot::Mutex;
use release_primitives::ReleaseId;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Post-transfer state of a release artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Archive transferred, not yet unpacked
    Archived,
    /// Archive unpacked (or a single-file artifact tagged)
    Unpacked,
}

impl ArtifactState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactState::Archived => "zipped",
            ArtifactState::Unpacked => "unzipped",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "zipped" => Some(ArtifactState::Archived),
            "unzipped" => Some(ArtifactState::Unpacked),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// File or directory name relative to the download directory
    pub artifact_name: String,
    pub bytes: u64,
    pub state: ArtifactState,
}

pub struct Ledger {
    path: PathBuf,
    artifact_root: PathBuf,
    entries: Mutex<BTreeMap<ReleaseId, LedgerEntry>>,
}

impl Ledger {
    /// Open (or create) the ledger file at `path`
    ///
    /// Artifact names are resolved against `artifact_root`.
    pub fn open(path: impl AsRef<Path>, artifact_root: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| LedgerError::io("create ledger directory", parent, e))?;
        }

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(LedgerError::io("read ledger", &path, e)),
        };

        let mut entries = BTreeMap::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            match parse_line(line) {
                Some((id, entry)) => {
                    entries.insert(id, entry);
                }
                None => debug!(line, "skipping malformed ledger line"),
            }
        }

        debug!(path = %path.display(), entries = entries.len(), "ledger loaded");

        Ok(Self {
            path,
            artifact_root: artifact_root.as_ref().to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self, id: &ReleaseId) -> Option<LedgerEntry> {
        self.entries.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// True only if the entry is in `desired` state and its artifact still
    /// exists with the recorded size
    pub fn is_complete(&self, id: &ReleaseId, desired: ArtifactState) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        if entry.state != desired {
            return false;
        }

        let artifact = self.artifact_root.join(&entry.artifact_name);
        match artifact_size(&artifact) {
            Ok(size) if size == entry.bytes => true,
            Ok(size) => {
                debug!(%id, recorded = entry.bytes, actual = size, "artifact size changed");
                false
            }
            Err(_) => {
                debug!(%id, artifact = %artifact.display(), "artifact missing");
                false
            }
        }
    }

    /// Record a freshly transferred release
    ///
    /// An existing entry for the same id (forced re-download) is replaced.
    pub fn record_new(
        &self,
        id: &ReleaseId,
        artifact_name: &str,
        bytes: u64,
        state: ArtifactState,
    ) -> Result<()> {
        let entry = make_entry(artifact_name, bytes, state)?;
        let mut entries = self.entries.lock();

        if entries.contains_key(id) {
            entries.insert(id.clone(), entry);
            return self.rewrite(&entries);
        }

        let mut line = format_line(id, &entry);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io("open ledger for append", &self.path, e))?;
        if !ends_with_newline(&mut file)
            .map_err(|e| LedgerError::io("inspect ledger tail", &self.path, e))?
        {
            debug!(path = %self.path.display(), "ledger lacks a final newline");
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| LedgerError::io("append ledger entry", &self.path, e))?;

        info!(%id, artifact = artifact_name, %state, "ledger entry recorded");
        entries.insert(id.clone(), entry);
        Ok(())
    }

    /// Move an existing entry to a new artifact and state
    pub fn advance_state(
        &self,
        id: &ReleaseId,
        artifact_name: &str,
        bytes: u64,
        state: ArtifactState,
    ) -> Result<()> {
        let entry = make_entry(artifact_name, bytes, state)?;
        let mut entries = self.entries.lock();

        let Some(existing) = entries.get_mut(id) else {
            return Err(LedgerError::UnknownRelease(id.clone()));
        };
        *existing = entry;

        info!(%id, artifact = artifact_name, %state, "ledger entry advanced");
        self.rewrite(&entries)
    }

    /// Forget every release
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.clear();
        self.rewrite(&entries)?;
        info!(path = %self.path.display(), "download history cleared");
        Ok(())
    }

    fn rewrite(&self, entries: &BTreeMap<ReleaseId, LedgerEntry>) -> Result<()> {
        let contents: String = entries
            .iter()
            .map(|(id, entry)| format_line(id, entry))
            .collect();

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(|e| LedgerError::io("write ledger", &tmp, e))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| LedgerError::io("replace ledger", &self.path, e))
    }
}

/// Size of an artifact: file length, or the summed size of every file
/// below a directory
pub fn artifact_size(path: &Path) -> std::io::Result<u64> {
    let metadata = fs::metadata(path)?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }

    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::other)?.len();
        }
    }
    Ok(total)
}

fn make_entry(artifact_name: &str, bytes: u64, state: ArtifactState) -> Result<LedgerEntry> {
    if artifact_name.is_empty() || artifact_name.contains(['\n', '\r']) {
        return Err(LedgerError::InvalidArtifactName(artifact_name.to_string()));
    }
    Ok(LedgerEntry {
        artifact_name: artifact_name.to_string(),
        bytes,
        state,
    })
}

/// An empty file counts as terminated
fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn format_line(id: &ReleaseId, entry: &LedgerEntry) -> String {
    format!(
        "{};{};{};{}\n",
        id, entry.artifact_name, entry.bytes, entry.state
    )
}

fn parse_line(line: &str) -> Option<(ReleaseId, LedgerEntry)> {
    let (id, rest) = line.trim_end().split_once(';')?;
    let mut fields = rest.rsplitn(3, ';');
    let state = ArtifactState::parse(fields.next()?)?;
    let bytes = fields.next()?.parse::<u64>().ok()?;
    let artifact_name = fields.next()?.to_string();

    if artifact_name.is_empty() {
        return None;
    }

    Some((
        id.parse().ok()?,
        LedgerEntry {
            artifact_name,
            bytes,
            state,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Ledger) {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path().join("history/downloaded.txt"), dir.path()).unwrap();
        (dir, ledger)
    }

    #[test]
    fn complete_only_while_artifact_matches() {
        let (dir, ledger) = setup();
        let id = ReleaseId::album(12345);
        fs::write(dir.path().join("Artist - Album.zip"), b"0123456789").unwrap();

        ledger
            .record_new(&id, "Artist - Album.zip", 10, ArtifactState::Archived)
            .unwrap();

        assert!(ledger.is_complete(&id, ArtifactState::Archived));
        assert!(!ledger.is_complete(&id, ArtifactState::Unpacked));

        fs::remove_file(dir.path().join("Artist - Album.zip")).unwrap();
        assert!(!ledger.is_complete(&id, ArtifactState::Archived));
        assert_eq!(ledger.entry(&id).unwrap().bytes, 10);
    }

    #[test]
    fn size_mismatch_is_incomplete() {
        let (dir, ledger) = setup();
        let id = ReleaseId::track(7);
        fs::write(dir.path().join("single.flac"), b"short").unwrap();

        ledger
            .record_new(&id, "single.flac", 999, ArtifactState::Unpacked)
            .unwrap();

        assert!(!ledger.is_complete(&id, ArtifactState::Unpacked));
    }

    #[test]
    fn append_after_unterminated_line_keeps_both_entries() {
        let (dir, ledger) = setup();
        let history = dir.path().join("history/downloaded.txt");
        ledger
            .record_new(&ReleaseId::album(1), "one.zip", 3, ArtifactState::Archived)
            .unwrap();
        drop(ledger);

        let torn = fs::read_to_string(&history).unwrap();
        fs::write(&history, torn.trim_end()).unwrap();

        let ledger = Ledger::open(&history, dir.path()).unwrap();
        ledger
            .record_new(&ReleaseId::album(2), "two.zip", 5, ArtifactState::Archived)
            .unwrap();
        drop(ledger);

        assert_eq!(
            fs::read_to_string(&history).unwrap(),
            "a:1;one.zip;3;zipped\na:2;two.zip;5;zipped\n"
        );
        let reopened = Ledger::open(&history, dir.path()).unwrap();
        assert_eq!(reopened.entry(&ReleaseId::album(1)).unwrap().artifact_name, "one.zip");
        assert_eq!(reopened.entry(&ReleaseId::album(2)).unwrap().artifact_name, "two.zip");
    }

    #[test]
    fn entries_survive_reopen() {
        let (dir, ledger) = setup();
        let id = ReleaseId::album(1);
        ledger
            .record_new(&id, "one.zip", 3, ArtifactState::Archived)
            .unwrap();
        drop(ledger);

        let reopened = Ledger::open(dir.path().join("history/downloaded.txt"), dir.path()).unwrap();
        assert_eq!(
            reopened.entry(&id),
            Some(LedgerEntry {
                artifact_name: "one.zip".to_string(),
                bytes: 3,
                state: ArtifactState::Archived,
            })
        );
    }

    #[test]
    fn advancing_rewrites_in_place() {
        let (dir, ledger) = setup();
        let id = ReleaseId::album(1);
        let other = ReleaseId::track(2);
        ledger.record_new(&id, "one.zip", 3, ArtifactState::Archived).unwrap();
        ledger.record_new(&other, "two.flac", 4, ArtifactState::Unpacked).unwrap();

        ledger.advance_state(&id, "one", 12, ArtifactState::Unpacked).unwrap();

        let contents = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(contents, "a:1;one;12;unzipped\nt:2;two.flac;4;unzipped\n");
        assert!(!dir.path().join("history/downloaded.tmp").exists());
    }

    #[test]
    fn advancing_unknown_release_fails() {
        let (_dir, ledger) = setup();
        assert_matches!(
            ledger.advance_state(&ReleaseId::album(5), "x", 1, ArtifactState::Unpacked),
            Err(LedgerError::UnknownRelease(_))
        );
    }

    #[test]
    fn unpacked_directory_size_is_summed() {
        let (dir, ledger) = setup();
        let id = ReleaseId::album(9);
        let album = dir.path().join("Artist - Album");
        fs::create_dir_all(album.join("extras")).unwrap();
        fs::write(album.join("01.flac"), b"abcd").unwrap();
        fs::write(album.join("extras/cover.jpg"), b"xy").unwrap();

        ledger
            .record_new(&id, "Artist - Album", 6, ArtifactState::Unpacked)
            .unwrap();
        assert!(ledger.is_complete(&id, ArtifactState::Unpacked));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloaded.txt");
        fs::write(
            &path,
            "a:1;one.zip;3;zipped\n\
             garbage\n\
             a:12\n\
             t:x;bad.flac;3;zipped\n\
             a:2;two.zip;notanumber;zipped\n\
             a:3;three.zip;3;exploded\n\
             u:https://x.bandcamp.com/album/y;Name; with; semis.zip;5;unzipped\n",
        )
        .unwrap();

        let ledger = Ledger::open(&path, dir.path()).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger
                .entry(&"u:https://x.bandcamp.com/album/y".parse().unwrap())
                .unwrap()
                .artifact_name,
            "Name; with; semis.zip"
        );
    }

    #[test]
    fn clear_forgets_everything() {
        let (_dir, ledger) = setup();
        ledger
            .record_new(&ReleaseId::album(1), "one.zip", 3, ArtifactState::Archived)
            .unwrap();
        ledger.clear().unwrap();

        assert!(ledger.is_empty());
        assert_eq!(fs::read_to_string(ledger.path()).unwrap(), "");
    }

    #[test]
    fn forced_redownload_replaces_entry() {
        let (_dir, ledger) = setup();
        let id = ReleaseId::album(1);
        ledger.record_new(&id, "old.zip", 3, ArtifactState::Unpacked).unwrap();
        ledger.record_new(&id, "new.zip", 4, ArtifactState::Archived).unwrap();

        let contents = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(contents, "a:1;new.zip;4;zipped\n");
    }

    #[rstest]
    #[case("")]
    #[case("two\nlines.zip")]
    fn unstorable_names_are_rejected(#[case] name: &str) {
        let (_dir, ledger) = setup();
        assert_matches!(
            ledger.record_new(&ReleaseId::album(1), name, 1, ArtifactState::Archived),
            Err(LedgerError::InvalidArtifactName(_))
        );
    }
}
