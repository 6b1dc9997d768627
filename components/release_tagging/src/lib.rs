use lofty::{Accessor, AudioFile, ItemKey, LoftyError, Probe, Tag, TaggedFileExt};
use release_primitives::ReleaseDescriptor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum TagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lofty error: {0}")]
    Lofty(#[from] LoftyError),
}

/// Fields written to every audio file of a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTags {
    /// Canonical release page
    pub website: String,
    pub genre: Option<String>,
    /// About text and credits separated by a blank line
    pub comment: String,
}

impl ReleaseTags {
    pub fn from_descriptor(release: &ReleaseDescriptor) -> Self {
        let genre = if release.tags.is_empty() {
            None
        } else {
            Some(
                release
                    .tags
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };

        let comment = format!("{}\n\n{}", release.about.trim(), release.credits)
            .trim()
            .to_string();

        Self {
            website: release.page_url.to_string(),
            genre,
            comment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    Tagged,
    /// Not an audio container lofty can write (cover art, text files)
    Unsupported,
}

/// Write release tags into a single audio file
pub fn tag_file(path: impl AsRef<Path>, tags: &ReleaseTags) -> Result<TagOutcome, TagError> {
    let path = path.as_ref();

    let probe = Probe::open(path)?.guess_file_type()?;
    if probe.file_type().is_none() {
        return Ok(TagOutcome::Unsupported);
    }

    let mut tagged_file = probe.read()?;
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let Some(tag) = tagged_file.tag_mut(tag_type) else {
        return Ok(TagOutcome::Unsupported);
    };

    tag.insert_text(ItemKey::AudioSourceUrl, tags.website.clone());
    if let Some(genre) = &tags.genre {
        tag.set_genre(genre.clone());
    }
    if !tags.comment.is_empty() {
        tag.set_comment(tags.comment.clone());
    }

    tagged_file.save_to_path(path)?;
    Ok(TagOutcome::Tagged)
}

/// Tag every file of an unpacked release, returning the files that were tagged
///
/// Failures are logged and skipped; a release is never failed over tags.
pub fn tag_release(files: &[PathBuf], tags: &ReleaseTags) -> Vec<PathBuf> {
    let mut tagged = Vec::new();
    for file in files {
        match tag_file(file, tags) {
            Ok(TagOutcome::Tagged) => tagged.push(file.clone()),
            Ok(TagOutcome::Unsupported) => {
                debug!(file = %file.display(), "not an audio file, leaving untagged");
            }
            Err(error) => warn!(file = %file.display(), %error, "failed to tag file"),
        }
    }
    tagged
}
