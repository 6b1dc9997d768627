//! Release primitives shared by the downloader components
//!
//! This component provides the identity and descriptor types that flow
//! between page extraction, acquisition, transfer and the download ledger:
//! - `ReleaseId` is the dedup key (structured kind + id, or a normalized URL)
//! - `ReleaseDescriptor` is everything extracted from one release page
//! - `LabelDescriptor` is the deduplicated listing of a collection page
//! - `AudioFormat` maps user-facing format names to platform download keys
//!
//! # Examples
//!
//! ```
//! use release_primitives::{AudioFormat, ReleaseId};
//!
//! let id: ReleaseId = "a:12345".parse().unwrap();
//! assert_eq!(id, ReleaseId::album(12345));
//! assert_eq!(id.to_string(), "a:12345");
//!
//! let format: AudioFormat = "V0MP3".parse().unwrap();
//! assert_eq!(format.platform_key(), "mp3-v0");
//! ```

mod descriptor;
mod format;
mod id;

pub use descriptor::{AcquisitionHint, LabelDescriptor, Offer, ReleaseDescriptor, ReleaseRef};
pub use format::{AudioFormat, UnknownFormat};
pub use id::{normalize_url, InvalidReleaseId, ReleaseId, ReleaseKind};
