//! Session output
//!
//! A session is the output root of one run. Each modality writes into its own
//! subdirectory:
//!
//! ```text
//! <root>/
//! ├── camera_1/
//! │   ├── images/image0.jpg, image1.jpg, ...
//! │   └── timestamps.txt          image<seq> <timestamp_ms>
//! └── sonar/
//!     ├── images/image0.jpg, ...
//!     └── raw/frame0.txt, ...     image<seq> <timestamp_ms> + intensity matrix
//! ```
//!
//! The layout is consumed by the ingestion pipeline and must stay stable. This
//! crate creates directories but never deletes anything.

pub mod artifacts;
pub mod writer;

pub use artifacts::{CameraArtifacts, SonarArtifacts};
pub use writer::{PersistenceReport, PersistenceWriter};

use crate::data::{Modality, Sample};
use crate::error::CaptureResult;
use std::path::{Path, PathBuf};

/// Output root for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    root: PathBuf,
}

impl Session {
    /// Session rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Session root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<modality dir>`.
    pub fn modality_dir(&self, modality: Modality) -> PathBuf {
        self.root.join(modality.session_dir_name())
    }

    /// `<root>/<modality dir>/images`.
    pub fn images_dir(&self, modality: Modality) -> PathBuf {
        self.modality_dir(modality).join("images")
    }

    /// File name of the artifact for sequence number `seq`.
    pub fn image_name(seq: u64) -> String {
        format!("image{seq}.jpg")
    }
}

/// Modality-specific durable-storage strategy.
///
/// Implementations do blocking filesystem I/O; the persistence writer calls them
/// from a blocking thread.
pub trait ArtifactWriter: Send {
    /// Create directories and open index files. Called once before the first write.
    fn prepare(&mut self) -> CaptureResult<()>;

    /// Transform and write one sample as sequence number `seq`.
    fn write(&mut self, seq: u64, sample: &Sample) -> CaptureResult<()>;

    /// Flush and close. Called once after the last write.
    fn finish(&mut self) -> CaptureResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_follows_modality_names() {
        let session = Session::new("/data/run7");
        assert_eq!(session.images_dir(Modality::Camera), PathBuf::from("/data/run7/camera_1/images"));
        assert_eq!(session.modality_dir(Modality::Sonar), PathBuf::from("/data/run7/sonar"));
        assert_eq!(Session::image_name(12), "image12.jpg");
    }
}
