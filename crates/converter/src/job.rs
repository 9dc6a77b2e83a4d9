use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Boolean transformations applied on top of the target format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionFlags {
    /// Play the output backwards
    pub reverse: bool,
    /// Strip the audio track
    pub mute: bool,
}

/// An immutable conversion request handed to the worker pool.
///
/// The job only carries the id of its status record; progress and the
/// terminal outcome are written through the `StatusStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub id: String,
    /// Already-materialized source file; deleted once the job is terminal
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Requested target format, validated by the supervisor
    pub format: String,
    pub flags: ConversionFlags,
}

impl ConversionJob {
    /// Create a job with a fresh UUID v4 identifier
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        format: impl Into<String>,
        flags: ConversionFlags,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            destination: destination.into(),
            format: format.into(),
            flags,
        }
    }

    /// File name of the destination, used for listings
    pub fn output_name(&self) -> String {
        output_name(&self.destination)
    }
}

/// Final path component of `destination`, empty when there is none
pub fn output_name(destination: &Path) -> String {
    destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_gets_unique_ids() {
        let a = ConversionJob::new("/tmp/a.mov", "/tmp/out/a.mp4", "mp4", ConversionFlags::default());
        let b = ConversionJob::new("/tmp/a.mov", "/tmp/out/a.mp4", "mp4", ConversionFlags::default());
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_output_name() {
        let job = ConversionJob::new("/in/clip.mov", "/out/clip.webm", "webm", ConversionFlags::default());
        assert_eq!(job.output_name(), "clip.webm");
        assert_eq!(output_name(Path::new("/")), "");
    }
}
