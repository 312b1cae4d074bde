//! Audio file I/O and long-input segmentation.

pub mod io;
pub mod segment;

pub use io::{load_audio, read_audio, write_wav};
pub use segment::{input_stem, read_manifest, timestamps_path, ManifestEntry, SilenceSegmenter};
