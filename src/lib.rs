mod config;
mod convert;
mod reader;
pub mod types;

use std::path::Path;

// Re-export types
pub use config::{load_config, ChannelMetadata, ConversionConfig};
pub use convert::{
    convert_session, scan_session, session_start_time, trial_header_path, FrameSink, MemorySink,
};
pub use reader::{
    decode_block, frame_count, read_raw_samples, read_trial_header, split_block, FrameStream,
    BLOCK_COLS, BLOCK_ROWS, EXCESS_ROWS, IMAGE_ROWS, SAMPLES_PER_FRAME,
};
pub use types::*;

/// Loads one trial's header and opens a lazy frame stream over its raw data.
///
/// The header is read once; frames are decoded file by file as the stream is
/// pulled.
///
/// # Examples
///
/// ```no_run
/// use fret_importer::{load_trial, FretChannel};
///
/// let (header, frames) = load_trial("path/to/session", "sess", "01", FretChannel::Donor).unwrap();
/// println!("Sample rate: {} Hz", header.sample_rate);
/// for frame in frames {
///     let frame = frame.unwrap();
///     assert_eq!(frame.shape(), &[100, 100]);
/// }
/// ```
pub fn load_trial<P: AsRef<Path>>(
    dir: P,
    prefix: &str,
    trial: &str,
    channel: FretChannel,
) -> Result<(TrialHeader, FrameStream), FretError> {
    let dir = dir.as_ref();
    let header = read_trial_header(trial_header_path(dir, prefix, trial, channel))?;
    let stream = FrameStream::open(dir, &header);
    Ok((header, stream))
}
