use chrono::{DateTime, FixedOffset, NaiveDateTime};
use std::error::Error;
use std::fmt;
use std::io;

/// Timestamp layout used inside `.rsh` header files.
///
/// Header timestamps carry no timezone of their own; recordings are taken in a
/// fixed lab-local zone (US Eastern, UTC-5).
pub const ACQUISITION_DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Lab-local UTC offset applied to header timestamps, in seconds west of UTC.
pub const LAB_UTC_OFFSET_WEST: i32 = 5 * 3600;

/// Metadata parsed from one trial's `.rsh` header file.
///
/// One header exists per (channel, trial) pair. It declares the acquisition
/// timestamp, the per-frame sample timing and the ordered list of raw data
/// files making up the trial.
#[derive(Debug, Clone)]
pub struct TrialHeader {
    /// Name of the monitor bitmap file (`.rsm`), first entry of the file list
    pub bitmap_file: String,
    /// Raw data file names (`.rsd`) in acquisition order
    pub raw_files: Vec<String>,
    /// Acquisition timestamp string as written in the header
    pub acquisition_date: String,
    /// Frame sample rate (Hz), reciprocal of the declared sample time
    pub sample_rate: f64,
    /// Number of frames per page declared by the acquisition software.
    /// Advisory only: the decoder recomputes the frame count of every raw
    /// file from its byte length.
    pub declared_frames: usize,
}

impl TrialHeader {
    /// Parses the acquisition timestamp into a naive (zone-less) datetime.
    pub fn acquisition_datetime(&self) -> Result<NaiveDateTime, FretError> {
        NaiveDateTime::parse_from_str(&self.acquisition_date, ACQUISITION_DATE_FORMAT).map_err(
            |e| {
                FretError::Parse(format!(
                    "invalid acquisition date '{}': {}",
                    self.acquisition_date, e
                ))
            },
        )
    }

    /// Acquisition timestamp localized to the lab's fixed UTC offset.
    pub fn acquisition_datetime_local(&self) -> Result<DateTime<FixedOffset>, FretError> {
        let naive = self.acquisition_datetime()?;
        let offset = FixedOffset::west_opt(LAB_UTC_OFFSET_WEST)
            .ok_or_else(|| FretError::Parse("invalid lab UTC offset".to_string()))?;
        naive
            .and_local_timezone(offset)
            .single()
            .ok_or_else(|| FretError::Parse("ambiguous local timestamp".to_string()))
    }
}

/// One of the two parallel optical acquisition paths recorded for each trial.
///
/// File names carry the channel as a suffix: `<prefix>-<trial>_A.rsh` holds
/// donor data, `<prefix>-<trial>_B.rsh` acceptor data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FretChannel {
    /// Donor fluorophore path (file suffix `A`)
    Donor,
    /// Acceptor fluorophore path (file suffix `B`)
    Acceptor,
}

impl FretChannel {
    /// Single-letter suffix used in header and raw file names.
    pub fn suffix(&self) -> char {
        match self {
            FretChannel::Donor => 'A',
            FretChannel::Acceptor => 'B',
        }
    }

    /// Series name used when the channel is written to an output container.
    pub fn series_name(&self) -> &'static str {
        match self {
            FretChannel::Donor => "donor",
            FretChannel::Acceptor => "acceptor",
        }
    }
}

impl fmt::Display for FretChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.series_name())
    }
}

/// Identity and timing attached to one channel's frame series when it is
/// handed to an output sink.
#[derive(Debug, Clone)]
pub struct SeriesInfo {
    /// Which acquisition path the frames belong to
    pub channel: FretChannel,
    /// Trial label the series was recorded in
    pub trial: String,
    /// Name of the per-trial group the series belongs to in the output
    pub group: String,
    /// Start offset in seconds from the session start time
    pub starting_time: f64,
    /// Frame rate (Hz)
    pub rate: f64,
    /// Fluorophore name for this channel
    pub fluorophore: String,
    /// Free-text channel description
    pub description: String,
    /// Measurement unit of the frame samples
    pub unit: String,
    /// Emission wavelength (nm)
    pub emission_lambda: f64,
}

/// Layout of a session directory: the shared filename prefix and the trials
/// discovered from session-level header files.
#[derive(Debug, Clone)]
pub struct SessionLayout {
    /// Common prefix of all header and raw file names
    pub prefix: String,
    /// Session-level header file names (no channel suffix), sorted
    pub session_headers: Vec<String>,
    /// Trial labels extracted from the session header names, in order
    pub trials: Vec<String>,
}

/// Result of a whole-session conversion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// All trials were streamed into the sink
    Completed {
        /// Number of trials converted
        trials: usize,
        /// Total frames written across both channels
        frames: usize,
    },
    /// The sink's preset session start time disagreed with the headers; the
    /// optical conversion was skipped and the sink left untouched
    SkippedTimestampMismatch,
}

/// Error conditions raised while importing FRET recordings.
#[derive(Debug)]
pub enum FretError {
    /// No session header files were found in the source directory
    DirectoryNotFound(String),
    /// A header file is missing a required field or its file list sentinel
    Format(String),
    /// A numeric or timestamp field could not be parsed
    Parse(String),
    /// A raw data file exceeds the supported single-read size
    Capacity {
        /// Offending file path
        path: String,
        /// File length in bytes
        len: u64,
    },
    /// A raw data file's sample count does not divide into whole frames
    Geometry(String),
    /// Donor/acceptor metadata disagree within a trial, or a trial starts
    /// before the session
    Consistency(String),
    /// Session header timestamp disagrees with the container's start time
    TimestampMismatch,
    /// The conversion configuration file could not be loaded
    Config(String),
    /// An I/O error occurred while reading source files
    Io(io::Error),
}

impl fmt::Display for FretError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FretError::DirectoryNotFound(dir) => {
                write!(f, "no .rsh header files found in directory: {}", dir)
            }
            FretError::Format(msg) => write!(f, "malformed header: {}", msg),
            FretError::Parse(msg) => write!(f, "parse error: {}", msg),
            FretError::Capacity { path, len } => write!(
                f,
                "raw data file {} is {} bytes, above the supported read size",
                path, len
            ),
            FretError::Geometry(msg) => write!(f, "frame geometry error: {}", msg),
            FretError::Consistency(msg) => write!(f, "channel consistency error: {}", msg),
            FretError::TimestampMismatch => write!(
                f,
                "session start time in container does not match header files"
            ),
            FretError::Config(msg) => write!(f, "configuration error: {}", msg),
            FretError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for FretError {}

impl From<io::Error> for FretError {
    fn from(error: io::Error) -> Self {
        FretError::Io(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_date(date: &str) -> TrialHeader {
        TrialHeader {
            bitmap_file: "monitor.rsm".to_string(),
            raw_files: vec!["sess-01_A.rsd".to_string()],
            acquisition_date: date.to_string(),
            sample_rate: 100.0,
            declared_frames: 256,
        }
    }

    #[test]
    fn channel_suffixes_and_names() {
        assert_eq!(FretChannel::Donor.suffix(), 'A');
        assert_eq!(FretChannel::Acceptor.suffix(), 'B');
        assert_eq!(FretChannel::Donor.series_name(), "donor");
        assert_eq!(FretChannel::Acceptor.to_string(), "acceptor");
    }

    #[test]
    fn acquisition_date_parses_to_lab_local_time() {
        let header = header_with_date("2019/06/14 16:35:21");
        let naive = header.acquisition_datetime().unwrap();
        assert_eq!(naive.to_string(), "2019-06-14 16:35:21");

        let local = header.acquisition_datetime_local().unwrap();
        assert_eq!(local.offset().local_minus_utc(), -LAB_UTC_OFFSET_WEST);
        assert_eq!(local.naive_local(), naive);
    }

    #[test]
    fn bad_acquisition_date_is_parse_error() {
        let header = header_with_date("June 14th 2019");
        assert!(matches!(
            header.acquisition_datetime(),
            Err(FretError::Parse(_))
        ));
    }
}
