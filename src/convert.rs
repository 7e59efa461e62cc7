use chrono::NaiveDateTime;
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ChannelMetadata, ConversionConfig};
use crate::reader::{read_trial_header, FrameStream};
use crate::types::*;

// Frames buffered per sink append; bounds memory to a window of the trial
const FRAME_CHUNK: usize = 256;

/// Destination for decoded frame series.
///
/// The output container is an external contract; this trait is the seam it is
/// reached through. Frames arrive in bounded chunks, strictly in acquisition
/// order, and each series is tagged with its channel, trial, start offset and
/// rate.
pub trait FrameSink {
    /// Session start time already recorded in the container, if any.
    fn session_start(&self) -> Option<NaiveDateTime> {
        None
    }

    /// Whether the container already holds trial intervals.
    fn has_trials(&self) -> bool {
        false
    }

    /// Appends a chunk of 100x100 frames to the series identified by `info`.
    ///
    /// Called repeatedly for the same series until its frames are exhausted.
    fn write_frames(&mut self, info: &SeriesInfo, frames: &[Array2<i16>]) -> Result<(), FretError>;

    /// Records one trial interval (seconds from session start).
    fn add_trial(&mut self, start_time: f64, stop_time: f64) -> Result<(), FretError>;
}

/// Sink that collects everything in memory.
///
/// Useful for tests and for inspecting a conversion before wiring a real
/// container backend.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Preset session start time, to emulate a container created earlier
    pub start_time: Option<NaiveDateTime>,
    /// Collected series with their frames, in write order
    pub series: Vec<(SeriesInfo, Vec<Array2<i16>>)>,
    /// Collected trial intervals
    pub trials: Vec<(f64, f64)>,
}

impl FrameSink for MemorySink {
    fn session_start(&self) -> Option<NaiveDateTime> {
        self.start_time
    }

    fn has_trials(&self) -> bool {
        !self.trials.is_empty()
    }

    fn write_frames(&mut self, info: &SeriesInfo, frames: &[Array2<i16>]) -> Result<(), FretError> {
        let existing = self
            .series
            .iter_mut()
            .find(|(s, _)| s.channel == info.channel && s.trial == info.trial);
        match existing {
            Some((_, stored)) => stored.extend_from_slice(frames),
            None => self.series.push((info.clone(), frames.to_vec())),
        }
        Ok(())
    }

    fn add_trial(&mut self, start_time: f64, stop_time: f64) -> Result<(), FretError> {
        self.trials.push((start_time, stop_time));
        Ok(())
    }
}

/// Scans a session directory for session-level header files.
///
/// Session headers are the `.rsh` files without a channel suffix; each one
/// names a trial as `<prefix>-<trial>.rsh`. Per-channel headers (`_A`/`_B`)
/// are resolved from the same prefix and trial labels.
pub fn scan_session<P: AsRef<Path>>(dir: P) -> Result<SessionLayout, FretError> {
    let dir = dir.as_ref();
    let mut session_headers: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".rsh") && !name.contains("_A") && !name.contains("_B") {
            session_headers.push(name);
        }
    }
    if session_headers.is_empty() {
        return Err(FretError::DirectoryNotFound(dir.display().to_string()));
    }
    session_headers.sort();

    let mut trials = Vec::with_capacity(session_headers.len());
    let mut prefix = String::new();
    for name in &session_headers {
        let stem = name.trim_end_matches(".rsh");
        let (p, trial) = stem.split_once('-').ok_or_else(|| {
            FretError::Format(format!(
                "header name '{}' does not follow <prefix>-<trial>.rsh",
                name
            ))
        })?;
        if prefix.is_empty() {
            prefix = p.to_string();
        }
        trials.push(trial.to_string());
    }

    Ok(SessionLayout {
        prefix,
        session_headers,
        trials,
    })
}

/// Path of the per-channel header for one trial.
pub fn trial_header_path<P: AsRef<Path>>(
    dir: P,
    prefix: &str,
    trial: &str,
    channel: FretChannel,
) -> PathBuf {
    dir.as_ref()
        .join(format!("{}-{}_{}.rsh", prefix, trial, channel.suffix()))
}

/// Session start time: the acquisition timestamp of the first session header.
pub fn session_start_time<P: AsRef<Path>>(
    dir: P,
    layout: &SessionLayout,
) -> Result<NaiveDateTime, FretError> {
    let header = read_trial_header(dir.as_ref().join(&layout.session_headers[0]))?;
    header.acquisition_datetime()
}

/// Converts every trial of a session, streaming both channels into `sink`.
///
/// For each trial the donor and acceptor headers must agree on acquisition
/// timestamp, sample rate and frame count, and the trial must not start
/// before the session; any violation fails the whole run with a
/// `Consistency` error before a frame of that trial is written. If the sink
/// already carries a session start time that disagrees with the header
/// files, the optical conversion is skipped with a warning and the sink is
/// left untouched.
pub fn convert_session<P: AsRef<Path>, S: FrameSink>(
    dir: P,
    config: &ConversionConfig,
    sink: &mut S,
) -> Result<ConversionOutcome, FretError> {
    let dir = dir.as_ref();
    let layout = scan_session(dir)?;
    let session_start = session_start_time(dir, &layout)?;

    if let Some(existing) = sink.session_start() {
        if existing != session_start {
            println!("Session start time in container does not match the start time from rsh files.");
            println!("Optical data conversion aborted.");
            return Ok(ConversionOutcome::SkippedTimestampMismatch);
        }
    }

    println!(
        "Converting optical data from device '{}' ({} nm excitation), {} trial{}.",
        config.device,
        config.excitation_lambda,
        layout.trials.len(),
        if layout.trials.len() != 1 { "s" } else { "" }
    );

    let add_trials = !sink.has_trials();
    if !add_trials {
        println!("Trials already exist in container. Optical trial intervals not added.");
    }

    let mut total_frames = 0usize;
    for trial in &layout.trials {
        let header_a = read_trial_header(trial_header_path(
            dir,
            &layout.prefix,
            trial,
            FretChannel::Donor,
        ))?;
        let header_b = read_trial_header(trial_header_path(
            dir,
            &layout.prefix,
            trial,
            FretChannel::Acceptor,
        ))?;
        check_channel_consistency(trial, &header_a, &header_b)?;

        let trial_start = header_a.acquisition_datetime()?;
        let offset_seconds = (trial_start - session_start).num_seconds();
        if offset_seconds < 0 {
            return Err(FretError::Consistency(format!(
                "starting time is negative. Trial={}",
                trial
            )));
        }
        let starting_time = offset_seconds as f64;

        for (channel, header) in [
            (FretChannel::Donor, &header_a),
            (FretChannel::Acceptor, &header_b),
        ] {
            let info = series_info(config, channel, trial, starting_time, header.sample_rate);
            println!("Adding channel {}, trial {}...", channel, trial);
            let stream = FrameStream::open(dir, header);
            total_frames += write_series(sink, &info, stream)?;
        }

        if add_trials {
            let stop_time =
                starting_time + header_a.declared_frames as f64 / header_a.sample_rate;
            sink.add_trial(starting_time, stop_time)?;
        }
    }

    Ok(ConversionOutcome::Completed {
        trials: layout.trials.len(),
        frames: total_frames,
    })
}

// Donor and acceptor must report the same basic parameters for a trial
fn check_channel_consistency(
    trial: &str,
    header_a: &TrialHeader,
    header_b: &TrialHeader,
) -> Result<(), FretError> {
    if header_a.acquisition_date != header_b.acquisition_date {
        return Err(FretError::Consistency(format!(
            "acquisition date of channels do not match. Trial={}",
            trial
        )));
    }
    if header_a.sample_rate != header_b.sample_rate {
        return Err(FretError::Consistency(format!(
            "sample rate of channels do not match. Trial={}",
            trial
        )));
    }
    if header_a.declared_frames != header_b.declared_frames {
        return Err(FretError::Consistency(format!(
            "number of frames of channels do not match. Trial={}",
            trial
        )));
    }
    Ok(())
}

fn series_info(
    config: &ConversionConfig,
    channel: FretChannel,
    trial: &str,
    starting_time: f64,
    rate: f64,
) -> SeriesInfo {
    let meta: &ChannelMetadata = match channel {
        FretChannel::Donor => &config.donor,
        FretChannel::Acceptor => &config.acceptor,
    };
    SeriesInfo {
        channel,
        trial: trial.to_string(),
        group: format!("{}_{}", config.fret_name, trial),
        starting_time,
        rate,
        fluorophore: meta.fluorophore.clone(),
        description: meta.description.clone(),
        unit: meta.unit.clone(),
        emission_lambda: meta.emission_lambda,
    }
}

// Pulls frames from the stream and appends them in bounded chunks
fn write_series<S: FrameSink>(
    sink: &mut S,
    info: &SeriesInfo,
    stream: FrameStream,
) -> Result<usize, FretError> {
    let mut buffer: Vec<Array2<i16>> = Vec::with_capacity(FRAME_CHUNK);
    let mut written = 0usize;
    for frame in stream {
        buffer.push(frame?);
        if buffer.len() == FRAME_CHUNK {
            sink.write_frames(info, &buffer)?;
            written += buffer.len();
            buffer.clear();
        }
    }
    if !buffer.is_empty() {
        sink.write_frames(info, &buffer)?;
        written += buffer.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SAMPLES_PER_FRAME;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_config() -> ConversionConfig {
        ConversionConfig {
            device: "OptDevice".to_string(),
            fret_name: "FRET".to_string(),
            excitation_lambda: 475.0,
            donor: ChannelMetadata {
                fluorophore: "mTFP1".to_string(),
                description: "donor channel".to_string(),
                unit: "a.u.".to_string(),
                emission_lambda: 492.0,
            },
            acceptor: ChannelMetadata {
                fluorophore: "mVenus".to_string(),
                description: "acceptor channel".to_string(),
                unit: "a.u.".to_string(),
                emission_lambda: 528.0,
            },
        }
    }

    fn write_header(
        dir: &TempDir,
        name: &str,
        date: &str,
        sample_time_ms: &str,
        frames: usize,
        raw_files: &[&str],
    ) {
        let mut body = String::new();
        body.push_str(&format!("acquisition_date = {}\n", date));
        body.push_str(&format!("sample_time = {} msec\n", sample_time_ms));
        body.push_str(&format!("page_frames = {}\n", frames));
        body.push_str("Data-File-List\n");
        body.push_str("monitor.rsm\n");
        for f in raw_files {
            body.push_str(f);
            body.push('\n');
        }
        let mut file = File::create(dir.path().join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    fn write_raw(dir: &TempDir, name: &str, num_frames: usize, fill: i16) {
        let mut file = File::create(dir.path().join(name)).unwrap();
        for _ in 0..num_frames * SAMPLES_PER_FRAME {
            file.write_i16::<LittleEndian>(fill).unwrap();
        }
    }

    // One-trial session: session header plus matched A/B channel pairs
    fn write_session(dir: &TempDir, date: &str) {
        write_header(dir, "sess-01.rsh", date, "10", 2, &["sess-01_A.rsd"]);
        write_header(dir, "sess-01_A.rsh", date, "10", 2, &["sess-01_A.rsd"]);
        write_header(dir, "sess-01_B.rsh", date, "10", 2, &["sess-01_B.rsd"]);
        write_raw(dir, "sess-01_A.rsd", 2, 7);
        write_raw(dir, "sess-01_B.rsd", 2, 9);
    }

    #[test]
    fn scan_finds_session_headers_only() {
        let dir = TempDir::new().unwrap();
        write_session(&dir, "2019/06/14 16:35:21");

        let layout = scan_session(dir.path()).unwrap();
        assert_eq!(layout.prefix, "sess");
        assert_eq!(layout.session_headers, vec!["sess-01.rsh".to_string()]);
        assert_eq!(layout.trials, vec!["01".to_string()]);
    }

    #[test]
    fn empty_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            scan_session(dir.path()),
            Err(FretError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn session_converts_end_to_end() {
        let dir = TempDir::new().unwrap();
        write_session(&dir, "2019/06/14 16:35:21");

        let mut sink = MemorySink::default();
        let outcome = convert_session(dir.path(), &test_config(), &mut sink).unwrap();

        assert_eq!(
            outcome,
            ConversionOutcome::Completed {
                trials: 1,
                frames: 4
            }
        );
        assert_eq!(sink.series.len(), 2);

        let (donor_info, donor_frames) = &sink.series[0];
        assert_eq!(donor_info.channel, FretChannel::Donor);
        assert_eq!(donor_info.group, "FRET_01");
        assert_eq!(donor_info.fluorophore, "mTFP1");
        assert_eq!(donor_info.starting_time, 0.0);
        assert!((donor_info.rate - 100.0).abs() < 1e-9);
        assert_eq!(donor_frames.len(), 2);
        assert_eq!(donor_frames[0].shape(), &[100, 100]);
        assert_eq!(donor_frames[0][[0, 0]], -7);

        let (acceptor_info, acceptor_frames) = &sink.series[1];
        assert_eq!(acceptor_info.channel, FretChannel::Acceptor);
        assert_eq!(acceptor_frames[1][[99, 99]], -9);

        // Trial interval: 2 declared frames at 100 Hz
        assert_eq!(sink.trials, vec![(0.0, 0.02)]);
    }

    #[test]
    fn mismatched_sample_rate_fails_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let date = "2019/06/14 16:35:21";
        write_header(&dir, "sess-01.rsh", date, "10", 2, &["sess-01_A.rsd"]);
        write_header(&dir, "sess-01_A.rsh", date, "10", 2, &["sess-01_A.rsd"]);
        write_header(&dir, "sess-01_B.rsh", date, "20", 2, &["sess-01_B.rsd"]);
        write_raw(&dir, "sess-01_A.rsd", 2, 7);
        write_raw(&dir, "sess-01_B.rsd", 2, 9);

        let mut sink = MemorySink::default();
        let result = convert_session(dir.path(), &test_config(), &mut sink);
        assert!(matches!(result, Err(FretError::Consistency(_))));
        assert!(sink.series.is_empty());
        assert!(sink.trials.is_empty());
    }

    #[test]
    fn preset_start_time_mismatch_skips_conversion() {
        let dir = TempDir::new().unwrap();
        write_session(&dir, "2019/06/14 16:35:21");

        let mut sink = MemorySink {
            start_time: Some(
                NaiveDateTime::parse_from_str("2019/06/15 09:00:00", ACQUISITION_DATE_FORMAT)
                    .unwrap(),
            ),
            ..MemorySink::default()
        };
        let outcome = convert_session(dir.path(), &test_config(), &mut sink).unwrap();
        assert_eq!(outcome, ConversionOutcome::SkippedTimestampMismatch);
        assert!(sink.series.is_empty());
        assert!(sink.trials.is_empty());
    }

    #[test]
    fn matching_preset_start_time_converts() {
        let dir = TempDir::new().unwrap();
        write_session(&dir, "2019/06/14 16:35:21");

        let mut sink = MemorySink {
            start_time: Some(
                NaiveDateTime::parse_from_str("2019/06/14 16:35:21", ACQUISITION_DATE_FORMAT)
                    .unwrap(),
            ),
            ..MemorySink::default()
        };
        let outcome = convert_session(dir.path(), &test_config(), &mut sink).unwrap();
        assert!(matches!(outcome, ConversionOutcome::Completed { .. }));
    }

    #[test]
    fn trial_before_session_start_is_consistency_error() {
        let dir = TempDir::new().unwrap();
        let session_date = "2019/06/14 16:35:21";
        let earlier = "2019/06/14 16:00:00";
        write_header(&dir, "sess-01.rsh", session_date, "10", 2, &["sess-01_A.rsd"]);
        write_header(&dir, "sess-01_A.rsh", earlier, "10", 2, &["sess-01_A.rsd"]);
        write_header(&dir, "sess-01_B.rsh", earlier, "10", 2, &["sess-01_B.rsd"]);
        write_raw(&dir, "sess-01_A.rsd", 2, 7);
        write_raw(&dir, "sess-01_B.rsd", 2, 9);

        let mut sink = MemorySink::default();
        let result = convert_session(dir.path(), &test_config(), &mut sink);
        assert!(matches!(result, Err(FretError::Consistency(_))));
        assert!(sink.series.is_empty());
    }

    #[test]
    fn trial_offsets_are_relative_to_session_start() {
        let dir = TempDir::new().unwrap();
        let session_date = "2019/06/14 16:35:21";
        let later = "2019/06/14 16:36:21";
        write_header(&dir, "sess-01.rsh", session_date, "10", 2, &["sess-01_A.rsd"]);
        write_header(&dir, "sess-01_A.rsh", later, "10", 2, &["sess-01_A.rsd"]);
        write_header(&dir, "sess-01_B.rsh", later, "10", 2, &["sess-01_B.rsd"]);
        write_raw(&dir, "sess-01_A.rsd", 2, 7);
        write_raw(&dir, "sess-01_B.rsd", 2, 9);

        let mut sink = MemorySink::default();
        convert_session(dir.path(), &test_config(), &mut sink).unwrap();
        assert_eq!(sink.series[0].0.starting_time, 60.0);
        assert_eq!(sink.trials[0].0, 60.0);
    }

    #[test]
    fn existing_trials_are_not_duplicated() {
        let dir = TempDir::new().unwrap();
        write_session(&dir, "2019/06/14 16:35:21");

        let mut sink = MemorySink {
            trials: vec![(0.0, 1.0)],
            ..MemorySink::default()
        };
        convert_session(dir.path(), &test_config(), &mut sink).unwrap();
        assert_eq!(sink.trials.len(), 1);
        assert_eq!(sink.series.len(), 2);
    }
}
