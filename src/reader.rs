use byteorder::{ByteOrder, LittleEndian};
use ndarray::{s, Array2};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::types::*;

// Fixed frame geometry of the acquisition hardware
pub const SAMPLES_PER_FRAME: usize = 12_800;
pub const BLOCK_ROWS: usize = 128;
pub const BLOCK_COLS: usize = 100;
pub const EXCESS_ROWS: usize = 20;
pub const IMAGE_ROWS: usize = 100;

// Largest raw data file supported by the single-read decode path
const MAX_RAW_READ_BYTES: u64 = 1_000_000_000;

// Header field markers (matched by substring, one linear pass)
const ACQUISITION_DATE_KEY: &str = "acquisition_date";
const SAMPLE_TIME_KEY: &str = "sample_time";
const PAGE_FRAMES_KEY: &str = "page_frames";
const FILE_LIST_SENTINEL: &str = "Data-File-List";

/// Reads and parses one trial's `.rsh` header file.
///
/// The header is scanned line by line in a single pass: the timing and frame
/// count fields appear first, then a sentinel line after which every line is a
/// file name. The first collected name is the monitor bitmap (`.rsm`), the
/// remaining names are raw data files (`.rsd`) in acquisition order.
///
/// # Arguments
///
/// * `path` - Path to the `.rsh` header file
///
/// # Returns
///
/// A `Result` containing either the parsed `TrialHeader` or an error.
pub fn read_trial_header<P: AsRef<Path>>(path: P) -> Result<TrialHeader, FretError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut acquisition_date: Option<String> = None;
    let mut sample_rate: Option<f64> = None;
    let mut declared_frames: Option<usize> = None;
    let mut files_raw: Vec<String> = Vec::new();
    let mut in_file_list = false;

    for line in reader.lines() {
        let line = line?;

        if line.contains(ACQUISITION_DATE_KEY) {
            acquisition_date = Some(strip_field(&line, ACQUISITION_DATE_KEY));
        }
        if line.contains(SAMPLE_TIME_KEY) {
            let value = strip_field(&line, SAMPLE_TIME_KEY).replace("msec", "");
            let millis: f64 = value.trim().parse().map_err(|_| {
                FretError::Parse(format!("sample_time is not numeric: '{}'", value.trim()))
            })?;
            if millis <= 0.0 {
                return Err(FretError::Parse(format!(
                    "sample_time must be positive, got {} msec",
                    millis
                )));
            }
            sample_rate = Some(1.0 / (millis / 1000.0));
        }
        if line.contains(PAGE_FRAMES_KEY) {
            let value = strip_field(&line, PAGE_FRAMES_KEY);
            let frames: usize = value.parse().map_err(|_| {
                FretError::Parse(format!("page_frames is not an integer: '{}'", value))
            })?;
            if frames == 0 {
                return Err(FretError::Format("page_frames must be positive".to_string()));
            }
            declared_frames = Some(frames);
        }
        // The sentinel check comes after the accumulation check so the
        // sentinel line itself is never collected as a file name.
        if in_file_list {
            let name = line.trim();
            if !name.is_empty() {
                files_raw.push(name.to_string());
            }
        }
        if line.contains(FILE_LIST_SENTINEL) {
            in_file_list = true;
        }
    }

    let acquisition_date = acquisition_date.ok_or_else(|| {
        FretError::Format(format!("missing {} field in {}", ACQUISITION_DATE_KEY, path.display()))
    })?;
    let sample_rate = sample_rate.ok_or_else(|| {
        FretError::Format(format!("missing {} field in {}", SAMPLE_TIME_KEY, path.display()))
    })?;
    let declared_frames = declared_frames.ok_or_else(|| {
        FretError::Format(format!("missing {} field in {}", PAGE_FRAMES_KEY, path.display()))
    })?;
    if files_raw.is_empty() {
        return Err(FretError::Format(format!(
            "no file list found in {} (missing {} section)",
            path.display(),
            FILE_LIST_SENTINEL
        )));
    }

    // First entry is the monitor bitmap, the rest hold frame data
    let bitmap_file = files_raw.remove(0);
    if files_raw.is_empty() {
        return Err(FretError::Format(format!(
            "header {} lists a bitmap file but no raw data files",
            path.display()
        )));
    }

    Ok(TrialHeader {
        bitmap_file,
        raw_files: files_raw,
        acquisition_date,
        sample_rate,
        declared_frames,
    })
}

// Strips the field label and `=` separator from a header line
fn strip_field(line: &str, key: &str) -> String {
    line.replace(key, "").replace('=', "").trim().to_string()
}

/// Reads a raw data file and unpacks it into signed 16-bit samples.
///
/// The whole file is read in one operation, bounded by the supported read
/// size. Samples are little-endian words in file order.
pub fn read_raw_samples<P: AsRef<Path>>(path: P) -> Result<Vec<i16>, FretError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    check_read_capacity(path, len)?;

    let mut reader = BufReader::with_capacity(65536, file);
    let mut bytes = Vec::with_capacity(len as usize);
    reader.read_to_end(&mut bytes)?;

    if bytes.len() % 2 != 0 {
        return Err(FretError::Geometry(format!(
            "{} has odd byte length {}",
            path.display(),
            bytes.len()
        )));
    }

    let mut samples = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(&bytes, &mut samples);
    Ok(samples)
}

fn check_read_capacity(path: &Path, len: u64) -> Result<(), FretError> {
    if len > MAX_RAW_READ_BYTES {
        return Err(FretError::Capacity {
            path: path.display().to_string(),
            len,
        });
    }
    Ok(())
}

/// Computes how many whole frames a sample sequence holds.
///
/// The count is derived from the data itself; the header's declared frame
/// count is not consulted here.
pub fn frame_count(num_samples: usize) -> Result<usize, FretError> {
    if num_samples == 0 || num_samples % SAMPLES_PER_FRAME != 0 {
        return Err(FretError::Geometry(format!(
            "{} samples do not divide into {}-sample frames",
            num_samples, SAMPLES_PER_FRAME
        )));
    }
    Ok(num_samples / SAMPLES_PER_FRAME)
}

/// Decodes one frame's samples into the full 128x100 pixel block.
///
/// Samples arrive column-major: the first 128 words of a chunk fill the first
/// column. The acquisition hardware stores every sample sign-inverted, so each
/// value is negated (wrapping, so `i16::MIN` maps to itself as the hardware
/// cast does).
pub fn decode_block(samples: &[i16]) -> Array2<i16> {
    debug_assert_eq!(samples.len(), SAMPLES_PER_FRAME);
    let mut block = Array2::<i16>::zeros((BLOCK_ROWS, BLOCK_COLS));
    for c in 0..BLOCK_COLS {
        let column = &samples[c * BLOCK_ROWS..(c + 1) * BLOCK_ROWS];
        for (r, &word) in column.iter().enumerate() {
            block[[r, c]] = word.wrapping_neg();
        }
    }
    block
}

/// Splits a decoded 128x100 block into its excess region (top 20 rows,
/// analog/trigger samples) and the 100x100 image region.
pub fn split_block(block: &Array2<i16>) -> (Array2<i16>, Array2<i16>) {
    let excess = block.slice(s![..EXCESS_ROWS, ..]).to_owned();
    let image = block.slice(s![EXCESS_ROWS.., ..]).to_owned();
    (excess, image)
}

// Decoded samples of one raw file with a cursor over its frames
struct FileFrames {
    samples: Vec<i16>,
    num_frames: usize,
    next: usize,
}

/// Lazy stream of 100x100 image frames for one (channel, trial) pair.
///
/// Raw data files are opened on demand in the order the header lists them;
/// within a file, frames are yielded in file order. The stream is single-pass:
/// dropping it abandons any unread frames, and after the first error no
/// further frames are produced.
///
/// # Examples
///
/// ```no_run
/// use fret_importer::{read_trial_header, FrameStream};
///
/// let header = read_trial_header("data/session-0001_A.rsh").unwrap();
/// let stream = FrameStream::open("data", &header);
/// for frame in stream {
///     let frame = frame.unwrap();
///     assert_eq!(frame.shape(), &[100, 100]);
/// }
/// ```
pub struct FrameStream {
    dir: PathBuf,
    pending: VecDeque<String>,
    current: Option<FileFrames>,
    failed: bool,
}

impl FrameStream {
    /// Creates a stream over all raw data files named by a trial header.
    ///
    /// Files are resolved relative to `dir`, the directory holding the
    /// header. Nothing is read until the first frame is pulled.
    pub fn open<P: AsRef<Path>>(dir: P, header: &TrialHeader) -> FrameStream {
        FrameStream {
            dir: dir.as_ref().to_path_buf(),
            pending: header.raw_files.iter().cloned().collect(),
            current: None,
            failed: false,
        }
    }

    /// Number of raw data files not yet opened.
    pub fn files_remaining(&self) -> usize {
        self.pending.len()
    }

    // Loads and decodes the next raw file; Ok(false) when the list is done
    fn load_next_file(&mut self) -> Result<bool, FretError> {
        let name = match self.pending.pop_front() {
            Some(name) => name,
            None => return Ok(false),
        };
        let path = self.dir.join(&name);
        let samples = read_raw_samples(&path)?;
        let num_frames = frame_count(samples.len())
            .map_err(|e| FretError::Geometry(format!("{}: {}", path.display(), e)))?;
        self.current = Some(FileFrames {
            samples,
            num_frames,
            next: 0,
        });
        Ok(true)
    }
}

impl Iterator for FrameStream {
    type Item = Result<Array2<i16>, FretError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(current) = self.current.as_mut() {
                if current.next < current.num_frames {
                    let start = current.next * SAMPLES_PER_FRAME;
                    let block = decode_block(&current.samples[start..start + SAMPLES_PER_FRAME]);
                    let image = block.slice(s![EXCESS_ROWS.., ..]).to_owned();
                    current.next += 1;
                    return Some(Ok(image));
                }
                self.current = None;
            }
            match self.load_next_file() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
