use fret_importer::{convert_session, load_config, ConversionOutcome, MemorySink};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    // Explicit configuration replaces any per-run wiring
    let config = load_config("data/metafile.yml")?;

    let mut sink = MemorySink::default();
    let outcome = convert_session("data/cortical_imaging", &config, &mut sink)?;

    match outcome {
        ConversionOutcome::Completed { trials, frames } => {
            println!("\nConverted {} trial(s), {} frame(s) total.", trials, frames);
            for (info, frames) in &sink.series {
                println!(
                    "  {} / {}: {} frames at {} Hz, starting at {:.1} s",
                    info.group,
                    info.channel,
                    frames.len(),
                    info.rate,
                    info.starting_time
                );
            }
            println!("Trial intervals: {:?}", sink.trials);
        }
        ConversionOutcome::SkippedTimestampMismatch => {
            println!("\nOptical data was skipped; container start time did not match.");
        }
    }

    Ok(())
}
