use fret_importer::{load_trial, scan_session, FretChannel};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    // Discover trials from the session directory
    let layout = scan_session("data/cortical_imaging")?;

    println!("Session prefix: {}", layout.prefix);
    println!("Found {} trial(s):", layout.trials.len());
    for trial in layout.trials.iter().take(5) {
        println!("  {}", trial);
    }
    if layout.trials.len() > 5 {
        println!("  ... and {} more", layout.trials.len() - 5);
    }

    // Stream the donor channel of the first trial
    let trial = &layout.trials[0];
    let (header, frames) = load_trial(
        "data/cortical_imaging",
        &layout.prefix,
        trial,
        FretChannel::Donor,
    )?;

    println!("\nTrial {} donor channel:", trial);
    println!("  Acquired: {}", header.acquisition_date);
    println!("  Sample rate: {} Hz", header.sample_rate);
    println!("  Raw data files: {}", header.raw_files.len());
    println!("  Declared frames per page: {}", header.declared_frames);

    let mut count = 0usize;
    let mut first_pixel = None;
    for frame in frames {
        let frame = frame?;
        if first_pixel.is_none() {
            first_pixel = Some(frame[[0, 0]]);
        }
        count += 1;
    }

    println!("  Decoded frames: {}", count);
    if let Some(px) = first_pixel {
        println!("  First pixel of first frame: {}", px);
    }

    Ok(())
}
