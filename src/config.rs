use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::types::FretError;

/// Descriptive metadata for one optical channel, carried into every series
/// written for that channel.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelMetadata {
    /// Fluorophore name (e.g. "mTFP1")
    pub fluorophore: String,
    /// Free-text description of the channel
    pub description: String,
    /// Measurement unit of the frame samples
    pub unit: String,
    /// Emission wavelength (nm)
    pub emission_lambda: f64,
}

/// Explicit configuration for a conversion run.
///
/// Replaces ad-hoc per-run wiring: everything the orchestrator needs besides
/// the source directory and the sink is passed in through this value.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConversionConfig {
    /// Name of the acquisition device
    pub device: String,
    /// Base name for the per-trial FRET groups in the output
    pub fret_name: String,
    /// Excitation wavelength (nm) shared by both channels
    pub excitation_lambda: f64,
    /// Donor channel metadata
    pub donor: ChannelMetadata,
    /// Acceptor channel metadata
    pub acceptor: ChannelMetadata,
}

/// Loads a conversion configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ConversionConfig, FretError> {
    let text = fs::read_to_string(path.as_ref())
        .map_err(|e| FretError::Config(format!("failed to read config file: {}", e)))?;
    serde_yaml::from_str(&text)
        .map_err(|e| FretError::Config(format!("failed to parse config file: {}", e)))
}
