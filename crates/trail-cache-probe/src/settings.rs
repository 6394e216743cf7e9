use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use trail_cache_lib::{CacheConfig, Viewport};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Trail Cache Probe - drives the trail cache headlessly against a tile source
pub struct Settings {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply a sequence of viewports, wait for each to settle and run hit-test probes
    Replay(ReplayArgs),
    /// Write a synthetic dataset laid out for --data-dir
    Generate(GenerateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Directory of cell payloads (<tier>/<token>.bin, pin/<id>.bin)
    #[clap(long, value_name = "DIR", conflicts_with = "server")]
    pub data_dir: Option<PathBuf>,

    /// Base URL of a tile server (requires the `http` feature)
    #[clap(long, value_name = "URL")]
    pub server: Option<String>,

    /// Viewport to apply, in order (repeatable)
    #[clap(
        long = "viewport",
        value_name = "LAT_LO,LNG_LO,LAT_HI,LNG_HI,ZOOM",
        value_parser = parse_viewport,
        allow_hyphen_values = true,
        required = true
    )]
    pub viewports: Vec<Viewport>,

    /// Trail id to pin regardless of the viewport
    #[clap(long, value_name = "ID")]
    pub pin: Option<u64>,

    /// Request full-precision geometry for the pinned trail
    #[clap(long, default_value = "false")]
    pub precise: bool,

    /// Closest-entity probe after the last viewport, radius in degrees (repeatable)
    #[clap(
        long = "probe",
        value_name = "LAT,LNG,RADIUS",
        value_parser = parse_probe,
        allow_hyphen_values = true
    )]
    pub probes: Vec<Probe>,

    /// Maximum number of concurrent fetches
    #[clap(long, default_value = "16")]
    pub max_in_flight: usize,

    /// Cover each tier at its base level only, without ancestor cells
    #[clap(long, default_value = "false")]
    pub no_ancestors: bool,

    /// Print the final report as JSON on stdout
    #[clap(long, default_value = "false")]
    pub json: bool,
}

impl ReplayArgs {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_requests_in_flight: self.max_in_flight,
            ..CacheConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Output directory
    #[clap(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Number of trails to generate
    #[clap(long, default_value = "200")]
    pub trails: usize,

    /// Random seed
    #[clap(long, default_value = "1")]
    pub seed: u64,

    /// Center of the generated region
    #[clap(
        long,
        value_name = "LAT,LNG",
        value_parser = parse_lat_lng,
        allow_hyphen_values = true,
        default_value = "46.8,8.2"
    )]
    pub center: (f64, f64),

    /// Half-size of the generated region in degrees
    #[clap(long, default_value = "0.5")]
    pub spread: f64,
}

/// A closest-entity probe point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub lat: f64,
    pub lng: f64,
    pub radius_degrees: f64,
}

fn parse_numbers<const N: usize>(value: &str) -> Result<[f64; N], String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {N} comma-separated numbers, got {}", parts.len()));
    }
    let mut numbers = [0.0; N];
    for (slot, part) in numbers.iter_mut().zip(parts) {
        *slot = part
            .parse()
            .map_err(|e| format!("invalid number '{part}': {e}"))?;
    }
    Ok(numbers)
}

pub fn parse_viewport(value: &str) -> Result<Viewport, String> {
    let [lat_lo, lng_lo, lat_hi, lng_hi, zoom] = parse_numbers::<5>(value)?;
    if !(-90.0..=90.0).contains(&lat_lo) || !(-90.0..=90.0).contains(&lat_hi) {
        return Err("latitude must be within [-90, 90]".to_owned());
    }
    if zoom < 0.0 {
        return Err("zoom must not be negative".to_owned());
    }
    Ok(Viewport::new(lat_lo, lng_lo, lat_hi, lng_hi, zoom))
}

pub fn parse_probe(value: &str) -> Result<Probe, String> {
    let [lat, lng, radius_degrees] = parse_numbers::<3>(value)?;
    if radius_degrees <= 0.0 {
        return Err("probe radius must be positive".to_owned());
    }
    Ok(Probe {
        lat,
        lng,
        radius_degrees,
    })
}

pub fn parse_lat_lng(value: &str) -> Result<(f64, f64), String> {
    let [lat, lng] = parse_numbers::<2>(value)?;
    Ok((lat, lng))
}
