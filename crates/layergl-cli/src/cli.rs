use std::path::PathBuf;

use clap::Parser;
use layergl::{LatLng, UniformValue};

#[derive(Parser, Debug)]
#[command(
    name = "layergl-render",
    author,
    version,
    about = "Render map tiles through a layergl shader program"
)]
pub struct Cli {
    /// Layer configuration TOML file.
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Zoom level of the rendered tiles.
    #[arg(long, value_name = "Z")]
    pub zoom: u8,

    /// Tile column and row to render (repeatable).
    #[arg(long = "tile", value_name = "X,Y", value_parser = parse_tile)]
    pub tiles: Vec<(i64, i64)>,

    /// Render the tiles around this point instead of explicit `--tile`s.
    #[arg(long, value_name = "LAT,LNG", value_parser = parse_lat_lng, conflicts_with = "tiles")]
    pub center: Option<LatLng>,

    /// Tiles to include on each side of `--center`.
    #[arg(long, value_name = "N", default_value_t = 0, requires = "center")]
    pub radius: u32,

    /// Directory the `z_x_y.png` files are written to.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out: PathBuf,

    /// Uniform override applied after the first render (repeatable).
    #[arg(long = "set", value_name = "NAME=V[,V..]", value_parser = parse_uniform)]
    pub set: Vec<(String, UniformValue)>,

    /// Animation frames to draw before writing the tiles.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub frames: u64,

    /// Pin the clock uniform to this many milliseconds.
    #[arg(long, value_name = "MS")]
    pub fixed_time: Option<f64>,

    /// Request a high-performance GPU adapter.
    #[arg(long)]
    pub high_performance: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_pair(value: &str, what: &str) -> Result<(String, String), String> {
    let (a, b) = value
        .split_once(',')
        .ok_or_else(|| format!("expected {what}"))?;
    Ok((a.trim().to_string(), b.trim().to_string()))
}

pub fn parse_tile(value: &str) -> Result<(i64, i64), String> {
    let (x, y) = parse_pair(value, "X,Y")?;
    let x = x.parse::<i64>().map_err(|_| format!("invalid tile column '{x}'"))?;
    let y = y.parse::<i64>().map_err(|_| format!("invalid tile row '{y}'"))?;
    Ok((x, y))
}

pub fn parse_lat_lng(value: &str) -> Result<LatLng, String> {
    let (lat, lng) = parse_pair(value, "LAT,LNG")?;
    let lat = lat
        .parse::<f64>()
        .map_err(|_| format!("invalid latitude '{lat}'"))?;
    let lng = lng
        .parse::<f64>()
        .map_err(|_| format!("invalid longitude '{lng}'"))?;
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {lat} is outside -90..90"));
    }
    Ok(LatLng::new(lat, lng))
}

/// `name=1.5` is a scalar; `name=1,2,3` a vector of that many components.
pub fn parse_uniform(value: &str) -> Result<(String, UniformValue), String> {
    let (name, raw) = value
        .split_once('=')
        .ok_or_else(|| "expected NAME=VALUE".to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err("uniform name must not be empty".into());
    }
    let components = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| format!("invalid number '{}' for uniform '{name}'", part.trim()))
        })
        .collect::<Result<Vec<f32>, String>>()?;
    let value = match components.as_slice() {
        [scalar] => UniformValue::Scalar(*scalar),
        _ if components.len() <= 4 => UniformValue::Vector(components),
        _ => return Err(format!("uniform '{name}' has more than 4 components")),
    };
    Ok((name.to_string(), value))
}
