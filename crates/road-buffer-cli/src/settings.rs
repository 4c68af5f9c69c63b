use clap::Parser;
use road_buffer_lib::{
    AnalysisConfig, BufferMode, BufferStyle, CapStyle, Crs, JoinStyle, WorkingCrs,
};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Road Buffer - Buffer zones around roads and the parcels that intersect them
pub struct Settings {
    /// Road lines (GeoJSON FeatureCollection)
    #[clap(long, value_name = "FILE")]
    pub roads: PathBuf,

    /// Parcel polygons (GeoJSON FeatureCollection)
    #[clap(long, value_name = "FILE")]
    pub parcels: PathBuf,

    /// CRS of the road coordinates
    #[clap(long, default_value = "EPSG:4326")]
    pub roads_crs: Crs,

    /// CRS of the parcel coordinates
    #[clap(long, default_value = "EPSG:4326")]
    pub parcels_crs: Crs,

    /// Buffer distances in working CRS units (meters), repeatable
    #[clap(
        short = 'd',
        long = "distance",
        value_name = "METERS",
        num_args = 1..,
        default_values_t = [10.0, 50.0, 100.0, 200.0, 250.0]
    )]
    pub distances: Vec<f64>,

    /// Buffer end cap style: round, flat or square
    #[clap(long, default_value = "round")]
    pub cap: CapStyle,

    /// Buffer join style: round, mitre or bevel
    #[clap(long, default_value = "round")]
    pub join: JoinStyle,

    /// Segments approximating a full circle in round caps and joins
    #[clap(long, default_value = "32")]
    pub arc_segments: u32,

    /// Merge the buffers of all roads into one footprint per distance
    #[clap(long, default_value = "false")]
    pub dissolve: bool,

    /// Working CRS: "auto" (UTM zone of the data) or an EPSG code
    #[clap(long, default_value = "auto")]
    pub working_crs: WorkingCrs,

    /// Write a JSON summary of the results to this file
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write buffer and intersection GeoJSON files (WGS84) into this directory
    #[clap(long, value_name = "DIR")]
    pub export_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    pub log_level: String,
}

impl Settings {
    /// Analysis configuration described by these settings
    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            distances: self.distances.clone(),
            style: BufferStyle {
                cap: self.cap,
                join: self.join,
                arc_segments: self.arc_segments,
                ..BufferStyle::default()
            },
            mode: if self.dissolve {
                BufferMode::Dissolved
            } else {
                BufferMode::PerFeature
            },
            working_crs: self.working_crs,
            ..AnalysisConfig::default()
        }
    }
}
