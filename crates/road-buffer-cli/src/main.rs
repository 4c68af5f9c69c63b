//! Road Buffer CLI - load GeoJSON roads and parcels, run the buffer overlay, report and export

mod loader;
mod logging;
mod report;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use road_buffer_lib::{Analysis, GeometryKind};
use settings::Settings;

fn main() -> Result<()> {
    let settings = Settings::parse();
    let _logging = logging::setup_logging(&settings.log_level);
    tracing::debug!("Settings: {:?}", settings);

    let analysis = Analysis::new(settings.analysis_config()).context("Invalid analysis settings")?;

    let (roads, parcels) = {
        profiling::scope!("load");
        let roads = loader::load_layer(
            &settings.roads,
            "roads",
            GeometryKind::Line,
            settings.roads_crs,
        )?;
        let parcels = loader::load_layer(
            &settings.parcels,
            "parcels",
            GeometryKind::Polygon,
            settings.parcels_crs,
        )?;
        (roads, parcels)
    };

    let output = {
        profiling::scope!("analysis");
        analysis
            .run(&roads, &parcels)
            .context("Buffer overlay analysis failed")?
    };

    for line in report::summary_lines(&output) {
        println!("{}", line);
    }
    if let Some((lon, lat)) = output.center_wgs84 {
        tracing::info!("Map center: {:.6}, {:.6} (lat, lon)", lat, lon);
    }

    if let Some(path) = &settings.output {
        report::Report::new(&output).write_json(path)?;
    }
    if let Some(dir) = &settings.export_dir {
        profiling::scope!("export");
        report::export_geojson(&output, dir)?;
    }

    Ok(())
}
