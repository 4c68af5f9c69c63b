//! Console summary, JSON report and GeoJSON export of an analysis

use anyhow::{Context, Result};
use geojson::{FeatureCollection, JsonObject, JsonValue};
use road_buffer_lib::{
    AnalysisOutput, BufferSet, Crs, Diagnostic, DistanceSummary, OverlayRecord,
};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Serializable summary of a run, without geometries
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub working_crs: String,
    /// `[lon, lat]` map center
    pub center_wgs84: Option<(f64, f64)>,
    pub cancelled: bool,
    pub distances: Vec<DistanceReport<'a>>,
    pub diagnostics: &'a [Diagnostic],
}

#[derive(Debug, Serialize)]
pub struct DistanceReport<'a> {
    #[serde(flatten)]
    pub summary: &'a DistanceSummary,
    pub intersecting_parcel_ids: Vec<String>,
    pub records: Vec<RecordReport<'a>>,
}

#[derive(Debug, Serialize)]
pub struct RecordReport<'a> {
    pub parcel_id: &'a str,
    pub road_id: Option<&'a str>,
    pub intersection_area: f64,
    pub parcel_area: f64,
    pub fraction: f64,
}

impl<'a> Report<'a> {
    pub fn new(output: &'a AnalysisOutput) -> Self {
        let distances = output
            .result
            .groups()
            .iter()
            .map(|group| DistanceReport {
                summary: &group.summary,
                intersecting_parcel_ids: output
                    .result
                    .intersecting_parcel_ids(group.summary.distance)
                    .iter()
                    .map(|id| id.to_string())
                    .collect(),
                records: group
                    .records
                    .iter()
                    .map(|r| RecordReport {
                        parcel_id: r.parcel_id.as_str(),
                        road_id: r.road_id.as_ref().map(|id| id.as_str()),
                        intersection_area: r.intersection_area,
                        parcel_area: r.parcel_area,
                        fraction: r.fraction,
                    })
                    .collect(),
            })
            .collect();

        Self {
            working_crs: output.working_crs.to_string(),
            center_wgs84: output.center_wgs84,
            cancelled: output.cancelled,
            distances,
            diagnostics: &output.diagnostics,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create report {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        tracing::info!("Wrote report to {}", path.display());
        Ok(())
    }
}

/// One line per distance, then one per skipped feature
pub fn summary_lines(output: &AnalysisOutput) -> Vec<String> {
    let mut lines: Vec<String> = output
        .result
        .summaries()
        .map(|s| {
            format!(
                "Buffer: {} m - Parcels intersecting: {}",
                s.distance, s.intersecting_parcels
            )
        })
        .collect();
    if output.cancelled {
        lines.push("Cancelled before all distances were processed".to_string());
    }
    lines.extend(output.diagnostics.iter().map(|d| format!("Skipped {}", d)));
    lines
}

/// Write `buffer_<d>m.geojson` and `intersection_<d>m.geojson` for every distance
///
/// Geometries are reprojected to WGS84, the CRS GeoJSON readers expect.
pub fn export_geojson(output: &AnalysisOutput, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    let mut written = Vec::new();
    for set in &output.buffers {
        let buffers = buffer_collection(set, output.working_crs)?;
        let path = dir.join(format!("buffer_{}m.geojson", set.distance));
        write_collection(&buffers, &path)?;
        written.push(path);

        let records = output.result.records_for(set.distance);
        if records.is_empty() {
            continue;
        }
        let intersections = intersection_collection(records, output.working_crs)?;
        let path = dir.join(format!("intersection_{}m.geojson", set.distance));
        write_collection(&intersections, &path)?;
        written.push(path);
    }

    tracing::info!("Exported {} GeoJSON files to {}", written.len(), dir.display());
    Ok(written)
}

fn buffer_collection(set: &BufferSet, crs: Crs) -> Result<FeatureCollection> {
    let features = set
        .iter()
        .map(|buffer| -> Result<geojson::Feature> {
            let mut properties = JsonObject::new();
            properties.insert("distance_m".to_string(), JsonValue::from(buffer.distance));
            properties.insert(
                "road_id".to_string(),
                buffer
                    .source
                    .as_ref()
                    .map_or(JsonValue::Null, |id| JsonValue::from(id.as_str())),
            );
            properties.insert("area".to_string(), JsonValue::from(buffer.area()));
            let geometry = crs.transform_geometry(&buffer.geometry, &Crs::Wgs84)?;
            Ok(geojson_feature(geojson::Value::from(&geometry), properties))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(collection(features))
}

fn intersection_collection(records: &[OverlayRecord], crs: Crs) -> Result<FeatureCollection> {
    let features = records
        .iter()
        .map(|record| -> Result<geojson::Feature> {
            let mut properties = JsonObject::new();
            properties.insert(
                "parcel_id".to_string(),
                JsonValue::from(record.parcel_id.as_str()),
            );
            properties.insert(
                "road_id".to_string(),
                record
                    .road_id
                    .as_ref()
                    .map_or(JsonValue::Null, |id| JsonValue::from(id.as_str())),
            );
            properties.insert("distance_m".to_string(), JsonValue::from(record.distance));
            properties.insert(
                "intersection_area".to_string(),
                JsonValue::from(record.intersection_area),
            );
            properties.insert("parcel_area".to_string(), JsonValue::from(record.parcel_area));
            properties.insert("fraction".to_string(), JsonValue::from(record.fraction));
            let geometry = crs.transform_geometry(&record.intersection, &Crs::Wgs84)?;
            Ok(geojson_feature(geojson::Value::from(&geometry), properties))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(collection(features))
}

fn geojson_feature(value: geojson::Value, properties: JsonObject) -> geojson::Feature {
    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(value)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<geojson::Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn write_collection(collection: &FeatureCollection, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), collection)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
