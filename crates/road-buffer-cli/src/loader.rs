//! GeoJSON files to library layers

use anyhow::{Context, Result};
use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue, feature::Id};
use road_buffer_lib::{AttributeValue, Attributes, Crs, Feature, FeatureId, GeometryKind, Layer};
use std::path::Path;

/// Read a GeoJSON FeatureCollection file into a layer of the given kind
pub fn load_layer(path: &Path, name: &str, kind: GeometryKind, crs: Crs) -> Result<Layer> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file {}", name, path.display()))?;
    let layer = parse_layer(&json, name, kind, crs)
        .with_context(|| format!("Invalid {} file {}", name, path.display()))?;
    tracing::info!(
        "Loaded {} {} features from {} ({})",
        layer.len(),
        name,
        path.display(),
        crs
    );
    Ok(layer)
}

/// Build a layer from GeoJSON text
///
/// Features without a geometry, or with a geometry of the wrong kind, are skipped with
/// a warning. Ids come from the feature `id`, else a `properties.id`, else the position.
pub fn parse_layer(json: &str, name: &str, kind: GeometryKind, crs: Crs) -> Result<Layer> {
    let geojson = json.parse::<GeoJson>()?;
    let collection = FeatureCollection::try_from(geojson)?;

    let mut features = Vec::with_capacity(collection.features.len());
    for (position, feature) in collection.features.into_iter().enumerate() {
        let id = feature_id(feature.id.as_ref(), feature.properties.as_ref(), position);
        let Some(geometry) = feature.geometry else {
            tracing::warn!("Skipping {} feature '{}' without geometry", name, id);
            continue;
        };
        let geometry = geo::Geometry::<f64>::try_from(geometry.value)
            .with_context(|| format!("Unsupported geometry in {} feature '{}'", name, id))?;
        if GeometryKind::of(&geometry) != Some(kind) {
            tracing::warn!(
                "Skipping {} feature '{}': expected {:?} geometry",
                name,
                id,
                kind
            );
            continue;
        }

        let mut converted = Feature::new(id, geometry);
        for (key, value) in attributes(feature.properties.as_ref()) {
            converted = converted.with_attribute(key, value);
        }
        features.push(converted);
    }

    Ok(Layer::new(name, kind, Some(crs), features)?)
}

fn feature_id(id: Option<&Id>, properties: Option<&JsonObject>, position: usize) -> FeatureId {
    match id {
        Some(Id::String(s)) => FeatureId::from(s.as_str()),
        Some(Id::Number(n)) => FeatureId::from(n.to_string()),
        None => match properties.and_then(|p| p.get("id")) {
            Some(JsonValue::String(s)) => FeatureId::from(s.as_str()),
            Some(JsonValue::Number(n)) => FeatureId::from(n.to_string()),
            _ => FeatureId::from(position),
        },
    }
}

fn attributes(properties: Option<&JsonObject>) -> Attributes {
    let Some(properties) = properties else {
        return Attributes::new();
    };
    properties
        .iter()
        .map(|(key, value)| {
            let value = match value {
                JsonValue::Null => AttributeValue::Null,
                JsonValue::Bool(b) => AttributeValue::Bool(*b),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(i) => AttributeValue::Int(i),
                    None => AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
                JsonValue::String(s) => AttributeValue::String(s.clone()),
                // Nested values are kept opaque as their JSON text
                other => AttributeValue::String(other.to_string()),
            };
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROADS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "id": "main", "properties": {"name": "Main St", "lanes": 2},
             "geometry": {"type": "LineString", "coordinates": [[3.0, 45.0], [3.001, 45.0]]}},
            {"type": "Feature", "properties": {"id": 17, "oneway": true},
             "geometry": {"type": "MultiLineString", "coordinates": [[[3.0, 45.001], [3.001, 45.001]]]}},
            {"type": "Feature", "properties": {"width": 3.5},
             "geometry": {"type": "LineString", "coordinates": [[3.0, 45.002], [3.001, 45.002]]}},
            {"type": "Feature", "properties": {}, "geometry": null},
            {"type": "Feature", "properties": {},
             "geometry": {"type": "Point", "coordinates": [3.0, 45.0]}}
        ]
    }"#;

    #[test]
    fn test_parse_roads() {
        let layer = parse_layer(ROADS, "roads", GeometryKind::Line, Crs::Wgs84).unwrap();

        assert_eq!(layer.len(), 3);
        assert_eq!(layer.crs(), Some(Crs::Wgs84));
        let ids: Vec<&str> = layer.features().iter().map(|f| f.id().as_str()).collect();
        assert_eq!(ids, vec!["main", "17", "2"]);

        let main = &layer.features()[0];
        assert_eq!(
            main.attribute("name"),
            Some(&AttributeValue::String("Main St".to_string()))
        );
        assert_eq!(main.attribute("lanes"), Some(&AttributeValue::Int(2)));
        assert_eq!(
            layer.features()[1].attribute("oneway"),
            Some(&AttributeValue::Bool(true))
        );
        assert_eq!(
            layer.features()[2].attribute("width"),
            Some(&AttributeValue::Float(3.5))
        );
    }

    #[test]
    fn test_parse_parcels() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": 4, "properties": {"owner": {"name": "x"}},
                 "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}}
            ]
        }"#;
        let layer = parse_layer(json, "parcels", GeometryKind::Polygon, Crs::WebMercator).unwrap();

        assert_eq!(layer.len(), 1);
        let parcel = &layer.features()[0];
        assert_eq!(parcel.id().as_str(), "4");
        assert_eq!(
            parcel.attribute("owner"),
            Some(&AttributeValue::String(r#"{"name":"x"}"#.to_string()))
        );
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": "a", "properties": null,
                 "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 0]]}},
                {"type": "Feature", "id": "a", "properties": null,
                 "geometry": {"type": "LineString", "coordinates": [[0, 1], [1, 1]]}}
            ]
        }"#;
        assert!(parse_layer(json, "roads", GeometryKind::Line, Crs::Wgs84).is_err());
    }

    #[test]
    fn test_not_a_feature_collection() {
        let json = r#"{"type": "Point", "coordinates": [0, 0]}"#;
        assert!(parse_layer(json, "roads", GeometryKind::Line, Crs::Wgs84).is_err());
    }
}
