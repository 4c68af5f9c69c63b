//! Geometric properties checked on a small synthetic town

use geo::{Area, BooleanOps, Intersects, LineString, polygon};
use road_buffer_lib::{
    Analysis, AnalysisConfig, BufferGenerator, BufferMode, BufferStyle, Crs, Feature, GeometryKind,
    JoinStyle, Layer, PreparedParcels, SpatialIndex,
};

const UTM: Crs = Crs::Utm {
    zone: 32,
    north: true,
};

/// A few bent roads crossing a 12x12 grid of 20 m parcels
fn town() -> (Layer, Layer) {
    let x0 = 400_000.0;
    let y0 = 5_000_000.0;

    let roads = vec![
        Feature::new(
            "main",
            LineString::from(vec![
                (x0 - 10.0, y0 + 35.0),
                (x0 + 90.0, y0 + 55.0),
                (x0 + 150.0, y0 + 40.0),
                (x0 + 250.0, y0 + 120.0),
            ]),
        ),
        Feature::new(
            "hairpin",
            LineString::from(vec![
                (x0 + 60.0, y0 + 230.0),
                (x0 + 120.0, y0 + 150.0),
                (x0 + 130.0, y0 + 230.0),
            ]),
        ),
        Feature::new(
            "spur",
            LineString::from(vec![(x0 + 200.0, y0 - 20.0), (x0 + 205.0, y0 + 90.0)]),
        ),
    ];
    let roads = Layer::new("roads", GeometryKind::Line, Some(UTM), roads).unwrap();

    let parcels = (0..144usize)
        .map(|i| {
            let x = x0 + (i % 12) as f64 * 20.0;
            let y = y0 + (i / 12) as f64 * 20.0;
            Feature::new(
                i,
                polygon![
                    (x: x + 1.0, y: y + 1.0),
                    (x: x + 19.0, y: y + 1.0),
                    (x: x + 19.0, y: y + 19.0),
                    (x: x + 1.0, y: y + 19.0),
                ],
            )
        })
        .collect();
    let parcels = Layer::new("parcels", GeometryKind::Polygon, Some(UTM), parcels).unwrap();

    (roads, parcels)
}

#[test]
fn test_buffers_are_nested_by_distance() {
    let (roads, _) = town();
    for join in [JoinStyle::Round, JoinStyle::Mitre, JoinStyle::Bevel] {
        let generator = BufferGenerator::new(
            BufferStyle {
                join,
                ..BufferStyle::default()
            },
            BufferMode::PerFeature,
        );
        let distances = [5.0, 10.0, 25.0, 60.0];
        let sets: Vec<_> = distances
            .iter()
            .map(|&d| generator.generate(&roads, d).unwrap().set)
            .collect();

        for pair in sets.windows(2) {
            for (small, large) in pair[0].buffers.iter().zip(&pair[1].buffers) {
                assert_eq!(small.source, large.source);
                let outside = small.geometry.difference(&large.geometry).unsigned_area();
                assert!(
                    outside < 1e-6 * large.geometry.unsigned_area(),
                    "{:?} {:?}: {} escapes {}",
                    join,
                    small.source,
                    outside,
                    large.distance
                );
            }
        }
    }
}

#[test]
fn test_runs_are_repeatable() {
    let (roads, parcels) = town();
    let analysis = Analysis::new(AnalysisConfig::with_distances([10.0, 30.0])).unwrap();

    let first = analysis.run(&roads, &parcels).unwrap();
    let second = analysis.run(&roads, &parcels).unwrap();

    assert_eq!(first.result.records().count(), second.result.records().count());
    for (a, b) in first.result.records().zip(second.result.records()) {
        assert_eq!(a.parcel_id, b.parcel_id);
        assert_eq!(a.road_id, b.road_id);
        assert_eq!(a.distance, b.distance);
        assert!((a.intersection_area - b.intersection_area).abs() <= 1e-9 * a.intersection_area);
    }
    assert_eq!(first.result, second.result);
}

#[test]
fn test_intersections_lie_in_both_operands() {
    let (roads, parcels) = town();
    let output = Analysis::new(AnalysisConfig::with_distances([15.0]))
        .unwrap()
        .run(&roads, &parcels)
        .unwrap();
    let set = output.buffers_for(15.0).unwrap();

    assert!(output.result.records().count() > 10);
    for record in output.result.records() {
        let parcel = parcels.features()[record.parcel_index].geometry();
        let parcel = match parcel {
            geo::Geometry::Polygon(p) => geo::MultiPolygon::new(vec![p.clone()]),
            other => panic!("unexpected parcel geometry {:?}", other),
        };
        let buffer = &set.buffers[record.road_index.unwrap()].geometry;

        let tolerance = 1e-4 * record.parcel_area;
        assert!(record.intersection.difference(&parcel).unsigned_area() < tolerance);
        assert!(record.intersection.difference(buffer).unsigned_area() < tolerance);
        assert!((record.intersection.unsigned_area() - record.intersection_area).abs() < 1e-9);
        assert!(record.fraction > 0.0 && record.fraction <= 1.0);
    }
}

#[test]
fn test_index_never_misses_intersecting_parcels() {
    let (roads, parcels) = town();
    let (prepared, diagnostics) = PreparedParcels::prepare(&parcels);
    assert!(diagnostics.is_empty());

    for capacity in [1, 4, 8, 64] {
        let index = SpatialIndex::from_parcels(&prepared, capacity);
        let set = BufferGenerator::default().generate(&roads, 20.0).unwrap().set;

        for buffer in set.iter() {
            let candidates = index.query_geometry(&buffer.geometry);
            for (slot, parcel) in prepared.iter().enumerate() {
                if parcel.geometry.intersects(&buffer.geometry) {
                    assert!(
                        candidates.contains(&slot),
                        "capacity {}: parcel {} missed for {:?}",
                        capacity,
                        parcel.id,
                        buffer.source
                    );
                }
            }
        }
    }
}

#[test]
fn test_intersecting_sets_grow_with_distance() {
    let (roads, parcels) = town();
    let distances = [5.0, 10.0, 20.0, 40.0, 80.0];
    let output = Analysis::new(AnalysisConfig::with_distances(distances))
        .unwrap()
        .run(&roads, &parcels)
        .unwrap();

    for pair in distances.windows(2) {
        let near = output.result.intersecting_parcel_ids(pair[0]);
        let far = output.result.intersecting_parcel_ids(pair[1]);
        assert!(near.len() <= far.len());
        assert!(near.iter().all(|id| far.contains(id)), "{} vs {}", pair[0], pair[1]);
    }
}
