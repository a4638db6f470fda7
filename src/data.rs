use crate::config::AppConfig;
use crate::error::JoinError;
use crate::flowers::{load_flowers, FlowerTable};
use crate::types::{Boundary, FlowerRecord, JoinReport, StateFeature};
use anyhow::{anyhow, Context, Result};
use geo::MultiPolygon;
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

pub struct LoadedData {
    pub flowers: FlowerTable,
    pub features: Vec<StateFeature>,
    pub report: JoinReport,
}

pub fn load_data(config: &AppConfig) -> Result<LoadedData> {
    let input = &config.input;

    // 1. Load the flower table
    let flowers = load_flowers(
        &input.flowers,
        input.delimiter,
        &input.join_column_flowers,
        &input.common_name_column,
    )?;

    // 2. Load Geometry (Shapefile or GeoJSON)
    let boundaries = load_boundaries(
        &input.boundaries,
        &input.join_column_shape,
        &config.label_columns(),
    )?;

    // 3. Join on the state name
    let (features, report) = join(boundaries, &flowers, input.strict_join)?;
    info!("Joined {} states with their flowers", report.matched);

    Ok(LoadedData { flowers, features, report })
}

/// Reads boundary polygons, keeping the join column plus any `keep` attributes.
pub fn load_boundaries(path: &Path, join_column: &str, keep: &[String]) -> Result<Vec<Boundary>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension: {:?}", path))?;

    let boundaries = match extension.as_str() {
        "shp" => load_shapefile(path, join_column, keep)?,
        "json" | "geojson" => load_geojson(path, join_column, keep)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    info!("Loaded {} boundaries from {:?}", boundaries.len(), path);
    Ok(boundaries)
}

fn dbase_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) => Some(s.trim_end().to_string()),
        FieldValue::Numeric(Some(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn load_shapefile(path: &Path, join_column: &str, keep: &[String]) -> Result<Vec<Boundary>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut boundaries = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        // Find the Join ID in the shapefile record (dbase)
        let id_value = record
            .get(join_column)
            .ok_or_else(|| anyhow!("Join column '{}' not found in Shapefile", join_column))?;

        let key = match id_value {
            FieldValue::Character(Some(s)) if !s.trim_end().is_empty() => s.trim_end().to_string(),
            FieldValue::Character(_) => {
                debug!("Skipping shape with a null '{}'", join_column);
                continue;
            }
            _ => return Err(anyhow!("Shapefile join column must be a string")),
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => {
                debug!("Skipping non-polygon shape for '{}'", key);
                continue;
            }
        };

        let attributes = keep
            .iter()
            .filter_map(|column| {
                record
                    .get(column)
                    .and_then(dbase_text)
                    .map(|value| (column.clone(), value))
            })
            .collect();

        boundaries.push(Boundary { key, attributes, geometry });
    }

    Ok(boundaries)
}

fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn load_geojson(path: &Path, join_column: &str, keep: &[String]) -> Result<Vec<Boundary>> {
    use geojson::GeoJson;
    use std::io::BufReader;

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);
    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut boundaries = Vec::new();

    for feature in collection.features {
        let properties = feature.properties.unwrap_or_default();

        let key = match properties.get(join_column).and_then(json_text) {
            Some(key) => key,
            None => {
                debug!("Skipping feature without '{}'", join_column);
                continue;
            }
        };

        let geometry = match feature.geometry {
            Some(geometry) => {
                let geometry: geo::Geometry<f64> = geometry
                    .value
                    .try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;

                match geometry {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        debug!("Skipping non-polygon feature '{}'", key);
                        continue;
                    }
                }
            }
            None => continue,
        };

        let attributes: BTreeMap<String, String> = keep
            .iter()
            .filter_map(|column| {
                properties
                    .get(column)
                    .and_then(json_text)
                    .map(|value| (column.clone(), value))
            })
            .collect();

        boundaries.push(Boundary { key, attributes, geometry });
    }

    Ok(boundaries)
}

/// Inner join of boundaries and flower rows on exact key equality.
///
/// Boundary order is preserved. A key repeated in the flower table is always
/// an error; in `strict` mode every row on both sides must match exactly once.
pub fn join(
    boundaries: Vec<Boundary>,
    flowers: &FlowerTable,
    strict: bool,
) -> Result<(Vec<StateFeature>, JoinReport), JoinError> {
    let mut by_state: HashMap<&str, &FlowerRecord> = HashMap::with_capacity(flowers.len());
    for record in &flowers.records {
        if by_state.insert(record.state.as_str(), record).is_some() {
            return Err(JoinError::DuplicateKey(record.state.clone()));
        }
    }

    let mut features = Vec::with_capacity(boundaries.len());
    let mut matched_keys: HashSet<String> = HashSet::new();
    let mut report = JoinReport::default();

    for boundary in boundaries {
        match by_state.get(boundary.key.as_str()) {
            Some(record) => {
                if !matched_keys.insert(boundary.key.clone()) && strict {
                    return Err(JoinError::DuplicateBoundary(boundary.key));
                }
                features.push(StateFeature {
                    key: boundary.key,
                    attributes: boundary.attributes,
                    flower: (*record).clone(),
                    geometry: boundary.geometry,
                });
            }
            None => report.unmatched_boundaries.push(boundary.key),
        }
    }

    report.matched = features.len();
    report.unmatched_flowers = flowers
        .records
        .iter()
        .filter(|r| !matched_keys.contains(&r.state))
        .map(|r| r.state.clone())
        .collect();

    if !report.unmatched_boundaries.is_empty() {
        warn!("Boundaries without a flower: {}", report.unmatched_boundaries.join(", "));
    }
    if !report.unmatched_flowers.is_empty() {
        warn!("Flowers without a boundary: {}", report.unmatched_flowers.join(", "));
    }

    if strict && !(report.unmatched_boundaries.is_empty() && report.unmatched_flowers.is_empty()) {
        return Err(JoinError::UnmatchedKeys {
            flowers: report.unmatched_flowers,
            boundaries: report.unmatched_boundaries,
        });
    }

    Ok((features, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowers::read_flowers;
    use geo::polygon;
    use std::io::Write;

    fn square(x: f64, y: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
        ]])
    }

    fn boundary(key: &str, x: f64) -> Boundary {
        Boundary {
            key: key.to_string(),
            attributes: BTreeMap::from([("NAME".to_string(), key.to_string())]),
            geometry: square(x, 0.0),
        }
    }

    fn table(tsv: &str) -> FlowerTable {
        read_flowers(tsv.as_bytes(), '\t', "State", "Common name").unwrap()
    }

    #[test]
    fn inner_join_keeps_boundary_order_and_reports_leftovers() {
        let flowers = table("State\tCommon name\nOhio\tRed carnation\nTexas\tBluebonnet\nGuam\tBougainvillea\n");
        let boundaries = vec![
            boundary("Texas", 0.0),
            boundary("District of Columbia", 1.0),
            boundary("Ohio", 2.0),
        ];

        let (features, report) = join(boundaries, &flowers, false).unwrap();

        let keys: Vec<_> = features.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["Texas", "Ohio"]);
        assert_eq!(features[0].flower.common_name, "Bluebonnet");
        assert_eq!(features[1].field("NAME"), Some("Ohio"));
        assert_eq!(features[1].field("Common name"), Some("Red carnation"));
        assert_eq!(
            report,
            JoinReport {
                matched: 2,
                unmatched_flowers: vec!["Guam".to_string()],
                unmatched_boundaries: vec!["District of Columbia".to_string()],
            }
        );
    }

    #[test]
    fn keys_match_exactly() {
        let flowers = table("State\tCommon name\nnew york\tRose\n");
        let (features, report) = join(vec![boundary("New York", 0.0)], &flowers, false).unwrap();
        assert!(features.is_empty());
        assert_eq!(report.unmatched_flowers, vec!["new york"]);
    }

    #[test]
    fn duplicate_flower_keys_are_rejected() {
        let flowers = table("State\tCommon name\nOhio\tRed carnation\nOhio\tTrillium\n");
        let err = join(vec![boundary("Ohio", 0.0)], &flowers, false).unwrap_err();
        assert_eq!(err, JoinError::DuplicateKey("Ohio".to_string()));
    }

    #[test]
    fn strict_join_requires_one_to_one() {
        let flowers = table("State\tCommon name\nOhio\tRed carnation\nTexas\tBluebonnet\n");

        let err = join(vec![boundary("Ohio", 0.0)], &flowers, true).unwrap_err();
        assert_eq!(
            err,
            JoinError::UnmatchedKeys { flowers: vec!["Texas".to_string()], boundaries: vec![] }
        );

        let err = join(
            vec![boundary("Ohio", 0.0), boundary("Ohio", 3.0), boundary("Texas", 1.0)],
            &flowers,
            true,
        )
        .unwrap_err();
        assert_eq!(err, JoinError::DuplicateBoundary("Ohio".to_string()));

        let (features, _) = join(
            vec![boundary("Texas", 1.0), boundary("Ohio", 0.0)],
            &flowers,
            true,
        )
        .unwrap();
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn loose_join_keeps_repeated_boundaries() {
        let flowers = table("State\tCommon name\nHawaii\tHibiscus\n");
        let (features, report) =
            join(vec![boundary("Hawaii", 0.0), boundary("Hawaii", 5.0)], &flowers, false).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(report.matched, 2);
        assert!(report.unmatched_flowers.is_empty());
    }

    const STATES_GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "NAME": "Colorado", "STUSPS": "CO", "ALAND": 268422891711 },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-109.05, 37.0], [-102.04, 37.0], [-102.04, 41.0], [-109.05, 41.0], [-109.05, 37.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "NAME": "Nowhere" },
                "geometry": { "type": "Point", "coordinates": [0.0, 0.0] }
            },
            {
                "type": "Feature",
                "properties": { "STUSPS": "XX" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
                }
            }
        ]
    }"#;

    #[test]
    fn loads_polygons_from_geojson() {
        let mut file = tempfile::Builder::new().suffix(".geojson").tempfile().unwrap();
        file.write_all(STATES_GEOJSON.as_bytes()).unwrap();

        let keep = vec!["NAME".to_string(), "ALAND".to_string(), "MISSING".to_string()];
        let boundaries = load_boundaries(file.path(), "NAME", &keep).unwrap();

        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].key, "Colorado");
        assert_eq!(boundaries[0].attributes.get("ALAND").map(String::as_str), Some("268422891711"));
        assert!(!boundaries[0].attributes.contains_key("MISSING"));
        assert_eq!(boundaries[0].geometry.0.len(), 1);
    }

    #[test]
    fn unsupported_extensions_are_rejected() {
        let err = load_boundaries(Path::new("states.kml"), "NAME", &[]).unwrap_err();
        assert!(err.to_string().contains("Unsupported geometry format"));
        assert!(load_boundaries(Path::new("states"), "NAME", &[]).is_err());
    }

    mod shapefiles {
        use super::*;
        use shapefile::dbase::{FieldName, Record, TableWriterBuilder};
        use shapefile::{Point, PointZ, Polygon, PolygonRing, PolygonZ, Writer};

        fn name_table() -> TableWriterBuilder {
            TableWriterBuilder::new()
                .add_character_field(FieldName::try_from("NAME").unwrap(), 32)
                .add_character_field(FieldName::try_from("STUSPS").unwrap(), 2)
        }

        fn record(name: Option<&str>, code: &str) -> Record {
            let mut record = Record::default();
            record.insert("NAME".to_string(), FieldValue::Character(name.map(str::to_string)));
            record.insert("STUSPS".to_string(), FieldValue::Character(Some(code.to_string())));
            record
        }

        // clockwise outer ring, as shapefiles store them
        fn square(x: f64) -> Vec<Point> {
            vec![
                Point::new(x, 0.0),
                Point::new(x, 1.0),
                Point::new(x + 1.0, 1.0),
                Point::new(x + 1.0, 0.0),
                Point::new(x, 0.0),
            ]
        }

        #[test]
        fn reads_polygons_trims_padding_and_skips_null_keys() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("states.shp");
            {
                let mut writer = Writer::from_path(&path, name_table()).unwrap();
                let rows = [
                    (Some("Ohio   "), "OH", 0.0),
                    (None, "XX", 2.0),
                    (Some("Texas"), "TX", 4.0),
                ];
                for (name, code, x) in rows {
                    let polygon = Polygon::new(PolygonRing::Outer(square(x)));
                    writer.write_shape_and_record(&polygon, &record(name, code)).unwrap();
                }
            }

            let keep = vec!["NAME".to_string(), "STUSPS".to_string()];
            let boundaries = load_boundaries(&path, "NAME", &keep).unwrap();

            let keys: Vec<_> = boundaries.iter().map(|b| b.key.as_str()).collect();
            assert_eq!(keys, vec!["Ohio", "Texas"]);
            assert_eq!(boundaries[0].attributes.get("NAME").map(String::as_str), Some("Ohio"));
            assert_eq!(boundaries[1].attributes.get("STUSPS").map(String::as_str), Some("TX"));
            assert_eq!(boundaries[1].geometry.0.len(), 1);
        }

        #[test]
        fn accepts_polygon_z() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("states_z.shp");
            {
                let mut writer = Writer::from_path(&path, name_table()).unwrap();
                let ring = square(0.0)
                    .into_iter()
                    .map(|p| PointZ::new(p.x, p.y, 10.0, 0.0))
                    .collect();
                let polygon = PolygonZ::new(PolygonRing::Outer(ring));
                writer.write_shape_and_record(&polygon, &record(Some("Colorado"), "CO")).unwrap();
            }

            let boundaries = load_boundaries(&path, "NAME", &[]).unwrap();
            assert_eq!(boundaries.len(), 1);
            assert_eq!(boundaries[0].key, "Colorado");
        }

        #[test]
        fn skips_non_polygon_shapes() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("points.shp");
            {
                let mut writer = Writer::from_path(&path, name_table()).unwrap();
                writer
                    .write_shape_and_record(&Point::new(1.0, 2.0), &record(Some("Nowhere"), "NW"))
                    .unwrap();
            }

            assert!(load_boundaries(&path, "NAME", &[]).unwrap().is_empty());
        }

        #[test]
        fn numeric_join_column_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("numeric.shp");
            {
                let table = TableWriterBuilder::new()
                    .add_numeric_field(FieldName::try_from("NAME").unwrap(), 10, 0);
                let mut writer = Writer::from_path(&path, table).unwrap();
                let mut record = Record::default();
                record.insert("NAME".to_string(), FieldValue::Numeric(Some(7.0)));
                let polygon = Polygon::new(PolygonRing::Outer(square(0.0)));
                writer.write_shape_and_record(&polygon, &record).unwrap();
            }

            let err = load_boundaries(&path, "NAME", &[]).unwrap_err();
            assert!(err.to_string().contains("must be a string"));
        }

        #[test]
        fn missing_join_column_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("states.shp");
            {
                let mut writer = Writer::from_path(&path, name_table()).unwrap();
                let polygon = Polygon::new(PolygonRing::Outer(square(0.0)));
                writer.write_shape_and_record(&polygon, &record(Some("Utah"), "UT")).unwrap();
            }

            let err = load_boundaries(&path, "STATE_NAME", &[]).unwrap_err();
            assert!(err.to_string().contains("Join column 'STATE_NAME'"));
        }
    }

    #[test]
    fn missing_shapefile_names_the_path() {
        let err = load_boundaries(Path::new("does/not/exist.shp"), "NAME", &[]).unwrap_err();
        assert!(format!("{:#}", err).contains("exist.shp"));
    }

    #[test]
    fn load_data_chains_load_and_join() {
        let dir = tempfile::tempdir().unwrap();
        let flowers = dir.path().join("stateflowers.txt");
        let states = dir.path().join("states.geojson");
        std::fs::write(&flowers, "State\tCommon name\nColorado\tColumbine\n").unwrap();
        std::fs::write(&states, STATES_GEOJSON).unwrap();

        let config = AppConfig::default_for(flowers, states);
        let loaded = load_data(&config).unwrap();

        assert_eq!(loaded.flowers.len(), 1);
        assert_eq!(loaded.report.matched, 1);
        assert_eq!(loaded.features[0].field("Common name"), Some("Columbine"));
        assert_eq!(loaded.features[0].field("NAME"), Some("Colorado"));
    }
}
