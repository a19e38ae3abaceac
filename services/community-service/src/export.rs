use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::geojson::{Feature, FeatureCollection, Geometry, Ring};
use crate::mercator;
use crate::models::ProjectRef;
use crate::schema::{namespaced_key, QuestionKind, SchemaRegistry};
use crate::store::{ProjectDirectory, RecordExporter};

/// At most this many projects of a category enter one export.
const MAX_EXPORT_PROJECTS: usize = 15;

/// Task-run payload fields that never correspond to survey questions.
const RESERVED_KEYS: [&str; 5] = ["img", "isMigrated", "son_app_id", "task_id", "project_id"];

/// Downstream map consumers key on these exact names.
const TOTAL_KEY: &str = "GEOTAGX_TOTAL";
const GEOLOCATION_KEY_FIELD: &str = "_geotagx_geolocation_key";

const TASK_RUN_ENTITY: &str = "task_run";

/// A structural defect in exported task runs. Any of these fails the
/// whole export rather than silently dropping contributions.
#[derive(Debug)]
pub enum ExportError {
    BadRecords { project_id: i64, detail: String },
    MissingImage { project_id: i64 },
    BadGeoAnswer { key: String, detail: String },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::BadRecords { project_id, detail } => {
                write!(f, "task runs of project {project_id} did not parse: {detail}")
            }
            ExportError::MissingImage { project_id } => {
                write!(f, "task run of project {project_id} carries no image url")
            }
            ExportError::BadGeoAnswer { key, detail } => {
                write!(f, "geotagging answer {key} is malformed: {detail}")
            }
        }
    }
}

/// Builds the GeoJSON feature collection for one project category.
///
/// Each feature is one image: its geometry comes from the geotagging
/// answers drawn over it, its properties from the per-question answer
/// summaries of every project that showed the image.
pub fn export_category(
    projects: &dyn ProjectDirectory,
    exporter: &dyn RecordExporter,
    registry: &SchemaRegistry,
    category: &str,
) -> Result<FeatureCollection, ExportError> {
    let eligible = eligible_projects(projects, registry, category);
    if eligible.is_empty() {
        return Ok(FeatureCollection::empty());
    }

    let records = fetch_records(exporter, &eligible)?;
    let accumulator = summarize(records, &eligible, registry)?;
    Ok(build_collection(reproject(accumulator)))
}

fn eligible_projects(
    projects: &dyn ProjectDirectory,
    registry: &SchemaRegistry,
    category: &str,
) -> Vec<ProjectRef> {
    projects
        .projects_in_category(category, 1, MAX_EXPORT_PROJECTS)
        .into_iter()
        .filter(|project| registry.questions(&project.short_name).is_some())
        .collect()
}

#[derive(Deserialize)]
struct RawRecord {
    info: Map<String, Value>,
}

/// Pulls every eligible project's task runs and flattens them into
/// info payloads, stamping in the owning project id.
fn fetch_records(
    exporter: &dyn RecordExporter,
    eligible: &[ProjectRef],
) -> Result<Vec<Map<String, Value>>, ExportError> {
    let mut records = Vec::new();
    for project in eligible {
        let joined = exporter.stream_records(TASK_RUN_ENTITY, project.id).concat();
        if joined.trim().is_empty() {
            continue;
        }

        let parsed: Vec<RawRecord> =
            serde_json::from_str(&joined).map_err(|err| ExportError::BadRecords {
                project_id: project.id,
                detail: err.to_string(),
            })?;

        for mut record in parsed {
            record
                .info
                .insert("project_id".to_string(), Value::from(project.id));
            records.push(record.info);
        }
    }
    Ok(records)
}

#[derive(Debug)]
enum SummaryEntry {
    Categorical {
        title: String,
        counts: BTreeMap<String, u64>,
    },
    Geo {
        rings: Vec<Ring>,
    },
    Total(u64),
}

#[derive(Debug, Default)]
struct ImageSummary {
    entries: BTreeMap<String, SummaryEntry>,
    geolocation_key: Option<String>,
}

impl ImageSummary {
    fn push_ring(&mut self, key: &str, ring: Ring) {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| SummaryEntry::Geo { rings: Vec::new() });
        if let SummaryEntry::Geo { rings } = entry {
            rings.push(ring);
        }
    }

    fn bump_answer(&mut self, key: &str, title: &str, value: &Value) {
        let label = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let entry =
            self.entries
                .entry(key.to_string())
                .or_insert_with(|| SummaryEntry::Categorical {
                    title: title.to_string(),
                    counts: BTreeMap::new(),
                });
        if let SummaryEntry::Categorical { counts, .. } = entry {
            *counts.entry(label).or_insert(0) += 1;
        }
    }
}

#[derive(Debug, Default)]
struct ExportAccumulator {
    images: BTreeMap<String, ImageSummary>,
}

fn summarize(
    records: Vec<Map<String, Value>>,
    eligible: &[ProjectRef],
    registry: &SchemaRegistry,
) -> Result<ExportAccumulator, ExportError> {
    let short_names: BTreeMap<i64, &str> = eligible
        .iter()
        .map(|project| (project.id, project.short_name.as_str()))
        .collect();

    // Group by image url, then by contributing project.
    let mut grouped: BTreeMap<String, BTreeMap<i64, Vec<&Map<String, Value>>>> = BTreeMap::new();
    for info in &records {
        let project_id = info
            .get("project_id")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let img = info
            .get("img")
            .and_then(Value::as_str)
            .ok_or(ExportError::MissingImage { project_id })?;
        grouped
            .entry(img.to_string())
            .or_default()
            .entry(project_id)
            .or_default()
            .push(info);
    }

    let mut accumulator = ExportAccumulator::default();
    for (img, by_project) in grouped {
        let mut summary = ImageSummary::default();
        for (project_id, slice) in by_project {
            let Some(short_name) = short_names.get(&project_id).copied() else {
                continue;
            };
            let Some(questions) = registry.questions(short_name) else {
                continue;
            };

            for info in &slice {
                for (field, value) in info.iter() {
                    if RESERVED_KEYS.contains(&field.as_str()) {
                        continue;
                    }
                    let Some(question) = questions.get(field) else {
                        continue;
                    };
                    let key = namespaced_key(short_name, field);
                    match question.kind {
                        QuestionKind::Geotagging => {
                            let ring = ring_from_value(&key, value)?;
                            summary.push_ring(&key, ring);
                            if let Some(previous) = &summary.geolocation_key {
                                if previous != &key {
                                    tracing::warn!(
                                        img = img.as_str(),
                                        previous = previous.as_str(),
                                        replacement = key.as_str(),
                                        "several geotagging questions target one image; keeping the last"
                                    );
                                }
                            }
                            summary.geolocation_key = Some(key);
                        }
                        QuestionKind::Categorical => {
                            summary.bump_answer(&key, &question.title, value);
                        }
                    }
                }
            }

            summary.entries.insert(
                namespaced_key(short_name, TOTAL_KEY),
                SummaryEntry::Total(slice.len() as u64),
            );
        }
        accumulator.images.insert(img, summary);
    }

    Ok(accumulator)
}

fn ring_from_value(key: &str, value: &Value) -> Result<Ring, ExportError> {
    match value {
        Value::Array(points) => points
            .iter()
            .map(|point| pair_from_value(key, point))
            .collect(),
        Value::String(text) => Ok(vec![pair_from_text(key, text)?]),
        other => Err(ExportError::BadGeoAnswer {
            key: key.to_string(),
            detail: format!("expected an outline or a coordinate pair, got {other}"),
        }),
    }
}

fn pair_from_value(key: &str, point: &Value) -> Result<[f64; 2], ExportError> {
    let parts = point.as_array().ok_or_else(|| ExportError::BadGeoAnswer {
        key: key.to_string(),
        detail: format!("vertex {point} is not a pair"),
    })?;
    if parts.len() != 2 {
        return Err(ExportError::BadGeoAnswer {
            key: key.to_string(),
            detail: format!("vertex has {} coordinates", parts.len()),
        });
    }
    match (parts[0].as_f64(), parts[1].as_f64()) {
        (Some(x), Some(y)) => Ok([x, y]),
        _ => Err(ExportError::BadGeoAnswer {
            key: key.to_string(),
            detail: format!("vertex {point} is not numeric"),
        }),
    }
}

fn pair_from_text(key: &str, text: &str) -> Result<[f64; 2], ExportError> {
    let pieces: Vec<&str> = text
        .split([',', ' '])
        .filter(|piece| !piece.is_empty())
        .collect();
    if pieces.len() == 2 {
        if let (Ok(x), Ok(y)) = (pieces[0].parse::<f64>(), pieces[1].parse::<f64>()) {
            return Ok([x, y]);
        }
    }
    Err(ExportError::BadGeoAnswer {
        key: key.to_string(),
        detail: format!("coordinate pair {text:?} did not parse"),
    })
}

/// Converts collected rings to lon/lat, dropping vertices outside the
/// Mercator extent and rings that end up empty.
fn reproject(mut accumulator: ExportAccumulator) -> ExportAccumulator {
    for summary in accumulator.images.values_mut() {
        for entry in summary.entries.values_mut() {
            if let SummaryEntry::Geo { rings } = entry {
                *rings = rings
                    .iter()
                    .map(|ring| {
                        ring.iter()
                            .filter_map(|&[x, y]| mercator::to_wgs84(x, y))
                            .collect::<Ring>()
                    })
                    .filter(|ring| !ring.is_empty())
                    .collect();
            }
        }
    }
    accumulator
}

fn build_collection(accumulator: ExportAccumulator) -> FeatureCollection {
    let mut features = Vec::new();
    for (img, summary) in accumulator.images {
        let Some(geolocation_key) = summary.geolocation_key else {
            continue;
        };
        let rings = match summary.entries.get(&geolocation_key) {
            Some(SummaryEntry::Geo { rings }) => rings.clone(),
            _ => continue,
        };
        let Some(geometry) = Geometry::from_rings(rings) else {
            continue;
        };

        let mut properties = Map::new();
        properties.insert("img".to_string(), Value::String(img));
        properties.insert(
            GEOLOCATION_KEY_FIELD.to_string(),
            Value::String(geolocation_key),
        );
        for (key, entry) in summary.entries {
            match entry {
                SummaryEntry::Categorical { title, counts } => {
                    let histogram: Map<String, Value> = counts
                        .into_iter()
                        .map(|(answer, count)| (answer, Value::from(count)))
                        .collect();
                    let mut body = Map::new();
                    body.insert("title".to_string(), Value::String(title));
                    body.insert("answer_summary".to_string(), Value::Object(histogram));
                    properties.insert(key, Value::Object(body));
                }
                SummaryEntry::Total(count) => {
                    properties.insert(key, Value::from(count));
                }
                SummaryEntry::Geo { .. } => {}
            }
        }

        features.push(Feature::new(geometry, properties));
    }
    FeatureCollection::new(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, ProjectStats};
    use serde_json::json;

    struct StubProjects {
        refs: Vec<ProjectRef>,
    }

    impl ProjectDirectory for StubProjects {
        fn projects_in_category(
            &self,
            category: &str,
            page: usize,
            per_page: usize,
        ) -> Vec<ProjectRef> {
            assert_eq!(page, 1);
            assert_eq!(per_page, MAX_EXPORT_PROJECTS);
            if category == "nature" {
                self.refs.clone()
            } else {
                Vec::new()
            }
        }

        fn by_short_name(&self, _: &str) -> Option<Project> {
            None
        }

        fn owned_by(&self, _: i64) -> Vec<Project> {
            Vec::new()
        }

        fn transfer_ownership(&self, _: i64, _: i64) -> bool {
            false
        }

        fn stats(&self, _: i64) -> ProjectStats {
            ProjectStats::default()
        }

        fn invalidate(&self, _: i64) {}
    }

    struct StubExporter {
        payloads: BTreeMap<i64, Vec<String>>,
    }

    impl RecordExporter for StubExporter {
        fn stream_records(&self, entity: &str, project_id: i64) -> Vec<String> {
            assert_eq!(entity, TASK_RUN_ENTITY);
            self.payloads.get(&project_id).cloned().unwrap_or_default()
        }
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_toml_str(
            r#"
            [projects.volcano_watch]
            questions = [
                { type = "geotagging", title = "Outline the ash plume", answer = { saved_as = "plume" } },
                { type = "categorical", title = "What do you see?", answer = { saved_as = "sight" } },
            ]

            [projects.flood_lines]
            questions = [
                { type = "geotagging", title = "Trace the waterline", answer = { saved_as = "plume" } },
            ]
            "#,
        )
        .unwrap()
    }

    fn project_ref(id: i64, short_name: &str) -> ProjectRef {
        ProjectRef {
            id,
            short_name: short_name.to_string(),
        }
    }

    fn split_chunks(payload: &str) -> Vec<String> {
        let mid = payload.len() / 2;
        vec![payload[..mid].to_string(), payload[mid..].to_string()]
    }

    fn record(info: Value) -> Value {
        json!({ "id": 0, "project_id": 0, "info": info })
    }

    fn single_project_export(records: Vec<Value>) -> Result<FeatureCollection, ExportError> {
        let projects = StubProjects {
            refs: vec![project_ref(7, "volcano_watch")],
        };
        let exporter = StubExporter {
            payloads: BTreeMap::from([(7, split_chunks(&Value::Array(records).to_string()))]),
        };
        export_category(&projects, &exporter, &registry(), "nature")
    }

    #[test]
    fn unknown_category_exports_an_empty_collection() {
        let projects = StubProjects {
            refs: vec![project_ref(7, "volcano_watch")],
        };
        let exporter = StubExporter {
            payloads: BTreeMap::new(),
        };
        let collection =
            export_category(&projects, &exporter, &registry(), "wildlife").unwrap();

        let json = serde_json::to_string(&collection).unwrap();
        assert_eq!(json, r#"{"type":"FeatureCollection","features":[]}"#);
    }

    #[test]
    fn projects_without_schemas_are_skipped() {
        let projects = StubProjects {
            refs: vec![project_ref(7, "volcano_watch"), project_ref(8, "mystery")],
        };
        // Project 8 would fail parsing if it were ever fetched.
        let exporter = StubExporter {
            payloads: BTreeMap::from([
                (7, split_chunks("[]")),
                (8, vec!["not json".to_string()]),
            ]),
        };
        let collection = export_category(&projects, &exporter, &registry(), "nature").unwrap();
        assert!(collection.features.is_empty());
    }

    #[test]
    fn aggregates_categorical_answers_into_histograms() {
        let records = ["ash plume", "ash plume", "smoke"]
            .iter()
            .map(|answer| {
                record(json!({
                    "img": "http://images/42.jpg",
                    "task_id": 9,
                    "isMigrated": true,
                    "notes": "unregistered key",
                    "sight": answer,
                    "plume": [[45.0, -10.0]],
                }))
            })
            .collect();
        let collection = single_project_export(records).unwrap();
        assert_eq!(collection.features.len(), 1);

        let feature = &collection.features[0];
        let properties = &feature.properties;
        let keys: Vec<&str> = properties.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "_geotagx_geolocation_key",
                "img",
                "volcano_watch::GEOTAGX_TOTAL",
                "volcano_watch::sight",
            ]
        );

        assert_eq!(properties["img"], json!("http://images/42.jpg"));
        assert_eq!(
            properties["_geotagx_geolocation_key"],
            json!("volcano_watch::plume")
        );
        assert_eq!(properties["volcano_watch::GEOTAGX_TOTAL"], json!(3));
        assert_eq!(
            properties["volcano_watch::sight"],
            json!({
                "title": "What do you see?",
                "answer_summary": { "ash plume": 2, "smoke": 1 }
            })
        );
    }

    #[test]
    fn reprojects_mercator_rings() {
        let records = vec![record(json!({
            "img": "http://images/sf.jpg",
            "plume": [[-13627000.0, 4550000.0]],
        }))];
        let collection = single_project_export(records).unwrap();

        match &collection.features[0].geometry {
            Geometry::Point { coordinates: [lon, lat] } => {
                assert!((lon + 122.41).abs() < 0.01, "lon was {lon}");
                assert!((lat - 37.79).abs() < 0.01, "lat was {lat}");
            }
            other => panic!("expected a point, got {other:?}"),
        }
    }

    #[test]
    fn geographic_rings_pass_through_unchanged() {
        let records = vec![record(json!({
            "img": "http://images/line.jpg",
            "plume": [[45.0, -10.0], [46.0, -11.0]],
        }))];
        let collection = single_project_export(records).unwrap();

        assert_eq!(
            collection.features[0].geometry,
            Geometry::LineString {
                coordinates: vec![[45.0, -10.0], [46.0, -11.0]]
            }
        );
    }

    #[test]
    fn rings_from_several_runs_build_a_multipolygon() {
        let records = vec![
            record(json!({
                "img": "http://images/two.jpg",
                "plume": [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
            })),
            record(json!({
                "img": "http://images/two.jpg",
                "plume": [[5.0, 5.0]],
            })),
        ];
        let collection = single_project_export(records).unwrap();

        match &collection.features[0].geometry {
            Geometry::MultiPolygon { coordinates } => assert_eq!(coordinates.len(), 2),
            other => panic!("expected a multipolygon, got {other:?}"),
        }
        assert_eq!(
            collection.features[0].properties["volcano_watch::GEOTAGX_TOTAL"],
            json!(2)
        );
    }

    #[test]
    fn string_answers_parse_as_single_points() {
        for text in ["45.5,-10.25", "45.5 -10.25", "45.5, -10.25"] {
            let records = vec![record(json!({
                "img": "http://images/str.jpg",
                "plume": text,
            }))];
            let collection = single_project_export(records).unwrap();
            assert_eq!(
                collection.features[0].geometry,
                Geometry::Point {
                    coordinates: [45.5, -10.25]
                },
                "failed for {text:?}"
            );
        }
    }

    #[test]
    fn namespaces_keep_projects_apart() {
        let projects = StubProjects {
            refs: vec![
                project_ref(7, "volcano_watch"),
                project_ref(8, "flood_lines"),
            ],
        };
        let volcano_records = Value::Array(vec![record(json!({
            "img": "http://images/shared.jpg",
            "plume": [[1.0, 1.0]],
        }))])
        .to_string();
        let flood_records = Value::Array(vec![record(json!({
            "img": "http://images/shared.jpg",
            "plume": [[2.0, 2.0]],
        }))])
        .to_string();
        let exporter = StubExporter {
            payloads: BTreeMap::from([
                (7, split_chunks(&volcano_records)),
                (8, split_chunks(&flood_records)),
            ]),
        };

        let collection = export_category(&projects, &exporter, &registry(), "nature").unwrap();
        assert_eq!(collection.features.len(), 1);

        let properties = &collection.features[0].properties;
        assert_eq!(properties["volcano_watch::GEOTAGX_TOTAL"], json!(1));
        assert_eq!(properties["flood_lines::GEOTAGX_TOTAL"], json!(1));
        // Projects iterate in id order, so the later one owns the marker.
        assert_eq!(
            properties["_geotagx_geolocation_key"],
            json!("flood_lines::plume")
        );
        assert_eq!(
            collection.features[0].geometry,
            Geometry::Point {
                coordinates: [2.0, 2.0]
            }
        );
    }

    #[test]
    fn images_without_geo_answers_are_dropped() {
        let records = vec![record(json!({
            "img": "http://images/flat.jpg",
            "sight": "smoke",
        }))];
        let collection = single_project_export(records).unwrap();
        assert!(collection.features.is_empty());
    }

    #[test]
    fn out_of_envelope_vertices_are_dropped() {
        let records = vec![record(json!({
            "img": "http://images/far.jpg",
            "plume": [[25_000_000.0, 0.0]],
        }))];
        let collection = single_project_export(records).unwrap();
        assert!(collection.features.is_empty());

        let records = vec![record(json!({
            "img": "http://images/mixed.jpg",
            "plume": [[25_000_000.0, 0.0], [45.0, -10.0]],
        }))];
        let collection = single_project_export(records).unwrap();
        assert_eq!(
            collection.features[0].geometry,
            Geometry::Point {
                coordinates: [45.0, -10.0]
            }
        );
    }

    #[test]
    fn missing_image_fails_the_export() {
        let records = vec![record(json!({ "sight": "smoke" }))];
        let err = single_project_export(records).unwrap_err();
        assert!(matches!(err, ExportError::MissingImage { project_id: 7 }));

        let records = vec![record(json!({ "img": 4, "sight": "smoke" }))];
        let err = single_project_export(records).unwrap_err();
        assert!(matches!(err, ExportError::MissingImage { .. }));
    }

    #[test]
    fn malformed_geo_answers_fail_the_export() {
        let cases = [
            json!(42),
            json!([[1.0, 2.0, 3.0]]),
            json!([["a", "b"]]),
            json!("one,two"),
            json!("45.0"),
        ];
        for bad in cases {
            let records = vec![record(json!({
                "img": "http://images/bad.jpg",
                "plume": bad,
            }))];
            let err = single_project_export(records).unwrap_err();
            assert!(
                matches!(err, ExportError::BadGeoAnswer { ref key, .. } if key == "volcano_watch::plume"),
                "unexpected error {err}"
            );
        }
    }

    #[test]
    fn undecodable_payloads_fail_the_export() {
        let projects = StubProjects {
            refs: vec![project_ref(7, "volcano_watch")],
        };
        let exporter = StubExporter {
            payloads: BTreeMap::from([(7, vec!["{\"not\":".to_string(), " \"an array\"}".to_string()])]),
        };
        let err = export_category(&projects, &exporter, &registry(), "nature").unwrap_err();
        assert!(matches!(err, ExportError::BadRecords { project_id: 7, .. }));
    }

    #[test]
    fn empty_record_streams_export_nothing() {
        let projects = StubProjects {
            refs: vec![project_ref(7, "volcano_watch")],
        };
        let exporter = StubExporter {
            payloads: BTreeMap::new(),
        };
        let collection = export_category(&projects, &exporter, &registry(), "nature").unwrap();
        assert!(collection.features.is_empty());
    }

    #[test]
    fn export_is_deterministic_and_ordered_by_image() {
        let records = vec![
            record(json!({ "img": "http://images/b.jpg", "plume": [[2.0, 2.0]] })),
            record(json!({ "img": "http://images/a.jpg", "plume": [[1.0, 1.0]] })),
        ];
        let first = single_project_export(records.clone()).unwrap();
        let second = single_project_export(records).unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.features[0].properties["img"], json!("http://images/a.jpg"));
        assert_eq!(first.features[1].properties["img"], json!("http://images/b.jpg"));
    }
}
