use crate::config::AppConfig;
use crate::flowers::FlowerTable;
use crate::types::{FlowerRecord, StateFeature};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use geo::{BoundingRect, Contains, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

// Wrapper for RTree indexing
pub struct FeatureIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub features: Vec<StateFeature>,
    pub flowers: FlowerTable,
    pub tree: RTree<FeatureIndex>,
}

impl AppState {
    pub fn new(features: Vec<StateFeature>, flowers: FlowerTable) -> Self {
        let tree_items: Vec<FeatureIndex> = features
            .iter()
            .enumerate()
            .filter_map(|(i, feature)| {
                let rect = feature.geometry.bounding_rect()?;
                Some(FeatureIndex {
                    index: i,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        AppState {
            tree: RTree::bulk_load(tree_items),
            features,
            flowers,
        }
    }

    /// The state whose polygon contains the given lon/lat, if any.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<&StateFeature> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);

        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|candidate| self.features.get(candidate.index))
            .find(|feature| feature.geometry.contains(&point))
    }

    pub fn lookup(&self, params: &FlowerParams) -> Vec<&FlowerRecord> {
        match (&params.state, &params.common_name) {
            (Some(state), Some(name)) => self
                .flowers
                .by_state(state)
                .into_iter()
                .filter(|r| &r.common_name == name)
                .collect(),
            (Some(state), None) => self.flowers.by_state(state),
            (None, Some(name)) => self.flowers.by_common_name(name),
            (None, None) => self.flowers.records.iter().collect(),
        }
    }
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize, Default)]
pub struct FlowerParams {
    pub state: Option<String>,
    pub common_name: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct QueryResponse {
    key: String,
    attributes: BTreeMap<String, String>,
    flower: BTreeMap<String, String>,
}

impl From<&StateFeature> for QueryResponse {
    fn from(feature: &StateFeature) -> Self {
        QueryResponse {
            key: feature.key.clone(),
            attributes: feature.attributes.clone(),
            flower: feature.flower.to_map(),
        }
    }
}

pub fn router(state: Arc<AppState>, map_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/api/query", get(query_handler))
        .route("/api/flowers", get(flowers_handler))
        .nest_service("/maps", ServeDir::new(map_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, features: Vec<StateFeature>, flowers: FlowerTable) -> Result<()> {
    info!("Building spatial index for {} states...", features.len());
    let state = Arc::new(AppState::new(features, flowers));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let app = router(state, &config.output.dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    Json(state.locate(params.lon, params.lat).map(QueryResponse::from))
}

async fn flowers_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FlowerParams>,
) -> Json<Vec<BTreeMap<String, String>>> {
    Json(state.lookup(&params).into_iter().map(FlowerRecord::to_map).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowers::read_flowers;
    use geo::{polygon, MultiPolygon};

    fn state() -> AppState {
        let flowers = read_flowers(
            "State\tCommon name\nKansas\tSunflower\nMaryland\tBlack-eyed Susan\nNebraska\tGoldenrod\n"
                .as_bytes(),
            '\t',
            "State",
            "Common name",
        )
        .unwrap();

        let kansas = StateFeature {
            key: "Kansas".to_string(),
            attributes: BTreeMap::from([("NAME".to_string(), "Kansas".to_string())]),
            flower: flowers.records[0].clone(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: -102.05, y: 37.0),
                (x: -94.6, y: 37.0),
                (x: -94.6, y: 40.0),
                (x: -102.05, y: 40.0),
            ]]),
        };
        let nebraska = StateFeature {
            key: "Nebraska".to_string(),
            attributes: BTreeMap::from([("NAME".to_string(), "Nebraska".to_string())]),
            flower: flowers.records[2].clone(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: -104.05, y: 40.0),
                (x: -95.3, y: 40.0),
                (x: -95.3, y: 43.0),
                (x: -104.05, y: 43.0),
            ]]),
        };

        AppState::new(vec![kansas, nebraska], flowers)
    }

    #[test]
    fn locates_the_containing_state() {
        let state = state();
        let found = state.locate(-98.0, 38.5).unwrap();
        assert_eq!(found.key, "Kansas");

        let response = QueryResponse::from(found);
        assert_eq!(response.flower.get("Common name").map(String::as_str), Some("Sunflower"));
        assert_eq!(state.locate(-99.0, 41.5).unwrap().key, "Nebraska");
        assert!(state.locate(-80.0, 38.5).is_none());
    }

    #[test]
    fn filters_flowers_by_query() {
        let state = state();
        let by_state = FlowerParams { state: Some("Maryland".to_string()), common_name: None };
        assert_eq!(state.lookup(&by_state)[0].common_name, "Black-eyed Susan");

        let by_name = FlowerParams { state: None, common_name: Some("Goldenrod".to_string()) };
        assert_eq!(state.lookup(&by_name)[0].state, "Nebraska");

        let both = FlowerParams {
            state: Some("Kansas".to_string()),
            common_name: Some("Goldenrod".to_string()),
        };
        assert!(state.lookup(&both).is_empty());
        assert_eq!(state.lookup(&FlowerParams::default()).len(), 3);
    }
}
