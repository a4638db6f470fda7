use geo::MultiPolygon;
use std::collections::BTreeMap;

/// One row of the flower table. Columns keep the order of the file header.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowerRecord {
    pub state: String,
    pub common_name: String,
    pub columns: Vec<(String, String)>,
}

impl FlowerRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.columns.iter().cloned().collect()
    }
}

/// A boundary polygon as read from the geometry file, before the join.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub key: String,
    pub attributes: BTreeMap<String, String>,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct StateFeature {
    pub key: String,
    pub attributes: BTreeMap<String, String>,
    pub flower: FlowerRecord,
    pub geometry: MultiPolygon<f64>,
}

impl StateFeature {
    /// Looks a column up in the shape attributes first, then in the flower row.
    pub fn field(&self, column: &str) -> Option<&str> {
        self.attributes
            .get(column)
            .map(String::as_str)
            .or_else(|| self.flower.get(column))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinReport {
    pub matched: usize,
    pub unmatched_flowers: Vec<String>,
    pub unmatched_boundaries: Vec<String>,
}
