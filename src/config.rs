use crate::projection::Crs;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const NORTH_AMERICA_EQDC: &str = "+proj=eqdc +lat_0=40 +lon_0=-96 +lat_1=20 +lat_2=60 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub flowers: PathBuf,
    pub boundaries: PathBuf,
    #[serde(default = "default_join_column_shape")]
    pub join_column_shape: String,
    #[serde(default = "default_join_column_flowers")]
    pub join_column_flowers: String,
    #[serde(default = "default_common_name_column")]
    pub common_name_column: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub strict_join: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectionConfig {
    #[serde(default = "default_source_crs")]
    pub source_crs: String,
    #[serde(default = "default_target")]
    pub target: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_margin")]
    pub margin: u32,
    #[serde(default)]
    pub maps: Vec<MapSpec>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MapCrs {
    #[default]
    Geographic,
    Projected,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MapSpec {
    pub file: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub crs: MapCrs,
    #[serde(default = "default_true")]
    pub states: bool,
    #[serde(default)]
    pub centroids: bool,
    /// Column written at each state's centroid: a shape attribute or a flower column.
    #[serde(default)]
    pub label: Option<String>,
    /// Extra markers, given in the map's own coordinate system.
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
    #[serde(default)]
    pub axes: bool,
    #[serde(default = "default_fill")]
    pub fill: String, // Hex code
    #[serde(default = "default_edge")]
    pub edge: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.projections()?;
        Ok(config)
    }

    /// Parses the source and target CRS. Only geographic EPSG:4326 data is accepted as a source.
    pub fn projections(&self) -> Result<(Crs, Crs)> {
        let projection = &self.projection;
        let source = Crs::parse(&projection.source_crs)
            .with_context(|| format!("Invalid source CRS: {}", projection.source_crs))?;
        if source != Crs::Geographic {
            bail!(
                "Unsupported source CRS: {} (only EPSG:4326 is supported)",
                projection.source_crs
            );
        }
        let target = Crs::parse(&projection.target)
            .with_context(|| format!("Invalid target projection: {}", projection.target))?;
        Ok((source, target))
    }

    /// Config used when the input files are passed on the command line.
    pub fn default_for(flowers: PathBuf, boundaries: PathBuf) -> Self {
        AppConfig {
            input: InputConfig {
                flowers,
                boundaries,
                join_column_shape: default_join_column_shape(),
                join_column_flowers: default_join_column_flowers(),
                common_name_column: default_common_name_column(),
                delimiter: default_delimiter(),
                strict_join: false,
            },
            projection: ProjectionConfig::default(),
            output: OutputConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// The configured maps, or the six-map narrative when none are listed.
    pub fn maps(&self) -> Vec<MapSpec> {
        if self.output.maps.is_empty() {
            default_maps(&self.input)
        } else {
            self.output.maps.clone()
        }
    }

    /// Columns the maps label with, so shape loaders know what to keep.
    pub fn label_columns(&self) -> Vec<String> {
        let mut columns = vec![self.input.join_column_shape.clone()];
        for map in self.maps() {
            if let Some(label) = map.label {
                if !columns.contains(&label) {
                    columns.push(label);
                }
            }
        }
        columns
    }
}

impl MapSpec {
    fn new(file: &str, crs: MapCrs) -> Self {
        MapSpec {
            file: file.to_string(),
            title: None,
            crs,
            states: true,
            centroids: false,
            label: None,
            points: Vec::new(),
            axes: false,
            fill: default_fill(),
            edge: default_edge(),
        }
    }
}

pub fn default_maps(input: &InputConfig) -> Vec<MapSpec> {
    let outline = MapSpec {
        axes: true,
        ..MapSpec::new("outline.png", MapCrs::Geographic)
    };
    let projected = MapSpec {
        title: Some("USA! USA!".to_string()),
        ..MapSpec::new("projected.png", MapCrs::Projected)
    };
    let state_names = MapSpec {
        title: Some("USA! USA!".to_string()),
        label: Some(input.join_column_shape.clone()),
        ..MapSpec::new("state_names.svg", MapCrs::Projected)
    };
    let flowers = MapSpec {
        title: Some("USA flowers".to_string()),
        label: Some(input.common_name_column.clone()),
        ..MapSpec::new("flowers.svg", MapCrs::Projected)
    };
    let centroids = MapSpec {
        centroids: true,
        axes: true,
        ..MapSpec::new("centroids.png", MapCrs::Geographic)
    };
    let point = MapSpec {
        states: false,
        points: vec![[1.0, 2.0]],
        axes: true,
        ..MapSpec::new("point.png", MapCrs::Geographic)
    };
    vec![outline, projected, state_names, flowers, centroids, point]
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        ProjectionConfig {
            source_crs: default_source_crs(),
            target: default_target(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: default_output_dir(),
            width: default_width(),
            height: default_height(),
            margin: default_margin(),
            maps: Vec::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: default_port() }
    }
}

fn default_join_column_shape() -> String {
    "NAME".to_string()
}

fn default_join_column_flowers() -> String {
    "State".to_string()
}

fn default_common_name_column() -> String {
    "Common name".to_string()
}

fn default_delimiter() -> char {
    '\t'
}

fn default_source_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_target() -> String {
    NORTH_AMERICA_EQDC.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("maps")
}

fn default_width() -> u32 {
    600
}

fn default_height() -> u32 {
    600
}

fn default_margin() -> u32 {
    24
}

fn default_true() -> bool {
    true
}

fn default_fill() -> String {
    "#1f77b4".to_string()
}

fn default_edge() -> String {
    "#ffffff".to_string()
}

fn default_port() -> u16 {
    3000
}
