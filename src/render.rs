use crate::canvas::{canvas_for, hex_to_rgba, Canvas, Rings};
use crate::config::{AppConfig, MapCrs, MapSpec};
use crate::projection::{centroid, reproject};
use crate::types::StateFeature;
use anyhow::{Context, Result};
use geo::{BoundingRect, Coord, MultiPolygon, Rect};
use image::Rgba;
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

const CENTROID_COLOR: Rgba<u8> = Rgba([0xff, 0x7f, 0x0e, 255]);
const POINT_COLOR: Rgba<u8> = Rgba([0x1f, 0x77, 0xb4, 255]);
const MARKER_RADIUS: f64 = 3.0;

/// Maps data coordinates onto the image with a 1:1 aspect ratio, y pointing down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    min: Coord<f64>,
    max: Coord<f64>,
    scale: f64,
    offset: (f64, f64),
}

impl Viewport {
    pub fn fit(bounds: Rect<f64>, width: u32, height: u32, margin: u32) -> Self {
        let mut min = bounds.min();
        let mut max = bounds.max();
        // a lone point or a line still needs an extent to scale against
        let pad = |lo: &mut f64, hi: &mut f64| {
            if *hi - *lo <= f64::EPSILON {
                *lo -= 1.0;
                *hi += 1.0;
            }
        };
        pad(&mut min.x, &mut max.x);
        pad(&mut min.y, &mut max.y);

        let inner_w = (width.saturating_sub(margin.saturating_mul(2))).max(1) as f64;
        let inner_h = (height.saturating_sub(margin.saturating_mul(2))).max(1) as f64;
        let scale = (inner_w / (max.x - min.x)).min(inner_h / (max.y - min.y));

        let used_w = (max.x - min.x) * scale;
        let used_h = (max.y - min.y) * scale;
        let offset = (
            (width as f64 - used_w) / 2.0,
            (height as f64 - used_h) / 2.0,
        );

        Viewport { min, max, scale, offset }
    }

    pub fn to_pixel(&self, coord: Coord<f64>) -> (f64, f64) {
        (
            self.offset.0 + (coord.x - self.min.x) * self.scale,
            self.offset.1 + (self.max.y - coord.y) * self.scale,
        )
    }

    /// Pixel corners of the data extent, top-left then bottom-right.
    pub fn extent(&self) -> ((f64, f64), (f64, f64)) {
        (
            self.to_pixel(Coord { x: self.min.x, y: self.max.y }),
            self.to_pixel(Coord { x: self.max.x, y: self.min.y }),
        )
    }
}

fn union(a: Option<Rect<f64>>, b: Rect<f64>) -> Rect<f64> {
    match a {
        None => b,
        Some(a) => Rect::new(
            Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
            Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
        ),
    }
}

fn rings(geometry: &MultiPolygon<f64>, viewport: &Viewport) -> Vec<Rings> {
    geometry
        .iter()
        .map(|polygon| {
            std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .map(|ring| ring.coords().map(|c| viewport.to_pixel(*c)).collect())
                .collect()
        })
        .collect()
}

/// Draws one map onto `canvas`. `features` must already be in the map's CRS.
pub fn draw_map(
    canvas: &mut dyn Canvas,
    spec: &MapSpec,
    features: &[StateFeature],
    width: u32,
    height: u32,
    margin: u32,
) {
    let extra_points: Vec<Coord<f64>> = spec.points.iter().map(|[x, y]| Coord { x: *x, y: *y }).collect();

    let mut bounds = None;
    if spec.states {
        for feature in features {
            if let Some(rect) = feature.geometry.bounding_rect() {
                bounds = Some(union(bounds, rect));
            }
        }
    }
    for point in &extra_points {
        bounds = Some(union(bounds, Rect::new(*point, *point)));
    }
    let bounds = bounds.unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }));
    let viewport = Viewport::fit(bounds, width, height, margin);

    if spec.axes {
        let (min, max) = viewport.extent();
        canvas.frame(min, max);
    }

    if spec.states {
        let fill = hex_to_rgba(&spec.fill);
        let edge = hex_to_rgba(&spec.edge);
        for feature in features {
            for polygon in rings(&feature.geometry, &viewport) {
                canvas.polygon(&polygon, fill, edge);
            }
        }

        for feature in features {
            let Some(center) = centroid(&feature.geometry) else {
                continue;
            };
            let at = viewport.to_pixel(center.0);
            if spec.centroids {
                canvas.marker(at, MARKER_RADIUS, CENTROID_COLOR);
            }
            if let Some(column) = &spec.label {
                match feature.field(column) {
                    Some(text) => canvas.label(at, text),
                    None => warn!("'{}' has no '{}' to label with", feature.key, column),
                }
            }
        }
    }

    for point in extra_points {
        canvas.marker(viewport.to_pixel(point), MARKER_RADIUS, POINT_COLOR);
    }

    if let Some(title) = &spec.title {
        canvas.title(title);
    }
}

/// Renders every configured map into the output directory and returns the written paths.
pub fn render_maps(config: &AppConfig, features: &[StateFeature]) -> Result<Vec<PathBuf>> {
    let (source, target) = config.projections()?;

    let maps = config.maps();
    let projected = if maps.iter().any(|m| m.crs == MapCrs::Projected) {
        info!("Reprojecting {} states", features.len());
        reproject(features, &source, &target)?
    } else {
        Vec::new()
    };

    let out_dir = &config.output.dir;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", out_dir))?;

    let output = &config.output;
    maps.par_iter()
        .map(|spec| -> Result<PathBuf> {
            let path = out_dir.join(&spec.file);
            let layer = match spec.crs {
                MapCrs::Geographic => features,
                MapCrs::Projected => projected.as_slice(),
            };

            let mut canvas = canvas_for(&path, output.width, output.height)?;
            draw_map(canvas.as_mut(), spec, layer, output.width, output.height, output.margin);
            canvas.save(&path)?;

            info!("Wrote {:?}", path);
            Ok(path)
        })
        .collect()
}
