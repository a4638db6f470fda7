//! Coordinate reference systems and reprojection.
//!
//! Only what the state maps need: geographic lon/lat (EPSG:4326) and the
//! ellipsoidal equidistant conic, configured from a PROJ-style string such as
//! `+proj=eqdc +lat_0=40 +lon_0=-96 +lat_1=20 +lat_2=60 +datum=NAD83 +units=m`.

use crate::error::ProjectionError;
use crate::types::StateFeature;
use geo::{Centroid, Coord, MapCoords, MultiPolygon, Point};
use rayon::prelude::*;
use std::f64::consts::PI;

const EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub a: f64,
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const GRS80: Ellipsoid = Ellipsoid { a: 6_378_137.0, inv_f: 298.257_222_101 };
    pub const WGS84: Ellipsoid = Ellipsoid { a: 6_378_137.0, inv_f: 298.257_223_563 };

    fn from_name(name: &str) -> Result<Self, ProjectionError> {
        match name.to_ascii_uppercase().as_str() {
            "GRS80" | "NAD83" => Ok(Ellipsoid::GRS80),
            "WGS84" => Ok(Ellipsoid::WGS84),
            _ => Err(ProjectionError::UnsupportedEllipsoid(name.to_string())),
        }
    }

    /// First eccentricity squared.
    pub fn es(&self) -> f64 {
        let f = 1.0 / self.inv_f;
        2.0 * f - f * f
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicParams {
    pub lat_0: f64,
    pub lon_0: f64,
    pub lat_1: f64,
    pub lat_2: f64,
    pub x_0: f64,
    pub y_0: f64,
}

/// Ellipsoidal equidistant conic. Angles are stored in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquidistantConic {
    params: ConicParams,
    a: f64,
    es: f64,
    lon_0: f64,
    n: f64,
    g: f64,
    rho_0: f64,
}

impl EquidistantConic {
    pub fn new(params: ConicParams, ellipsoid: Ellipsoid) -> Result<Self, ProjectionError> {
        let phi_0 = params.lat_0.to_radians();
        let phi_1 = params.lat_1.to_radians();
        let phi_2 = params.lat_2.to_radians();
        if (phi_1 + phi_2).abs() < EPSILON {
            return Err(ProjectionError::DegenerateCone);
        }

        let a = ellipsoid.a;
        let es = ellipsoid.es();
        let m_1 = parallel_radius(phi_1, es);
        let big_m_1 = meridian_distance(phi_1, a, es);

        let n = if (phi_1 - phi_2).abs() < EPSILON {
            phi_1.sin()
        } else {
            let m_2 = parallel_radius(phi_2, es);
            let big_m_2 = meridian_distance(phi_2, a, es);
            a * (m_1 - m_2) / (big_m_2 - big_m_1)
        };
        let g = m_1 / n + big_m_1 / a;
        let rho_0 = a * g - meridian_distance(phi_0, a, es);

        Ok(EquidistantConic {
            params,
            a,
            es,
            lon_0: params.lon_0.to_radians(),
            n,
            g,
            rho_0,
        })
    }

    #[cfg(test)]
    pub fn params(&self) -> ConicParams {
        self.params
    }

    /// Projects geographic degrees to metres.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let rho = self.a * self.g - meridian_distance(phi, self.a, self.es);
        let theta = self.n * wrap_pi(lon.to_radians() - self.lon_0);
        let x = rho * theta.sin() + self.params.x_0;
        let y = self.rho_0 - rho * theta.cos() + self.params.y_0;
        (x, y)
    }
}

/// `m = cos φ / sqrt(1 - e² sin² φ)`
fn parallel_radius(phi: f64, es: f64) -> f64 {
    let sin = phi.sin();
    phi.cos() / (1.0 - es * sin * sin).sqrt()
}

/// Distance along the meridian from the equator, series through e⁶.
fn meridian_distance(phi: f64, a: f64, es: f64) -> f64 {
    let e4 = es * es;
    let e6 = e4 * es;
    a * ((1.0 - es / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * es / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

fn wrap_pi(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    // keep +180 as +180 rather than folding it onto -180
    if wrapped == -PI && angle > 0.0 { PI } else { wrapped }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crs {
    Geographic,
    EquidistantConic(EquidistantConic),
}

impl Crs {
    pub fn parse(definition: &str) -> Result<Self, ProjectionError> {
        let definition = definition.trim();
        if definition.starts_with('+') {
            return parse_proj(definition);
        }
        match definition.to_ascii_uppercase().as_str() {
            "EPSG:4326" | "WGS84" | "CRS84" => Ok(Crs::Geographic),
            _ => Err(ProjectionError::UnsupportedCrs(definition.to_string())),
        }
    }

    /// Transforms a single coordinate from `self` into `to`.
    pub fn transform(&self, to: &Crs, coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        match (self, to) {
            (from, to) if from == to => Ok(coord),
            (Crs::Geographic, Crs::EquidistantConic(conic)) => {
                let (x, y) = conic.forward(coord.x, coord.y);
                Ok(Coord { x, y })
            }
            _ => Err(ProjectionError::InverseNotSupported),
        }
    }
}

fn parse_proj(definition: &str) -> Result<Crs, ProjectionError> {
    let mut proj = None;
    let mut ellipsoid = Ellipsoid::GRS80;
    let mut values: Vec<(&str, &str)> = Vec::new();

    for token in definition.split_whitespace() {
        let token = token.trim_start_matches('+');
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key, value),
            None => (token, ""),
        };
        match key {
            "proj" => proj = Some(value),
            "datum" | "ellps" => ellipsoid = Ellipsoid::from_name(value)?,
            "units" if value != "m" => {
                return Err(ProjectionError::UnsupportedUnits(value.to_string()))
            }
            "units" | "no_defs" => {}
            "lat_0" | "lon_0" | "lat_1" | "lat_2" | "x_0" | "y_0" => values.push((key, value)),
            _ => return Err(ProjectionError::UnsupportedParameter(key.to_string())),
        }
    }

    match proj {
        Some("longlat") | Some("latlong") | Some("lonlat") | Some("latlon") => match values.first() {
            Some((key, _)) => Err(ProjectionError::UnsupportedParameter(key.to_string())),
            None => Ok(Crs::Geographic),
        },
        Some("eqdc") => {
            let lookup = |name: &'static str, default: Option<f64>| -> Result<f64, ProjectionError> {
                match values.iter().find(|(key, _)| *key == name) {
                    Some((_, value)) => value.parse().map_err(|_| ProjectionError::InvalidParameter {
                        name: name.to_string(),
                        value: value.to_string(),
                    }),
                    None => default.ok_or(ProjectionError::MissingParameter(name)),
                }
            };
            let lat_1 = lookup("lat_1", None)?;
            let params = ConicParams {
                lat_0: lookup("lat_0", Some(0.0))?,
                lon_0: lookup("lon_0", Some(0.0))?,
                lat_1,
                lat_2: lookup("lat_2", Some(lat_1))?,
                x_0: lookup("x_0", Some(0.0))?,
                y_0: lookup("y_0", Some(0.0))?,
            };
            Ok(Crs::EquidistantConic(EquidistantConic::new(params, ellipsoid)?))
        }
        Some(other) => Err(ProjectionError::UnknownProjection(other.to_string())),
        None => Err(ProjectionError::MissingParameter("proj")),
    }
}

pub fn reproject_geometry(
    geometry: &MultiPolygon<f64>,
    from: &Crs,
    to: &Crs,
) -> Result<MultiPolygon<f64>, ProjectionError> {
    geometry.try_map_coords(|coord| from.transform(to, coord))
}

/// Reprojects every feature; attributes are carried over untouched.
pub fn reproject(
    features: &[StateFeature],
    from: &Crs,
    to: &Crs,
) -> Result<Vec<StateFeature>, ProjectionError> {
    features
        .par_iter()
        .map(|feature| {
            Ok(StateFeature {
                geometry: reproject_geometry(&feature.geometry, from, to)?,
                ..feature.clone()
            })
        })
        .collect()
}

pub fn centroid(geometry: &MultiPolygon<f64>) -> Option<Point<f64>> {
    geometry.centroid()
}
