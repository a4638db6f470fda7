use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("unknown projection '{0}'")]
    UnknownProjection(String),

    #[error("missing projection parameter +{0}")]
    MissingParameter(&'static str),

    #[error("unsupported projection parameter +{0}")]
    UnsupportedParameter(String),

    #[error("invalid value '{value}' for projection parameter +{name}")]
    InvalidParameter { name: String, value: String },

    #[error("unsupported units '{0}', only metres are supported")]
    UnsupportedUnits(String),

    #[error("unsupported ellipsoid or datum '{0}'")]
    UnsupportedEllipsoid(String),

    #[error("standard parallels are symmetric about the equator")]
    DegenerateCone,

    #[error("cannot transform from a projected coordinate system")]
    InverseNotSupported,
}

#[derive(Debug, Error, PartialEq)]
pub enum JoinError {
    #[error("flower table lists '{0}' more than once")]
    DuplicateKey(String),

    #[error("boundary file contains '{0}' more than once")]
    DuplicateBoundary(String),

    #[error(
        "join is not one-to-one: {} flower rows and {} boundaries unmatched",
        .flowers.len(),
        .boundaries.len()
    )]
    UnmatchedKeys {
        flowers: Vec<String>,
        boundaries: Vec<String>,
    },
}
