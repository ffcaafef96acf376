use thiserror::Error;

use crate::graph::FeatureShape;

/// Reasons a [`UNetConfig`](crate::UNetConfig) is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{dim} must be a positive power of two, got {value}")]
    NotPowerOfTwo { dim: &'static str, value: usize },
    #[error("blocks must be at least 1")]
    NoBlocks,
    #[error("{blocks} blocks need at least {needed} pixels per side, smallest side is {side}")]
    TooManyBlocks {
        blocks: usize,
        side: usize,
        needed: usize,
    },
    #[error("num_classes must be at least 2, got {0}")]
    TooFewClasses(usize),
    #[error("base_filters must be at least 1")]
    NoFilters,
    #[error("base_filters {base_filters} overflows after {blocks} doublings")]
    FilterOverflow { base_filters: usize, blocks: usize },
    #[error("{widest} filters give more weights than fit in memory")]
    ParameterOverflow { widest: usize },
    #[error("dropout_rate must be in [0, 1), got {0}")]
    DropoutRate(f64),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    #[error("cannot concatenate {left} with {right}: spatial dimensions differ")]
    ShapeMismatch {
        left: FeatureShape,
        right: FeatureShape,
    },
    #[error("expected input (N, {expected}), got {actual:?}")]
    InputShape {
        expected: FeatureShape,
        actual: Vec<usize>,
    },
    #[error("class id {class} out of range for {len} labels")]
    UnknownClass { class: u32, len: usize },
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
