use serde::{Deserialize, Serialize};

use crate::graph::{KernelSize, LayerGraph, LayerHandle};
use crate::init::KernelInitializer;

/// Parameters of one double convolution block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub filters: usize,
    pub kernel_size: KernelSize,
    pub batch_normalization: bool,
    pub kernel_initializer: KernelInitializer,
}

impl BlockConfig {
    pub fn new(filters: usize) -> Self {
        Self {
            filters,
            kernel_size: KernelSize::square(3),
            batch_normalization: true,
            kernel_initializer: KernelInitializer::default(),
        }
    }

    pub fn with_kernel_size(mut self, kernel_size: impl Into<KernelSize>) -> Self {
        self.kernel_size = kernel_size.into();
        self
    }

    pub fn with_batch_normalization(mut self, batch_normalization: bool) -> Self {
        self.batch_normalization = batch_normalization;
        self
    }

    pub fn with_kernel_initializer(mut self, kernel_initializer: KernelInitializer) -> Self {
        self.kernel_initializer = kernel_initializer;
        self
    }
}

/// Appends two `conv -> [batch norm] -> relu` stages to `graph`.
///
/// Both convolutions use same padding and share `config`. Returns the handle
/// of the second activation.
pub fn build_double_conv(
    graph: &mut LayerGraph,
    input: LayerHandle,
    config: &BlockConfig,
) -> LayerHandle {
    let mut x = input;
    for _ in 0..2 {
        x = graph.conv2d(x, config.filters, config.kernel_size, config.kernel_initializer);
        if config.batch_normalization {
            x = graph.batch_norm(x);
        }
        x = graph.relu(x);
    }
    x
}
