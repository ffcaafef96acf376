//! Layer graph: a flat arena of layer descriptions with shape inference.
//!
//! Nodes are only ever appended and each node refers to earlier handles, so
//! insertion order is a valid topological order. Nothing in here touches
//! tensors; [`Model::init`](crate::Model::init) turns a graph into candle
//! layers.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::init::KernelInitializer;

/// Index of a node inside the [`LayerGraph`] that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerHandle(usize);

impl LayerHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Per-sample output shape of a node, channels last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl FeatureShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }
}

impl std::fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Convolution window, `height x width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSize {
    pub height: usize,
    pub width: usize,
}

impl KernelSize {
    pub fn square(size: usize) -> Self {
        Self {
            height: size,
            width: size,
        }
    }

    pub fn area(&self) -> usize {
        self.height * self.width
    }
}

impl From<usize> for KernelSize {
    fn from(size: usize) -> Self {
        Self::square(size)
    }
}

impl From<(usize, usize)> for KernelSize {
    fn from((height, width): (usize, usize)) -> Self {
        Self { height, width }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Input,
    /// Stride 1, same padding.
    Conv2d {
        filters: usize,
        kernel_size: KernelSize,
        initializer: KernelInitializer,
    },
    BatchNorm,
    Relu,
    /// 2x2 window, stride 2.
    MaxPool2d,
    Dropout {
        rate: f64,
    },
    /// 2x2 window, stride 2.
    ConvTranspose2d {
        filters: usize,
        initializer: KernelInitializer,
    },
    /// Channel-wise, in input order.
    Concat,
    /// Over the channel axis.
    Softmax,
}

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Input => "input",
            Op::Conv2d { .. } => "conv2d",
            Op::BatchNorm => "batch_norm",
            Op::Relu => "relu",
            Op::MaxPool2d => "max_pool2d",
            Op::Dropout { .. } => "dropout",
            Op::ConvTranspose2d { .. } => "conv_transpose2d",
            Op::Concat => "concat",
            Op::Softmax => "softmax",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNode {
    #[serde(flatten)]
    pub op: Op,
    pub inputs: Vec<LayerHandle>,
    pub shape: FeatureShape,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerGraph {
    nodes: Vec<LayerNode>,
}

impl LayerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[LayerNode] {
        &self.nodes
    }

    pub fn node(&self, handle: LayerHandle) -> &LayerNode {
        &self.nodes[handle.0]
    }

    pub fn shape(&self, handle: LayerHandle) -> FeatureShape {
        self.node(handle).shape
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayerHandle, &LayerNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (LayerHandle(i), node))
    }

    fn push(&mut self, op: Op, inputs: Vec<LayerHandle>, shape: FeatureShape) -> LayerHandle {
        let handle = LayerHandle(self.nodes.len());
        trace!(node = handle.0, op = op.kind(), %shape, "add layer");
        self.nodes.push(LayerNode { op, inputs, shape });
        handle
    }

    pub fn input(&mut self, shape: FeatureShape) -> LayerHandle {
        self.push(Op::Input, Vec::new(), shape)
    }

    pub fn conv2d(
        &mut self,
        x: LayerHandle,
        filters: usize,
        kernel_size: KernelSize,
        initializer: KernelInitializer,
    ) -> LayerHandle {
        let FeatureShape { height, width, .. } = self.shape(x);
        self.push(
            Op::Conv2d {
                filters,
                kernel_size,
                initializer,
            },
            vec![x],
            FeatureShape::new(height, width, filters),
        )
    }

    pub fn batch_norm(&mut self, x: LayerHandle) -> LayerHandle {
        let shape = self.shape(x);
        self.push(Op::BatchNorm, vec![x], shape)
    }

    pub fn relu(&mut self, x: LayerHandle) -> LayerHandle {
        let shape = self.shape(x);
        self.push(Op::Relu, vec![x], shape)
    }

    /// Odd sides are floored, as the pooling kernel does.
    pub fn max_pool2d(&mut self, x: LayerHandle) -> LayerHandle {
        let FeatureShape {
            height,
            width,
            channels,
        } = self.shape(x);
        self.push(
            Op::MaxPool2d,
            vec![x],
            FeatureShape::new(height / 2, width / 2, channels),
        )
    }

    pub fn dropout(&mut self, x: LayerHandle, rate: f64) -> LayerHandle {
        let shape = self.shape(x);
        self.push(Op::Dropout { rate }, vec![x], shape)
    }

    pub fn conv_transpose2d(
        &mut self,
        x: LayerHandle,
        filters: usize,
        initializer: KernelInitializer,
    ) -> LayerHandle {
        let FeatureShape { height, width, .. } = self.shape(x);
        self.push(
            Op::ConvTranspose2d {
                filters,
                initializer,
            },
            vec![x],
            FeatureShape::new(height * 2, width * 2, filters),
        )
    }

    pub fn concatenate(&mut self, left: LayerHandle, right: LayerHandle) -> Result<LayerHandle> {
        let l = self.shape(left);
        let r = self.shape(right);
        if (l.height, l.width) != (r.height, r.width) {
            return Err(Error::ShapeMismatch { left: l, right: r });
        }
        Ok(self.push(
            Op::Concat,
            vec![left, right],
            FeatureShape::new(l.height, l.width, l.channels + r.channels),
        ))
    }

    pub fn softmax(&mut self, x: LayerHandle) -> LayerHandle {
        let shape = self.shape(x);
        self.push(Op::Softmax, vec![x], shape)
    }

    /// Number of weights (trainable and running statistics) held by `handle`.
    ///
    /// Saturates at `usize::MAX` for layers too wide to address.
    pub fn parameter_count(&self, handle: LayerHandle) -> usize {
        let node = self.node(handle);
        let in_channels = || {
            node.inputs
                .first()
                .map(|&h| self.shape(h).channels)
                .unwrap_or(0)
        };
        match &node.op {
            Op::Conv2d {
                filters,
                kernel_size,
                ..
            } => kernel_size
                .area()
                .saturating_mul(in_channels())
                .saturating_mul(*filters)
                .saturating_add(*filters),
            Op::ConvTranspose2d { filters, .. } => 4usize
                .saturating_mul(in_channels())
                .saturating_mul(*filters)
                .saturating_add(*filters),
            // gamma, beta, running mean, running variance
            Op::BatchNorm => node.shape.channels.saturating_mul(4),
            _ => 0,
        }
    }

    pub fn total_parameters(&self) -> usize {
        self.iter()
            .map(|(h, _)| self.parameter_count(h))
            .fold(0usize, usize::saturating_add)
    }
}
