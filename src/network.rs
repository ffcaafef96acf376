use candle_core::{Module, Tensor, D};
use candle_nn::{
    batch_norm, ops, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, ConvTranspose2d,
    ConvTranspose2dConfig, Dropout, Init, VarBuilder,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{FeatureShape, KernelSize, Op};
use crate::unet::Model;

/// Same padding for a stride 1 convolution: `(before, after)` per axis.
fn same_padding(kernel_size: KernelSize) -> [(usize, usize); 2] {
    let split = |k: usize| {
        let total = k.saturating_sub(1);
        (total / 2, total - total / 2)
    };
    [split(kernel_size.height), split(kernel_size.width)]
}

enum Layer {
    Input,
    Conv2d {
        conv: Conv2d,
        padding: [(usize, usize); 2],
    },
    BatchNorm(BatchNorm),
    Relu,
    MaxPool2d,
    Dropout(Dropout),
    ConvTranspose2d(ConvTranspose2d),
    Concat,
    Softmax,
}

struct Node {
    layer: Layer,
    inputs: Vec<usize>,
}

/// A [`Model`] with weights, ready to run.
///
/// Takes channels-last batches `(N, height, width, channels)` and returns
/// per-pixel class probabilities `(N, height, width, num_classes)`.
pub struct Network {
    nodes: Vec<Node>,
    output: usize,
    input_shape: FeatureShape,
    output_shape: FeatureShape,
}

impl Network {
    pub(crate) fn new(model: &Model, vb: VarBuilder) -> Result<Self> {
        let graph = model.graph();
        let mut nodes = Vec::with_capacity(graph.len());
        for (handle, node) in graph.iter() {
            let vb = vb.pp(format!("{}_{}", node.op.kind(), handle.index()));
            let in_channels = || {
                node.inputs
                    .first()
                    .map(|&h| graph.shape(h).channels)
                    .unwrap_or(0)
            };
            let layer = match &node.op {
                Op::Input => Layer::Input,
                Op::Conv2d {
                    filters,
                    kernel_size,
                    initializer,
                } => {
                    let (cin, k) = (in_channels(), kernel_size.area());
                    let ws = vb.get_with_hints(
                        (*filters, cin, kernel_size.height, kernel_size.width),
                        "weight",
                        initializer.init(cin * k, filters * k),
                    )?;
                    let bs = vb.get_with_hints(*filters, "bias", Init::Const(0.))?;
                    Layer::Conv2d {
                        conv: Conv2d::new(ws, Some(bs), Conv2dConfig::default()),
                        padding: same_padding(*kernel_size),
                    }
                }
                Op::BatchNorm => {
                    let cfg = BatchNormConfig {
                        eps: 1e-3,
                        momentum: 0.01,
                        ..Default::default()
                    };
                    Layer::BatchNorm(batch_norm(node.shape.channels, cfg, vb)?)
                }
                Op::Relu => Layer::Relu,
                Op::MaxPool2d => Layer::MaxPool2d,
                Op::Dropout { rate } => Layer::Dropout(Dropout::new(*rate as f32)),
                Op::ConvTranspose2d {
                    filters,
                    initializer,
                } => {
                    let cin = in_channels();
                    let ws = vb.get_with_hints(
                        (cin, *filters, 2, 2),
                        "weight",
                        initializer.init(cin * 4, filters * 4),
                    )?;
                    let bs = vb.get_with_hints(*filters, "bias", Init::Const(0.))?;
                    let cfg = ConvTranspose2dConfig {
                        stride: 2,
                        ..Default::default()
                    };
                    Layer::ConvTranspose2d(ConvTranspose2d::new(ws, Some(bs), cfg))
                }
                Op::Concat => Layer::Concat,
                Op::Softmax => Layer::Softmax,
            };
            nodes.push(Node {
                layer,
                inputs: node.inputs.iter().map(|h| h.index()).collect(),
            });
        }
        debug!(layers = nodes.len(), "initialized network weights");
        Ok(Self {
            nodes,
            output: model.output().index(),
            input_shape: model.input_shape(),
            output_shape: model.output_shape(),
        })
    }

    pub fn input_shape(&self) -> FeatureShape {
        self.input_shape
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.output_shape
    }

    /// Runs the network on `xs`. `train` enables dropout and makes batch
    /// normalization use (and update) batch statistics.
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (h, w, c) = self.input_shape.dims();
        let dims = xs.dims();
        if dims.len() != 4 || dims[1..] != [h, w, c] {
            return Err(Error::InputShape {
                expected: self.input_shape,
                actual: dims.to_vec(),
            });
        }
        // candle's convolutions are channels-first.
        let xs = xs.permute((0, 3, 1, 2))?.contiguous()?;

        let mut outputs: Vec<Tensor> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let arg = |i: usize| &outputs[node.inputs[i]];
            let out = match &node.layer {
                Layer::Input => xs.clone(),
                Layer::Conv2d { conv, padding } => {
                    let [(top, bottom), (left, right)] = *padding;
                    let mut x = arg(0).clone();
                    if top + bottom > 0 {
                        x = x.pad_with_zeros(2, top, bottom)?;
                    }
                    if left + right > 0 {
                        x = x.pad_with_zeros(3, left, right)?;
                    }
                    conv.forward(&x)?
                }
                Layer::BatchNorm(bn) => arg(0).apply_t(bn, train)?,
                Layer::Relu => arg(0).relu()?,
                Layer::MaxPool2d => arg(0).max_pool2d(2)?,
                Layer::Dropout(dropout) => dropout.forward(arg(0), train)?,
                Layer::ConvTranspose2d(conv) => conv.forward(arg(0))?,
                Layer::Concat => Tensor::cat(&[arg(0), arg(1)], 1)?,
                Layer::Softmax => ops::softmax(arg(0), 1)?,
            };
            outputs.push(out);
        }

        Ok(outputs[self.output].permute((0, 2, 3, 1))?.contiguous()?)
    }

    /// Most likely class per pixel, `(N, height, width)` of `u32`.
    pub fn predict(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.forward(xs, false)?.argmax(D::Minus1)?)
    }
}
