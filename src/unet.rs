use std::fmt;

use candle_nn::VarBuilder;
use tracing::{debug, info};

use crate::block::{build_double_conv, BlockConfig};
use crate::config::UNetConfig;
use crate::error::Result;
use crate::graph::{FeatureShape, KernelSize, LayerGraph, LayerHandle, Op};
use crate::network::Network;

/// A layer graph together with its entry and exit nodes.
#[derive(Debug, Clone)]
pub struct Model {
    graph: LayerGraph,
    input: LayerHandle,
    output: LayerHandle,
}

impl Model {
    pub fn graph(&self) -> &LayerGraph {
        &self.graph
    }

    pub fn input(&self) -> LayerHandle {
        self.input
    }

    pub fn output(&self) -> LayerHandle {
        self.output
    }

    pub fn input_shape(&self) -> FeatureShape {
        self.graph.shape(self.input)
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.graph.shape(self.output)
    }

    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.graph.total_parameters()
    }

    /// Creates the weights of every layer under `vb` and returns a runnable
    /// network.
    pub fn init(&self, vb: VarBuilder) -> Result<Network> {
        Network::new(self, vb)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.graph)
    }

    /// One line per layer: index, kind, inputs, output shape and weights.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<5} {:<18} {:<12} {:<16} {:>10}",
            "#", "layer", "inputs", "output", "params"
        )?;
        for (handle, node) in self.graph.iter() {
            let inputs = node
                .inputs
                .iter()
                .map(|h| h.index().to_string())
                .collect::<Vec<_>>()
                .join(",");
            let kind = match &node.op {
                Op::Conv2d { kernel_size, .. } => {
                    format!("conv2d {}x{}", kernel_size.height, kernel_size.width)
                }
                Op::Dropout { rate } => format!("dropout {rate}"),
                op => op.kind().to_string(),
            };
            writeln!(
                f,
                "{:<5} {:<18} {:<12} {:<16} {:>10}",
                handle.index(),
                kind,
                inputs,
                node.shape.to_string(),
                self.graph.parameter_count(handle)
            )?;
        }
        writeln!(f, "total parameters: {}", self.parameter_count())
    }
}

/// Assembles a U-Net graph for `config`.
///
/// The configuration is validated before any node is created, so an error
/// never leaves a partial graph behind.
///
/// Layout, with `conv[b]` the double convolution at depth `b` (1-based):
/// * encoder: `conv[b]` then 2x2 max pooling and dropout, `b = 1..=blocks`,
/// * bottleneck: `conv[blocks + 1]`,
/// * decoder: 2x2 transpose convolution of the previous stage, concatenated
/// with `conv[blocks - b + 1]`, dropout, then `conv[blocks + b + 1]`,
/// * head: 1x1 convolution to `num_classes` channels and softmax.
pub fn build_u_net(config: &UNetConfig) -> Result<Model> {
    config.validate()?;

    let blocks = config.blocks;
    let block_cfg = |filters| BlockConfig {
        filters,
        kernel_size: KernelSize::square(3),
        batch_normalization: config.batch_normalization,
        kernel_initializer: config.kernel_initializer,
    };

    let mut graph = LayerGraph::new();
    let input = graph.input(FeatureShape::new(
        config.height,
        config.width,
        config.channels(),
    ));

    // conv[0] is unused so that indices match block numbers.
    let mut conv: Vec<LayerHandle> = Vec::with_capacity(2 * blocks + 2);
    conv.push(input);

    let mut feed = input;
    for b in 1..=blocks {
        let filters = config.filters_at(b - 1);
        let out = build_double_conv(&mut graph, feed, &block_cfg(filters));
        conv.push(out);
        let pooled = graph.max_pool2d(out);
        feed = graph.dropout(pooled, config.dropout_rate);
        debug!(block = b, filters, shape = %graph.shape(feed), "encoder block");
    }

    let bottleneck = build_double_conv(&mut graph, feed, &block_cfg(config.filters_at(blocks)));
    conv.push(bottleneck);
    debug!(shape = %graph.shape(bottleneck), "bottleneck");

    for b in 1..=blocks {
        let filters = config.filters_at(blocks - b);
        let up = graph.conv_transpose2d(conv[blocks + b], filters, config.kernel_initializer);
        let merged = graph.concatenate(up, conv[blocks - b + 1])?;
        let merged = graph.dropout(merged, config.dropout_rate);
        let out = build_double_conv(&mut graph, merged, &block_cfg(filters));
        conv.push(out);
        debug!(block = b, filters, skip = blocks - b + 1, shape = %graph.shape(out), "decoder block");
    }

    let logits = graph.conv2d(
        conv[2 * blocks + 1],
        config.num_classes,
        KernelSize::square(1),
        config.kernel_initializer,
    );
    let output = graph.softmax(logits);

    let model = Model {
        graph,
        input,
        output,
    };
    info!(
        nodes = model.node_count(),
        parameters = model.parameter_count(),
        input = %model.input_shape(),
        output = %model.output_shape(),
        "assembled u-net"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_block_layout() {
        let cfg = UNetConfig::new(4, 4)
            .grayscale()
            .with_blocks(1)
            .with_base_filters(2)
            .with_batch_normalization(false);
        let model = build_u_net(&cfg).unwrap();
        let kinds: Vec<_> = model.graph().nodes().iter().map(|n| n.op.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "input",
                // encoder
                "conv2d",
                "relu",
                "conv2d",
                "relu",
                "max_pool2d",
                "dropout",
                // bottleneck
                "conv2d",
                "relu",
                "conv2d",
                "relu",
                // decoder
                "conv_transpose2d",
                "concat",
                "dropout",
                "conv2d",
                "relu",
                "conv2d",
                "relu",
                // head
                "conv2d",
                "softmax",
            ]
        );
        // The skip connection joins the upsampled bottleneck with conv[1].
        let concat = &model.graph().nodes()[12];
        assert_eq!(concat.inputs.iter().map(|h| h.index()).collect::<Vec<_>>(), vec![11, 4]);
        assert_eq!(concat.shape, FeatureShape::new(4, 4, 4));
    }

    #[test]
    fn skip_connections_mirror_encoder() {
        let cfg = UNetConfig::new(64, 32).with_blocks(3);
        let model = build_u_net(&cfg).unwrap();
        let g = model.graph();
        let concats: Vec<_> = g
            .nodes()
            .iter()
            .filter(|n| n.op == Op::Concat)
            .map(|n| (g.shape(n.inputs[0]), g.shape(n.inputs[1])))
            .collect();
        assert_eq!(
            concats,
            vec![
                (FeatureShape::new(16, 8, 64), FeatureShape::new(16, 8, 64)),
                (FeatureShape::new(32, 16, 32), FeatureShape::new(32, 16, 32)),
                (FeatureShape::new(64, 32, 16), FeatureShape::new(64, 32, 16)),
            ]
        );
    }

    #[test]
    fn invalid_config_fails_fast() {
        let err = build_u_net(&UNetConfig::new(100, 128)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn summary_lists_every_layer() {
        let model = build_u_net(&UNetConfig::new(8, 8).with_blocks(2)).unwrap();
        let summary = model.summary();
        // header + layers + total
        assert_eq!(summary.lines().count(), model.node_count() + 2);
        assert!(summary.contains("conv2d 3x3"));
        assert_eq!(summary, format!("{model}"));
        assert!(summary
            .lines()
            .last()
            .unwrap()
            .ends_with(&model.parameter_count().to_string()));
    }

    #[test]
    fn json_graph_round_trips() {
        let model = build_u_net(&UNetConfig::new(8, 8).with_blocks(1)).unwrap();
        let json = model.to_json().unwrap();
        let graph: LayerGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(&graph, model.graph());
    }
}
