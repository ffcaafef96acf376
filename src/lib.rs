//! U-Net segmentation models on top of candle.
//!
//! [`build_u_net`] turns a [`UNetConfig`] into a [`Model`], a layer graph
//! with shape information. [`Model::init`] creates the weights and yields a
//! [`Network`] that runs forward passes. The [`labels`] module holds the
//! class names and colours used to paint predicted masks.

pub mod block;
pub mod config;
pub mod error;
pub mod graph;
pub mod init;
pub mod labels;
pub mod network;
pub mod unet;

pub use block::{build_double_conv, BlockConfig};
pub use config::{ChannelMode, UNetConfig};
pub use error::{ConfigError, Error, Result};
pub use graph::{FeatureShape, KernelSize, LayerGraph, LayerHandle, LayerNode, Op};
pub use init::KernelInitializer;
pub use labels::{LabelSet, BINARY, VOC};
pub use network::Network;
pub use unet::{build_u_net, Model};
