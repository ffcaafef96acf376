use std::path::PathBuf;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use unet_builder::{build_u_net, ChannelMode, KernelInitializer, LabelSet, UNetConfig};

#[derive(Parser)]
#[command(name = "unet-builder")]
#[command(about = "Build and inspect U-Net segmentation models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the layer table of a model.
    Summary {
        #[command(flatten)]
        model: ModelArgs,

        /// Print the layer graph as JSON instead.
        #[arg(long)]
        json: bool,
    },
    /// Run a forward pass with random weights on random input.
    Forward {
        #[command(flatten)]
        model: ModelArgs,

        #[arg(long, default_value_t = 1)]
        batch: usize,

        /// Stay on the CPU even if CUDA is available.
        #[arg(long)]
        cpu: bool,
    },
    /// Print a label scheme with its colours.
    Labels {
        #[arg(long, default_value = "voc")]
        scheme: String,
    },
}

/// Model hyperparameters; flags override values from `--config`.
#[derive(Args)]
struct ModelArgs {
    /// JSON file with a U-Net configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    height: Option<usize>,

    #[arg(long)]
    width: Option<usize>,

    #[arg(long)]
    grayscale: bool,

    #[arg(long)]
    blocks: Option<usize>,

    #[arg(long)]
    classes: Option<usize>,

    #[arg(long)]
    filters: Option<usize>,

    #[arg(long)]
    dropout: Option<f64>,

    #[arg(long)]
    no_batch_norm: bool,

    #[arg(long)]
    initializer: Option<KernelInitializer>,
}

impl ModelArgs {
    fn resolve(&self) -> anyhow::Result<UNetConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => UNetConfig::default(),
        };
        if let Some(height) = self.height {
            cfg.height = height;
        }
        if let Some(width) = self.width {
            cfg.width = width;
        }
        if self.grayscale {
            cfg.channel_mode = ChannelMode::Grayscale;
        }
        if let Some(blocks) = self.blocks {
            cfg.blocks = blocks;
        }
        if let Some(classes) = self.classes {
            cfg.num_classes = classes;
        }
        if let Some(filters) = self.filters {
            cfg.base_filters = filters;
        }
        if let Some(dropout) = self.dropout {
            cfg.dropout_rate = dropout;
        }
        if self.no_batch_norm {
            cfg.batch_normalization = false;
        }
        if let Some(initializer) = self.initializer {
            cfg.kernel_initializer = initializer;
        }
        Ok(cfg)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Summary { model, json } => {
            let unet = build_u_net(&model.resolve()?)?;
            if json {
                println!("{}", unet.to_json()?);
            } else {
                print!("{}", unet.summary());
            }
        }
        Commands::Forward { model, batch, cpu } => {
            let cfg = model.resolve()?;
            let unet = build_u_net(&cfg)?;
            let dev = if cpu {
                Device::Cpu
            } else {
                Device::cuda_if_available(0)?
            };
            let vm = VarMap::new();
            let vb = VarBuilder::from_varmap(&vm, DType::F32, &dev);
            let net = unet.init(vb.pp("unet"))?;
            let xs = Tensor::randn(0f32, 1f32, (batch, cfg.height, cfg.width, cfg.channels()), &dev)?;
            let out = net.forward(&xs, false)?;
            println!("input shape: {:?}", xs.dims());
            println!("output shape: {:?}", out.dims());
            if let Some(labels) = LabelSet::for_classes(cfg.num_classes) {
                let classes = net.predict(&xs)?;
                let mask = labels.colorize(&classes)?;
                println!("{} mask shape: {:?}", labels.name, mask.dims());
            }
        }
        Commands::Labels { scheme } => {
            let labels = LabelSet::by_name(&scheme)
                .with_context(|| format!("unknown label scheme `{scheme}`"))?;
            for (i, (label, [r, g, b])) in labels.labels.iter().zip(labels.colormap).enumerate() {
                println!("{i:>3} {label:<12} ({r}, {g}, {b})");
            }
        }
    }

    Ok(())
}
