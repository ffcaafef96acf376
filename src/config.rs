use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::init::KernelInitializer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Grayscale,
    #[default]
    Color,
}

impl ChannelMode {
    pub fn channels(self) -> usize {
        match self {
            ChannelMode::Grayscale => 1,
            ChannelMode::Color => 3,
        }
    }
}

/// Hyperparameters of a U-Net.
///
/// Every field except the input resolution has a default, so a JSON config
/// only needs `height` and `width`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UNetConfig {
    pub height: usize,
    pub width: usize,
    #[serde(default)]
    pub channel_mode: ChannelMode,
    #[serde(default = "default_blocks")]
    pub blocks: usize,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_base_filters")]
    pub base_filters: usize,
    #[serde(default = "default_dropout_rate")]
    pub dropout_rate: f64,
    #[serde(default = "default_batch_normalization")]
    pub batch_normalization: bool,
    #[serde(default)]
    pub kernel_initializer: KernelInitializer,
}

fn default_blocks() -> usize {
    4
}

fn default_num_classes() -> usize {
    2
}

fn default_base_filters() -> usize {
    16
}

fn default_dropout_rate() -> f64 {
    0.1
}

fn default_batch_normalization() -> bool {
    true
}

impl UNetConfig {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            channel_mode: ChannelMode::default(),
            blocks: default_blocks(),
            num_classes: default_num_classes(),
            base_filters: default_base_filters(),
            dropout_rate: default_dropout_rate(),
            batch_normalization: default_batch_normalization(),
            kernel_initializer: KernelInitializer::default(),
        }
    }

    pub fn with_channel_mode(mut self, channel_mode: ChannelMode) -> Self {
        self.channel_mode = channel_mode;
        self
    }

    pub fn grayscale(self) -> Self {
        self.with_channel_mode(ChannelMode::Grayscale)
    }

    pub fn with_blocks(mut self, blocks: usize) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_base_filters(mut self, base_filters: usize) -> Self {
        self.base_filters = base_filters;
        self
    }

    pub fn with_dropout_rate(mut self, dropout_rate: f64) -> Self {
        self.dropout_rate = dropout_rate;
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

    pub fn channels(&self) -> usize {
        self.channel_mode.channels()
    }

    /// Filters of the double convolution at encoder depth `depth` (0-based),
    /// the bottleneck being depth `blocks`.
    pub fn filters_at(&self, depth: usize) -> usize {
        self.base_filters << depth
    }

    /// Checks every constraint needed for the encoder and decoder to line up.
    ///
    /// Each side must be `2^k` with `k >= blocks`, so pooling never drops a
    /// row or column and the bottleneck is at least 1x1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (dim, value) in [("height", self.height), ("width", self.width)] {
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { dim, value });
            }
        }
        if self.blocks < 1 {
            return Err(ConfigError::NoBlocks);
        }
        let side = self.height.min(self.width);
        let depth = side.trailing_zeros() as usize;
        if self.blocks > depth {
            return Err(ConfigError::TooManyBlocks {
                blocks: self.blocks,
                side,
                needed: u32::try_from(self.blocks)
                    .ok()
                    .and_then(|b| 1usize.checked_shl(b))
                    .unwrap_or(usize::MAX),
            });
        }
        if self.num_classes < 2 {
            return Err(ConfigError::TooFewClasses(self.num_classes));
        }
        if self.base_filters < 1 {
            return Err(ConfigError::NoFilters);
        }
        if (self.base_filters.leading_zeros() as usize) < self.blocks {
            return Err(ConfigError::FilterOverflow {
                base_filters: self.base_filters,
                blocks: self.blocks,
            });
        }
        // Every layer has at most `widest` inputs and outputs, a 3x3 kernel
        // and a bias; there are fewer than 16 * blocks + 10 layers.
        let widest = self.filters_at(self.blocks);
        let bound = widest
            .checked_mul(widest)
            .and_then(|w| w.checked_mul(10))
            .and_then(|w| w.checked_mul(self.blocks.checked_mul(16)?.checked_add(10)?));
        if bound.is_none() {
            return Err(ConfigError::ParameterOverflow { widest });
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(ConfigError::DropoutRate(self.dropout_rate));
        }
        Ok(())
    }
}

impl Default for UNetConfig {
    fn default() -> Self {
        Self::new(256, 256)
    }
}
