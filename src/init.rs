use candle_nn::Init;
use serde::{Deserialize, Serialize};

/// Named initialization schemes for convolution kernels.
///
/// Fans are computed from the kernel shape: `fan_in = in_channels * kh * kw`
/// and `fan_out = out_channels * kh * kw`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelInitializer {
    #[default]
    HeNormal,
    HeUniform,
    GlorotNormal,
    GlorotUniform,
    LecunNormal,
    Zeros,
}

impl KernelInitializer {
    pub fn init(self, fan_in: usize, fan_out: usize) -> Init {
        let fan_in = fan_in.max(1) as f64;
        let fan_out = fan_out.max(1) as f64;
        match self {
            Self::HeNormal => Init::Randn {
                mean: 0.,
                stdev: (2. / fan_in).sqrt(),
            },
            Self::HeUniform => {
                let limit = (6. / fan_in).sqrt();
                Init::Uniform {
                    lo: -limit,
                    up: limit,
                }
            }
            Self::GlorotNormal => Init::Randn {
                mean: 0.,
                stdev: (2. / (fan_in + fan_out)).sqrt(),
            },
            Self::GlorotUniform => {
                let limit = (6. / (fan_in + fan_out)).sqrt();
                Init::Uniform {
                    lo: -limit,
                    up: limit,
                }
            }
            Self::LecunNormal => Init::Randn {
                mean: 0.,
                stdev: (1. / fan_in).sqrt(),
            },
            Self::Zeros => Init::Const(0.),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HeNormal => "he_normal",
            Self::HeUniform => "he_uniform",
            Self::GlorotNormal => "glorot_normal",
            Self::GlorotUniform => "glorot_uniform",
            Self::LecunNormal => "lecun_normal",
            Self::Zeros => "zeros",
        }
    }
}

impl std::fmt::Display for KernelInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for KernelInitializer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "he_normal" => Ok(Self::HeNormal),
            "he_uniform" => Ok(Self::HeUniform),
            "glorot_normal" => Ok(Self::GlorotNormal),
            "glorot_uniform" => Ok(Self::GlorotUniform),
            "lecun_normal" => Ok(Self::LecunNormal),
            "zeros" => Ok(Self::Zeros),
            other => Err(format!("unknown kernel initializer `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn he_normal_scales_with_fan_in() {
        match KernelInitializer::HeNormal.init(8, 16) {
            Init::Randn { mean, stdev } => {
                assert_eq!(mean, 0.);
                assert!((stdev - 0.5).abs() < 1e-12);
            }
            other => panic!("unexpected init {other:?}"),
        }
    }

    #[test]
    fn glorot_uniform_is_symmetric() {
        match KernelInitializer::GlorotUniform.init(3, 3) {
            Init::Uniform { lo, up } => {
                assert_eq!(lo, -up);
                assert!((up - 1.).abs() < 1e-12);
            }
            other => panic!("unexpected init {other:?}"),
        }
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for init in [
            KernelInitializer::HeNormal,
            KernelInitializer::HeUniform,
            KernelInitializer::GlorotNormal,
            KernelInitializer::GlorotUniform,
            KernelInitializer::LecunNormal,
            KernelInitializer::Zeros,
        ] {
            assert_eq!(init.name().parse::<KernelInitializer>(), Ok(init));
        }
        assert!("orthogonal".parse::<KernelInitializer>().is_err());
    }
}
