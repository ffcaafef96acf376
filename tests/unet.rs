use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use pretty_assertions::assert_eq;
use unet_builder::{
    build_double_conv, build_u_net, BlockConfig, Error, FeatureShape, LayerGraph, Op,
    UNetConfig,
};

fn small_config() -> UNetConfig {
    UNetConfig::new(16, 8)
        .grayscale()
        .with_blocks(2)
        .with_base_filters(4)
        .with_num_classes(3)
}

#[test]
fn reference_scenario_shapes() {
    let cfg = UNetConfig::new(256, 256)
        .grayscale()
        .with_blocks(4)
        .with_num_classes(2)
        .with_base_filters(16)
        .with_dropout_rate(0.1);
    let model = build_u_net(&cfg).unwrap();
    assert_eq!(model.input_shape(), FeatureShape::new(256, 256, 1));
    assert_eq!(model.output_shape(), FeatureShape::new(256, 256, 2));
    assert_eq!(model.graph().node(model.output()).op, Op::Softmax);
}

#[test]
fn every_depth_lines_up() {
    for blocks in 1..=5 {
        let side = 1 << blocks;
        for (h, w) in [(side, side), (side * 2, side), (side, side * 4)] {
            for bn in [true, false] {
                let cfg = UNetConfig::new(h, w)
                    .with_blocks(blocks)
                    .with_num_classes(5)
                    .with_base_filters(2)
                    .with_batch_normalization(bn);
                let model = build_u_net(&cfg)
                    .unwrap_or_else(|e| panic!("blocks={blocks} {h}x{w}: {e}"));
                assert_eq!(model.output_shape(), FeatureShape::new(h, w, 5));
                let concats = model
                    .graph()
                    .nodes()
                    .iter()
                    .filter(|n| n.op == Op::Concat)
                    .count();
                assert_eq!(concats, blocks);
            }
        }
    }
}

#[test]
fn invalid_configs_are_rejected() {
    let cases = [
        UNetConfig::new(100, 128),
        UNetConfig::new(128, 128).with_blocks(0),
        UNetConfig::new(128, 128).with_num_classes(1),
        UNetConfig::new(128, 128).with_dropout_rate(1.0),
        UNetConfig::new(128, 128).with_base_filters(0),
        UNetConfig::new(8, 8).with_blocks(4),
        UNetConfig::new(2, 2).with_blocks(1).with_base_filters(1 << 31),
    ];
    for cfg in cases {
        match build_u_net(&cfg) {
            Err(Error::InvalidConfiguration(_)) => {}
            other => panic!("{cfg:?} gave {other:?}"),
        }
    }
}

#[test]
fn batch_norm_grows_double_conv() {
    let count = |bn: bool| {
        let mut g = LayerGraph::new();
        let x = g.input(FeatureShape::new(32, 32, 3));
        build_double_conv(&mut g, x, &BlockConfig::new(16).with_batch_normalization(bn));
        g.len()
    };
    assert!(count(true) > count(false));
}

#[test]
fn forward_yields_pixel_probabilities() {
    let cfg = small_config();
    let model = build_u_net(&cfg).unwrap();
    let dev = Device::Cpu;
    let vm = VarMap::new();
    let vb = VarBuilder::from_varmap(&vm, DType::F32, &dev);
    let net = model.init(vb.pp("unet")).unwrap();

    let xs = Tensor::randn(0f32, 1f32, (2, 16, 8, 1), &dev).unwrap();
    let probs = net.forward(&xs, false).unwrap();
    assert_eq!(probs.dims(), &[2, 16, 8, 3]);

    let sums = probs.sum(D::Minus1).unwrap().flatten_all().unwrap();
    for s in sums.to_vec1::<f32>().unwrap() {
        assert!((s - 1.).abs() < 1e-4, "probabilities sum to {s}");
    }

    let classes = net.predict(&xs).unwrap();
    assert_eq!(classes.dims(), &[2, 16, 8]);
    assert!(classes.flatten_all().unwrap().to_vec1::<u32>().unwrap().iter().all(|&c| c < 3));
}

#[test]
fn training_forward_runs() {
    let cfg = small_config().with_dropout_rate(0.5);
    let model = build_u_net(&cfg).unwrap();
    let dev = Device::Cpu;
    let vm = VarMap::new();
    let vb = VarBuilder::from_varmap(&vm, DType::F32, &dev);
    let net = model.init(vb).unwrap();
    let xs = Tensor::randn(0f32, 1f32, (3, 16, 8, 1), &dev).unwrap();
    let probs = net.forward(&xs, true).unwrap();
    assert_eq!(probs.dims(), &[3, 16, 8, 3]);
}

#[test]
fn weights_match_parameter_count() {
    let model = build_u_net(&small_config()).unwrap();
    let vm = VarMap::new();
    let vb = VarBuilder::from_varmap(&vm, DType::F32, &Device::Cpu);
    model.init(vb).unwrap();
    let total: usize = vm.all_vars().iter().map(|v| v.elem_count()).sum();
    assert_eq!(total, model.parameter_count());
}

#[test]
fn forward_rejects_wrong_input() {
    let model = build_u_net(&small_config()).unwrap();
    let dev = Device::Cpu;
    let vm = VarMap::new();
    let net = model
        .init(VarBuilder::from_varmap(&vm, DType::F32, &dev))
        .unwrap();
    let xs = Tensor::zeros((1, 16, 8, 3), DType::F32, &dev).unwrap();
    match net.forward(&xs, false) {
        Err(Error::InputShape { expected, actual }) => {
            assert_eq!(expected, FeatureShape::new(16, 8, 1));
            assert_eq!(actual, vec![1, 16, 8, 3]);
        }
        other => panic!("unexpected {other:?}"),
    }
}
