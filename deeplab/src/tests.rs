use burn::{
    backend::{Autodiff, NdArray},
    module::AutodiffModule,
    prelude::*,
    tensor::Distribution,
};

use crate::{
    create_model, functional, DeepLab, DeepLabConfig, DeepLabError, ForwardMode, TrainMode,
    VggMetaSeg, VggSeg, WeightMap,
};

pub type TestBackend = NdArray<f32>;

pub type TestAutodiffBackend = Autodiff<TestBackend>;

fn image<B: Backend>(size: usize, device: &Device<B>) -> Tensor<B, 4> {
    Tensor::random([1, 3, size, size], Distribution::Normal(0.0, 1.0), device)
}

fn max_abs_diff(a: Tensor<TestBackend, 4>, b: Tensor<TestBackend, 4>) -> f32 {
    (a - b).abs().max().into_scalar()
}

#[test_log::test]
fn create_model_selects_the_variant() {
    let device = Default::default();

    let standard = create_model::<TestBackend>(21, false, &device).expect("valid configuration");
    assert!(matches!(standard, DeepLab::Standard(_)));
    assert!(standard.as_meta().is_none());

    let meta = create_model::<TestBackend>(21, true, &device).expect("valid configuration");
    assert!(meta.is_meta());
    assert_eq!(meta.num_classes(), 21);

    assert_eq!(
        create_model::<TestBackend>(0, true, &device).map(|model| model.num_classes()),
        Err(DeepLabError::InvalidConfiguration {
            reason: "num_classes must be at least 1".to_owned()
        })
    );
}

#[test]
fn both_variants_share_parameter_names() {
    let device = Default::default();
    let standard = DeepLabConfig::new()
        .init_standard::<TestBackend>(&device)
        .expect("valid configuration");
    let meta = DeepLabConfig::new()
        .init_meta::<TestBackend>(&device)
        .expect("valid configuration");

    assert_eq!(standard.parameter_names(), meta.parameter_names());
}

#[test]
fn functional_all_matches_structured_forward() {
    let device = Default::default();
    let standard = VggSeg::<TestBackend>::new(21, 0.01, &device);
    let meta = VggMetaSeg::new(VggSeg::<TestBackend>::new(21, 0.01, &device));
    let weights = standard.weight_map();

    let x = image::<TestBackend>(16, &device);
    let expected = standard.forward(x.clone());
    let actual = meta
        .forward(x, Some(&weights), Some(TrainMode::All), false)
        .expect("weights are complete");

    assert_eq!(actual.dims(), [1, 21, 2, 2]);
    assert!(max_abs_diff(expected, actual) < 1e-5);
}

#[test]
fn every_mode_matches_structured_forward_on_own_weights() {
    let device = Default::default();
    let model = VggMetaSeg::new(VggSeg::<TestBackend>::new(21, 0.01, &device));
    let weights = model.weight_map();
    let x = image::<TestBackend>(16, &device);

    let expected = model
        .forward_with(x.clone(), ForwardMode::Structured, false)
        .expect("structured forward cannot fail");

    let modes = [
        ForwardMode::FunctionalHead(&weights),
        ForwardMode::Conv345(&weights),
        ForwardMode::Conv45(&weights),
        ForwardMode::Functional(&weights),
    ];
    for mode in modes {
        let output = model
            .forward_with(x.clone(), mode, false)
            .expect("weights are complete");
        assert_eq!(output.dims(), [1, 21, 2, 2]);
        assert!(max_abs_diff(expected.clone(), output) < 1e-5, "{mode:?}");
    }
}

#[test]
fn output_shape_is_an_eighth_of_the_input_for_every_mode() {
    let device = Default::default();
    let model = VggMetaSeg::new(VggSeg::<TestBackend>::new(3, 0.01, &device));
    let weights = model.weight_map();
    let x = Tensor::<TestBackend, 4>::random([2, 3, 24, 16], Distribution::Normal(0.0, 1.0), &device);

    let modes = [
        None,
        Some(TrainMode::Conv345),
        Some(TrainMode::Conv45),
        Some(TrainMode::All),
    ];
    for train_mode in modes {
        let output = model
            .forward(x.clone(), Some(&weights), train_mode, true)
            .expect("weights are complete");
        assert_eq!(output.dims(), [2, 3, 3, 2]);
    }

    let output = model
        .forward(x, None, None, true)
        .expect("structured forward cannot fail");
    assert_eq!(output.dims(), [2, 3, 3, 2]);
}

#[test]
fn meta_forward_reports_missing_keys() {
    let device = Default::default();
    let model = VggMetaSeg::new(VggSeg::<TestBackend>::new(21, 0.01, &device));
    let mut weights = model.weight_map();
    weights.remove("conv_5.4.bias");
    let x = image::<TestBackend>(16, &device);

    for train_mode in [TrainMode::Conv345, TrainMode::Conv45, TrainMode::All] {
        let result = model.forward(x.clone(), Some(&weights), Some(train_mode), false);
        assert_eq!(
            result.map(|t| t.dims()),
            Err(DeepLabError::MissingWeightKey {
                key: "conv_5.4.bias".to_owned()
            })
        );
    }

    // The backbone is structured here, so only the head weights matter.
    let output = model
        .forward(x.clone(), Some(&weights), None, false)
        .expect("head weights are complete");
    assert_eq!(output.dims(), [1, 21, 2, 2]);

    // Without weights the mode is ignored.
    assert!(model.forward(x, None, Some(TrainMode::All), false).is_ok());
}

#[test]
fn meta_forward_reports_shape_mismatches() {
    let device = Default::default();
    let model = VggMetaSeg::new(VggSeg::<TestBackend>::new(21, 0.01, &device));
    let mut weights = model.weight_map();
    weights.insert(
        "conv_4.2.weight",
        Tensor::<TestBackend, 4>::zeros([512, 512, 1, 1], &device),
    );

    match model.forward(image(16, &device), Some(&weights), Some(TrainMode::Conv45), false) {
        Err(DeepLabError::ShapeMismatch {
            key,
            expected,
            actual,
        }) => {
            assert_eq!(key, "conv_4.2.weight");
            assert_eq!(expected, "[512, 512, 3, 3]");
            assert_eq!(actual, "[512, 512, 1, 1]");
        }
        other => panic!("Expected ShapeMismatch error, got {:?}", other.map(|t| t.dims())),
    }
}

#[test]
fn weights_move_between_variants_without_translation() {
    let device = Default::default();
    let mut model = create_model::<TestBackend>(5, true, &device).expect("valid configuration");
    let standard = VggSeg::<TestBackend>::new(5, 0.01, &device);

    let meta = model.as_meta_mut().expect("meta variant");
    meta.load_weight_map(&standard.weight_map())
        .expect("same names and shapes");

    let x = image::<TestBackend>(16, &device);
    assert!(max_abs_diff(standard.forward(x.clone()), model.forward(x)) < 1e-6);
}

#[test_log::test]
fn freezing_keeps_computed_gradients() {
    let device = Default::default();
    let mut model = VggMetaSeg::new(VggSeg::<TestAutodiffBackend>::new(2, 0.01, &device));

    let output = model
        .forward(image(16, &device), None, None, true)
        .expect("structured forward cannot fail");
    let grads = output.sum().backward();

    model.set_learnable(&["assp_"]);

    let weights = model.weight_map();
    let frozen = weights.kernel("conv_1.0.weight").expect("present");
    let trainable = weights.kernel("assp_1.pred.weight").expect("present");
    assert!(frozen.grad(&grads).is_some());
    assert!(trainable.grad(&grads).is_some());
    assert_eq!(model.learnable_grads(grads).len(), 24);
}

#[test]
fn learnable_grads_leave_out_frozen_parameters() {
    let device = Default::default();
    let mut model = VggMetaSeg::new(VggSeg::<TestAutodiffBackend>::new(2, 0.01, &device));
    model.set_learnable(&["conv_5", "assp_1"]);

    let output = model
        .forward(image(16, &device), None, None, true)
        .expect("structured forward cannot fail");
    let grads = model.learnable_grads(output.sum().backward());

    let (kernels, biases) = model.seg().param_ids();
    assert_eq!(grads.len(), 12);
    for (name, id) in kernels {
        let grad = grads.get::<TestBackend, 4>(id);
        assert_eq!(grad.is_some(), model.is_learnable(&name), "{name}");
    }
    for (name, id) in biases {
        let grad = grads.get::<TestBackend, 1>(id);
        assert_eq!(grad.is_some(), model.is_learnable(&name), "{name}");
    }
}

#[test]
fn valid_model_gives_an_eval_mode_structured_pass() {
    let device = Default::default();
    let model = VggMetaSeg::new(VggSeg::<TestAutodiffBackend>::new(2, 0.01, &device));
    let valid = model.valid();
    let x = image::<TestBackend>(16, &device);

    let first = valid
        .forward(x.clone(), None, None, false)
        .expect("structured forward cannot fail");
    let second = valid
        .forward(x, None, None, false)
        .expect("structured forward cannot fail");

    assert_eq!(max_abs_diff(first, second), 0.0);
}

#[test]
fn functional_aspp_is_differentiable_in_the_supplied_weights() {
    let device = Default::default();
    let model = VggSeg::<TestAutodiffBackend>::new(2, 0.01, &device);
    let weights: WeightMap<TestAutodiffBackend> = model.weight_map().filter_prefix("assp_");

    let x = Tensor::<TestAutodiffBackend, 4>::random(
        [1, 512, 2, 2],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let output = functional::fun_deeplab_assp(x, &weights, true).expect("weights are complete");
    let grads = output.sum().backward();

    let pred_bias = weights.bias("assp_3.pred.bias").expect("present");
    let grad = pred_bias.grad(&grads).expect("bias takes part in the sum");
    // d(sum)/d(bias) is the number of output pixels.
    assert_eq!(grad.to_data().to_vec::<f32>().ok(), Some(vec![4.0, 4.0]));
}

#[test]
#[ignore = "full-resolution forward is slow on the ndarray backend"]
fn pascal_voc_crop_produces_41_by_41_prediction() {
    let device = Default::default();
    let model = create_model::<TestBackend>(21, false, &device).expect("valid configuration");

    let output = model.forward(image(321, &device));

    assert_eq!(output.dims(), [1, 21, 41, 41]);
    assert_eq!(crate::output_size(321), 41);
}
