use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_onnxml_graph::{
    BackendKind, BinaryScore, Capabilities, ConversionOptions, ConvertedModel, ConverterRegistry,
    DataType, ErrorKind, GraphError, LinearModel, MultiClass, OperatorGraph, Parity, Prediction,
    Producer, Tensor, ValueInfo, compare_predictions, convert, graph_from_json,
};

const SAMPLES: usize = 100;
const FEATURES: usize = 20;
const PRODUCERS: [Producer; 2] = [Producer::ClassifierNode, Producer::Decomposed];

struct Dataset {
    rows: Vec<f32>,
    targets: Vec<usize>,
}

/// Gaussian-ish blobs around one random centre per class.
fn dataset(seed: u64, classes: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let centres: Vec<Vec<f32>> = (0..classes)
        .map(|_| (0..FEATURES).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect();
    let mut rows = Vec::with_capacity(SAMPLES * FEATURES);
    let mut targets = Vec::with_capacity(SAMPLES);
    for idx in 0..SAMPLES {
        let class = idx % classes;
        for centre in &centres[class] {
            let noise = rng.gen_range(-1.0f32..1.0) + rng.gen_range(-1.0f32..1.0);
            rows.push(centre + 0.5 * noise);
        }
        targets.push(class);
    }
    Dataset { rows, targets }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Batch gradient descent on the logistic (binary) or softmax loss.
fn fit(data: &Dataset, classes: &[i64], multi_class: MultiClass) -> LinearModel {
    let outputs = if classes.len() == 2 { 1 } else { classes.len() };
    let mut weights = vec![vec![0.0f64; FEATURES]; outputs];
    let mut bias = vec![0.0f64; outputs];
    let rate = 0.5;

    for _ in 0..300 {
        let mut grad_w = vec![vec![0.0f64; FEATURES]; outputs];
        let mut grad_b = vec![0.0f64; outputs];
        for (row, target) in data.rows.chunks(FEATURES).zip(&data.targets) {
            let logits: Vec<f64> = weights
                .iter()
                .zip(&bias)
                .map(|(w, b)| w.iter().zip(row).map(|(w, x)| w * f64::from(*x)).sum::<f64>() + b)
                .collect();
            let errors: Vec<f64> = if outputs == 1 {
                vec![sigmoid(logits[0]) - (*target as f64)]
            } else {
                let probabilities: Vec<f64> = match multi_class {
                    MultiClass::OneVsRest => logits.iter().map(|z| sigmoid(*z)).collect(),
                    MultiClass::Multinomial => {
                        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
                        let total: f64 = exps.iter().sum();
                        exps.iter().map(|e| e / total).collect()
                    }
                };
                probabilities
                    .iter()
                    .enumerate()
                    .map(|(class, p)| p - f64::from(u8::from(class == *target)))
                    .collect()
            };
            for (k, error) in errors.iter().enumerate() {
                for (g, x) in grad_w[k].iter_mut().zip(row) {
                    *g += error * f64::from(*x);
                }
                grad_b[k] += error;
            }
        }
        let scale = rate / SAMPLES as f64;
        for k in 0..outputs {
            for (w, g) in weights[k].iter_mut().zip(&grad_w[k]) {
                *w -= scale * g;
            }
            bias[k] -= scale * grad_b[k];
        }
    }

    LinearModel::new(
        weights
            .iter()
            .map(|row| row.iter().map(|w| *w as f32).collect())
            .collect(),
        bias.iter().map(|b| *b as f32).collect(),
        classes.to_vec(),
        multi_class,
    )
    .unwrap()
}

fn input(data: &Dataset) -> Tensor {
    Tensor::from_f32(&[SAMPLES, FEATURES], data.rows.clone()).unwrap()
}

fn converted(graph: &OperatorGraph, backend: BackendKind, options: &ConversionOptions) -> ConvertedModel {
    convert(graph, backend, None, &Capabilities::all(), options)
        .unwrap()
        .model()
        .unwrap()
}

/// Rows whose two best logits are far enough apart that float32 rounding
/// cannot change the decision.
fn decided_rows(model: &LinearModel, rows: &[f32]) -> Vec<bool> {
    model
        .decision_function(rows)
        .iter()
        .map(|logits| {
            if logits.len() == 1 {
                return logits[0].abs() > 1e-4;
            }
            let mut sorted = logits.clone();
            sorted.sort_by(|a, b| b.total_cmp(a));
            sorted[0] - sorted[1] > 1e-4
        })
        .collect()
}

fn assert_labels_match(model: &LinearModel, rows: &[f32], labels: &[i64]) {
    let expected = model.predict(rows);
    for (idx, decided) in decided_rows(model, rows).into_iter().enumerate() {
        if decided {
            assert_eq!(labels[idx], expected[idx], "label of row {idx}");
        }
    }
}

fn assert_scores_close(actual: &[f64], expected: &[f64], atol: f64) {
    assert_eq!(actual.len(), expected.len());
    for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= atol, "score {idx}: {a} vs {e}");
    }
}

#[test]
fn binary_model_agrees_across_producers_and_backends() {
    let data = dataset(7, 2);
    let model = fit(&data, &[0, 1], MultiClass::OneVsRest);
    let x = input(&data);
    let options = ConversionOptions::default();
    let expected: Vec<f64> = model.predict_proba(&data.rows).iter().map(|p| p[1]).collect();

    for producer in PRODUCERS {
        let graph = model.to_graph(producer).unwrap();
        let fast = converted(&graph, BackendKind::Ndarray, &options).predict(&x).unwrap();
        let reference = converted(&graph, BackendKind::Reference, &options)
            .predict(&x)
            .unwrap();

        assert_eq!(fast.label.shape(), &[SAMPLES]);
        assert_eq!(fast.label.data_type(), DataType::Int64);
        assert_eq!(fast.score.shape(), &[SAMPLES]);
        compare_predictions(&fast, &reference, Parity::default()).unwrap();

        assert_labels_match(&model, &data.rows, &fast.labels());
        assert_scores_close(&fast.score.to_f64_vec(), &expected, 1e-4);
    }
}

fn predict_with(model: &LinearModel, producer: Producer, backend: BackendKind, x: &Tensor) -> Prediction {
    let graph = model.to_graph(producer).unwrap();
    converted(&graph, backend, &ConversionOptions::default())
        .predict(x)
        .unwrap()
}

#[test]
fn producers_agree_on_boundary_rows() {
    let data = dataset(13, 2);
    let fitted = fit(&data, &[0, 1], MultiClass::OneVsRest);
    let alternating: Vec<f32> = (0..FEATURES).map(|idx| if idx % 2 == 0 { 1.0 } else { -1.0 }).collect();
    let on_boundary = LinearModel::new(vec![alternating], vec![0.0], vec![0, 1], MultiClass::OneVsRest).unwrap();

    let mut rows = data.rows.clone();
    rows.extend(vec![0.0f32; FEATURES]);
    rows.extend(vec![1.0f32; FEATURES]);
    let mut tiny = vec![0.0f32; FEATURES];
    tiny[0] = 1e-8;
    rows.extend(tiny);
    let x = Tensor::from_f32(&[SAMPLES + 3, FEATURES], rows).unwrap();

    for model in [&fitted, &on_boundary] {
        for backend in BackendKind::ALL {
            let node = predict_with(model, Producer::ClassifierNode, backend, &x);
            let decomposed = predict_with(model, Producer::Decomposed, backend, &x);
            compare_predictions(&node, &decomposed, Parity::default()).unwrap();
        }
    }

    let labels = predict_with(&on_boundary, Producer::Decomposed, BackendKind::Ndarray, &x).labels();
    assert_eq!(&labels[SAMPLES..], &[1, 1, 1]);
}

#[test]
fn multiclass_producers_agree_row_for_row() {
    let data = dataset(17, 3);
    let x = input(&data);
    for multi_class in [MultiClass::OneVsRest, MultiClass::Multinomial] {
        let model = fit(&data, &[2, 4, 6], multi_class);
        for backend in BackendKind::ALL {
            let node = predict_with(&model, Producer::ClassifierNode, backend, &x);
            let decomposed = predict_with(&model, Producer::Decomposed, backend, &x);
            compare_predictions(&node, &decomposed, Parity::default()).unwrap();
        }
    }
}

#[test]
fn fitted_binary_model_separates_the_blobs() {
    let data = dataset(11, 2);
    let model = fit(&data, &[0, 1], MultiClass::OneVsRest);
    let graph = model.to_graph(Producer::ClassifierNode).unwrap();
    let prediction = converted(&graph, BackendKind::Ndarray, &ConversionOptions::default())
        .predict(&input(&data))
        .unwrap();
    let correct = prediction
        .labels()
        .iter()
        .zip(&data.targets)
        .filter(|(label, target)| **label == **target as i64)
        .count();
    assert!(correct >= 90, "only {correct} of {SAMPLES} rows classified correctly");
}

#[test]
fn binary_two_column_scores_sum_to_one() {
    let data = dataset(3, 2);
    let model = fit(&data, &[-1, 1], MultiClass::OneVsRest);
    let graph = model.to_graph(Producer::ClassifierNode).unwrap();
    let options = ConversionOptions::default().with_binary_score(BinaryScore::TwoColumn);
    let prediction = converted(&graph, BackendKind::Reference, &options)
        .predict(&input(&data))
        .unwrap();

    assert_eq!(prediction.score.shape(), &[SAMPLES, 2]);
    let scores = prediction.score.to_f64_vec();
    let expected: Vec<f64> = model.predict_proba(&data.rows).concat();
    assert_scores_close(&scores, &expected, 1e-4);
    for pair in scores.chunks(2) {
        assert!((pair[0] + pair[1] - 1.0).abs() < 1e-6);
    }
    assert!(prediction.labels().iter().all(|label| *label == -1 || *label == 1));
}

#[test]
fn multiclass_models_agree_across_producers_and_backends() {
    let data = dataset(21, 3);
    let x = input(&data);
    let options = ConversionOptions::default();

    for multi_class in [MultiClass::OneVsRest, MultiClass::Multinomial] {
        let model = fit(&data, &[10, 20, 30], multi_class);
        let expected = model.predict_proba(&data.rows).concat();
        for producer in PRODUCERS {
            let graph = model.to_graph(producer).unwrap();
            let fast = converted(&graph, BackendKind::Ndarray, &options).predict(&x).unwrap();
            let reference = converted(&graph, BackendKind::Reference, &options)
                .predict(&x)
                .unwrap();

            assert_eq!(fast.label.shape(), &[SAMPLES]);
            assert_eq!(fast.score.shape(), &[SAMPLES, 3]);
            compare_predictions(&fast, &reference, Parity::default()).unwrap();

            assert_labels_match(&model, &data.rows, &fast.labels());
            assert_scores_close(&fast.score.to_f64_vec(), &expected, 1e-4);
            for row in fast.score.to_f64_vec().chunks(3) {
                assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-5);
            }
        }
    }
}

#[test]
fn repeated_predictions_are_bit_identical() {
    let data = dataset(5, 3);
    let model = fit(&data, &[0, 1, 2], MultiClass::Multinomial);
    let graph = model.to_graph(Producer::Decomposed).unwrap();
    let x = input(&data);
    for backend in BackendKind::ALL {
        let converted = converted(&graph, backend, &ConversionOptions::default());
        let first = converted.predict(&x).unwrap();
        let second = converted.predict(&x).unwrap();
        compare_predictions(&first, &second, Parity::Exact).unwrap();
    }
}

#[test]
fn float64_input_runs_at_double_precision() {
    let data = dataset(9, 3);
    let model = fit(&data, &[0, 1, 2], MultiClass::OneVsRest);
    let graph = model.to_graph(Producer::ClassifierNode).unwrap();
    let declared = &graph.inputs()[0];
    let graph = OperatorGraph::new(
        graph.nodes().to_vec(),
        graph.initializers().clone(),
        vec![ValueInfo::new(declared.name.clone(), DataType::Float64, declared.shape.clone())],
        graph.outputs().to_vec(),
    )
    .unwrap();

    let single = input(&data);
    let err = convert(
        &graph,
        BackendKind::Ndarray,
        Some(&single),
        &Capabilities::all(),
        &ConversionOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::DataTypeMismatch { .. }));

    let example = single.cast(DataType::Float64);
    let converted = convert(
        &graph,
        BackendKind::Ndarray,
        Some(&example),
        &Capabilities::all(),
        &ConversionOptions::default(),
    )
    .unwrap()
    .model()
    .unwrap();
    let prediction = converted.predict(&example).unwrap();
    assert_eq!(prediction.score.data_type(), DataType::Float64);
    assert_scores_close(
        &prediction.score.to_f64_vec(),
        &model.predict_proba(&data.rows).concat(),
        1e-6,
    );
}

#[test]
fn wrong_feature_count_is_rejected_before_execution() {
    let data = dataset(1, 2);
    let model = fit(&data, &[0, 1], MultiClass::OneVsRest);
    let graph = model.to_graph(Producer::ClassifierNode).unwrap();
    let converted = converted(&graph, BackendKind::Ndarray, &ConversionOptions::default());

    let narrow = Tensor::from_f32(&[2, FEATURES - 1], vec![0.0; 2 * (FEATURES - 1)]).unwrap();
    let err = converted.predict(&narrow).unwrap_err();
    assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
}

#[test]
fn missing_backend_capability_skips_conversion() {
    let data = dataset(2, 2);
    let model = fit(&data, &[0, 1], MultiClass::OneVsRest);
    let graph = model.to_graph(Producer::ClassifierNode).unwrap();
    let capabilities = Capabilities::all().without(BackendKind::Reference);
    let conversion = convert(
        &graph,
        BackendKind::Reference,
        None,
        &capabilities,
        &ConversionOptions::default(),
    )
    .unwrap();
    assert!(!conversion.is_available());
}

#[test]
fn registry_converts_json_graph_by_backend_name() {
    let graph = graph_from_json(
        r#"{
            "inputs": [{"name": "X", "shape": [null, 2]}],
            "outputs": ["label", "probabilities"],
            "nodes": [{
                "op_type": "LinearClassifier",
                "domain": "ai.onnx.ml",
                "inputs": ["X"],
                "outputs": ["label", "probabilities"],
                "attributes": {
                    "coefficients": {"floats": [1.0, -1.0, -1.0, 1.0]},
                    "intercepts": {"floats": [0.0, 0.0]},
                    "classlabels_ints": {"ints": [4, 7]},
                    "post_transform": {"string": "SOFTMAX"}
                }
            }]
        }"#,
    )
    .unwrap();
    let registry = ConverterRegistry::with_defaults();
    let x = Tensor::from_f32(&[2, 2], vec![2.0, 0.0, 0.0, 2.0]).unwrap();
    let prediction = registry
        .convert("Reference", &graph, None, &ConversionOptions::default())
        .unwrap()
        .predict(&x)
        .unwrap();
    assert_eq!(prediction.labels(), vec![4, 7]);
    assert_eq!(prediction.score.shape(), &[2, 2]);

    let err = registry
        .convert("cuda", &graph, None, &ConversionOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
}

#[test]
fn unsupported_operator_is_reported_by_tag() {
    let err = graph_from_json(
        r#"{
            "inputs": [{"name": "X", "shape": [null, 2]}],
            "outputs": ["label", "probabilities"],
            "nodes": [
                {
                    "op_type": "LinearClassifier",
                    "inputs": ["X"],
                    "outputs": ["label", "scores"],
                    "attributes": {
                        "coefficients": {"floats": [1.0, -1.0]},
                        "intercepts": {"floats": [0.0]}
                    }
                },
                {"op_type": "ZipMap", "inputs": ["scores"], "outputs": ["probabilities"]}
            ]
        }"#,
    )
    .and_then(|graph| {
        convert(
            &graph,
            BackendKind::Ndarray,
            None,
            &Capabilities::all(),
            &ConversionOptions::default(),
        )
    })
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperator);
    assert!(err.to_string().contains("ZipMap"));
}

fn binary_model(weights: Vec<f32>, bias: f32) -> LinearModel {
    LinearModel::new(vec![weights], vec![bias], vec![3, 8], MultiClass::OneVsRest).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn binary_label_follows_probability_threshold(
        weights in prop::collection::vec(-4.0f32..4.0, 3),
        bias in -2.0f32..2.0,
        rows in prop::collection::vec(-3.0f32..3.0, 3..=30),
    ) {
        let batch = rows.len() / 3;
        let rows = rows[..batch * 3].to_vec();
        let model = binary_model(weights, bias);
        let graph = model.to_graph(Producer::ClassifierNode).unwrap();
        let x = Tensor::from_f32(&[batch, 3], rows).unwrap();
        for backend in BackendKind::ALL {
            let prediction = converted(&graph, backend, &ConversionOptions::default())
                .predict(&x)
                .unwrap();
            for (label, p) in prediction.labels().iter().zip(prediction.score.to_f64_vec()) {
                prop_assert!((0.0..=1.0).contains(&p));
                prop_assert_eq!(*label, if p >= 0.5 { 8 } else { 3 });
            }
        }
    }

    #[test]
    fn multiclass_label_is_first_best_score(
        weights in prop::collection::vec(-4.0f32..4.0, 8),
        bias in prop::collection::vec(-2.0f32..2.0, 4),
        rows in prop::collection::vec(-3.0f32..3.0, 2..=20),
        multinomial in any::<bool>(),
    ) {
        let batch = rows.len() / 2;
        let rows = rows[..batch * 2].to_vec();
        let multi_class = if multinomial { MultiClass::Multinomial } else { MultiClass::OneVsRest };
        let model = LinearModel::new(
            weights.chunks(2).map(<[f32]>::to_vec).collect(),
            bias,
            vec![5, 6, 7, 8],
            multi_class,
        )
        .unwrap();
        let x = Tensor::from_f32(&[batch, 2], rows).unwrap();
        for producer in PRODUCERS {
            let graph = model.to_graph(producer).unwrap();
            let prediction = converted(&graph, BackendKind::Ndarray, &ConversionOptions::default())
                .predict(&x)
                .unwrap();
            let scores = prediction.score.to_f64_vec();
            for (label, row) in prediction.labels().iter().zip(scores.chunks(4)) {
                let mut best = 0;
                for (idx, score) in row.iter().enumerate() {
                    if *score > row[best] {
                        best = idx;
                    }
                }
                prop_assert_eq!(*label, model.classes()[best]);
            }
        }
    }
}
