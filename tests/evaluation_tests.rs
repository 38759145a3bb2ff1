//! End-to-end evaluation tests over a synthetic workspace
//!
//! Each test builds a throwaway workspace with generated WAV clips, DCASE
//! style metadata files and a small serialized checkpoint, then runs the
//! full evaluation pipeline against it.

use std::fs;
use std::path::{Path, PathBuf};

use sed_eval::checkpoint::{ExperimentState, ModelState, Tensor};
use sed_eval::encoder::EncoderState;
use sed_eval::model::{
    ConvBlockWeights, CrnnConfig, CrnnWeights, GruDirectionWeights, GruLayerWeights,
};
use sed_eval::preprocessing::ScalerState;
use sed_eval::{run_evaluation, EvalConfig, EvalError};

const SAMPLE_RATE: u32 = 16000;
const LABELS: [&str; 2] = ["Alarm", "Dog"];

/// Fresh workspace with audio, metadata and a checkpoint
fn setup_workspace(test_name: &str) -> (PathBuf, EvalConfig, PathBuf) {
    let workspace = std::env::temp_dir().join(format!(
        "sed_eval_it_{}_{}",
        test_name,
        std::process::id()
    ));
    fs::remove_dir_all(&workspace).ok();
    let audio_dir = workspace.join("dataset/audio/validation");
    let metadata_dir = workspace.join("dataset/metadata/validation");
    let model_dir = workspace.join("stored_data/model");
    fs::create_dir_all(&audio_dir).unwrap();
    fs::create_dir_all(&metadata_dir).unwrap();
    fs::create_dir_all(&model_dir).unwrap();

    for (name, frequency) in [("a.wav", 300.0), ("b.wav", 800.0), ("c.wav", 1500.0)] {
        write_wav(&audio_dir.join(name), frequency);
    }
    fs::write(
        metadata_dir.join("eval_dcase2018.csv"),
        "filename\tonset\toffset\tevent_label\n\
         a.wav\t0.1\t0.5\tDog\n\
         b.wav\t0.2\t0.8\tAlarm\n",
    )
    .unwrap();
    fs::write(
        metadata_dir.join("validation.csv"),
        "filename\tonset\toffset\tevent_label\n\
         b.wav\t0.0\t0.6\tAlarm\n\
         c.wav\t0.3\t0.9\tDog\n\
         c.wav\t0.1\t0.4\tAlarm\n",
    )
    .unwrap();

    let config = EvalConfig {
        workspace: workspace.clone(),
        sample_rate: SAMPLE_RATE,
        n_window: 256,
        hop_length: 128,
        n_mels: 8,
        f_max: 8000.0,
        max_len_seconds: 1.0,
        batch_size: 2,
        ..EvalConfig::default()
    };

    let model_path = model_dir.join("baseline_epoch_10.json");
    let state = build_state(config.max_frames());
    fs::write(&model_path, serde_json::to_string(&state).unwrap()).unwrap();

    (workspace, config, model_path)
}

fn write_wav(path: &Path, frequency: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..SAMPLE_RATE {
        let t = i as f32 / SAMPLE_RATE as f32;
        let v = (2.0 * std::f32::consts::PI * frequency * t).sin();
        writer.write_sample((v * 12000.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Deterministic pseudo-random tensor
fn filled(shape: &[usize], seed: u32) -> Tensor {
    let len: usize = shape.iter().product();
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    let data = (0..len)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            ((state >> 8) as f32 / (1 << 24) as f32 - 0.5) * 0.2
        })
        .collect();
    Tensor::from_vec(shape, data).unwrap()
}

/// A small but complete checkpoint: 3 conv blocks with (2, 2) pooling over
/// 8 mel bands, so the GRU sees 4 channels x 1 frequency bin
fn build_state(max_frames: usize) -> ExperimentState {
    let kwargs = CrnnConfig {
        n_in_channel: 1,
        nclass: LABELS.len(),
        attention: true,
        n_rnn_cell: 4,
        n_layers_rnn: 2,
        activation: "glu".to_string(),
        dropout: 0.5,
        kernel_size: vec![3, 3, 3],
        padding: vec![1, 1, 1],
        stride: vec![1, 1, 1],
        nb_filters: vec![4, 4, 4],
        pooling: vec![(2, 2), (2, 2), (2, 2)],
    };

    let mut blocks = Vec::new();
    let mut in_ch = kwargs.n_in_channel;
    for (i, &out) in kwargs.nb_filters.iter().enumerate() {
        blocks.push(ConvBlockWeights {
            conv_w: filled(&[out, in_ch, 3, 3], 10 + i as u32),
            conv_b: filled(&[out], 20 + i as u32),
            bn_gamma: Tensor::from_vec(&[out], vec![1.0; out]).unwrap(),
            bn_beta: Tensor::zeros(&[out]),
            bn_mean: Tensor::zeros(&[out]),
            bn_var: Tensor::from_vec(&[out], vec![1.0; out]).unwrap(),
            gate_w: Some(filled(&[out, out], 30 + i as u32)),
            gate_b: Some(Tensor::zeros(&[out])),
        });
        in_ch = out;
    }

    let hidden = kwargs.n_rnn_cell;
    let mut gru = Vec::new();
    for l in 0..kwargs.n_layers_rnn {
        let input = if l == 0 { 4 } else { 2 * hidden };
        let direction = |seed: u32| GruDirectionWeights {
            w_ih: filled(&[3 * hidden, input], seed),
            w_hh: filled(&[3 * hidden, hidden], seed + 1),
            b_ih: Tensor::zeros(&[3 * hidden]),
            b_hh: Tensor::zeros(&[3 * hidden]),
        };
        gru.push(GruLayerWeights {
            forward: direction(40 + l as u32 * 2),
            backward: direction(50 + l as u32 * 2),
        });
    }

    let state_dict = CrnnWeights {
        blocks,
        gru,
        dense_w: filled(&[LABELS.len(), 2 * hidden], 60),
        dense_b: Tensor::zeros(&[LABELS.len()]),
        attention_w: Some(filled(&[LABELS.len(), 2 * hidden], 61)),
        attention_b: Some(Tensor::zeros(&[LABELS.len()])),
    };

    ExperimentState {
        epoch: 10,
        model: ModelState { kwargs, state_dict },
        pooling_time_ratio: 8,
        scaler: ScalerState {
            mean: vec![0.0; 8],
            std: vec![1.0; 8],
        },
        many_hot_encoder: EncoderState {
            labels: LABELS.iter().map(|l| l.to_string()).collect(),
            n_frames: max_frames,
        },
    }
}

#[test]
fn test_evaluates_both_splits_in_order() {
    let (workspace, config, model_path) = setup_workspace("splits");
    let state = ExperimentState::load(&model_path).unwrap();

    let summary = run_evaluation(&state, &config, None, None).unwrap();
    assert_eq!(summary.epoch, 10);
    assert_eq!(summary.splits.len(), 2);
    assert_eq!(summary.splits[0].name, "eval_dcase2018");
    assert_eq!(summary.splits[1].name, "validation");
    assert_eq!(summary.splits[0].n_clips, 2);
    assert_eq!(summary.splits[1].n_clips, 2);

    // Per-class tables cover the whole vocabulary on both splits
    for split in &summary.splits {
        assert_eq!(split.weak_metrics.len(), 2);
        assert_eq!(split.event_metrics.classes.len(), 2);
        assert!((0.0..=1.0).contains(&split.event_macro_f1()));
        assert!((0.0..=1.0).contains(&split.weak_macro_f1()));
    }

    fs::remove_dir_all(&workspace).ok();
}

#[test]
fn test_subpart_data_restricts_each_split() {
    let (workspace, config, model_path) = setup_workspace("subpart");
    let state = ExperimentState::load(&model_path).unwrap();

    let summary = run_evaluation(&state, &config, Some(1), None).unwrap();
    assert_eq!(summary.splits[0].n_clips, 1);
    assert_eq!(summary.splits[1].n_clips, 1);

    fs::remove_dir_all(&workspace).ok();
}

#[test]
fn test_predictions_file_written_and_overwritten() {
    let (workspace, config, model_path) = setup_workspace("predictions");
    let state = ExperimentState::load(&model_path).unwrap();

    let predictions_path = workspace.join("stored_data/predictions.tsv");
    fs::write(&predictions_path, "stale junk from a previous run").unwrap();

    run_evaluation(&state, &config, None, Some(&predictions_path)).unwrap();

    let content = fs::read_to_string(&predictions_path).unwrap();
    assert!(content.starts_with("filename\tonset\toffset\tevent_label\n"));
    assert!(!content.contains("stale junk"));
    // Only validation clips appear, never eval_dcase2018-only clips
    assert!(!content.contains("a.wav"));

    fs::remove_dir_all(&workspace).ok();
}

#[test]
fn test_no_predictions_file_without_path() {
    let (workspace, config, model_path) = setup_workspace("nopred");
    let state = ExperimentState::load(&model_path).unwrap();

    run_evaluation(&state, &config, None, None).unwrap();
    assert!(!workspace.join("stored_data/predictions.tsv").exists());

    fs::remove_dir_all(&workspace).ok();
}

#[test]
fn test_repeated_runs_give_identical_scores() {
    let (workspace, config, model_path) = setup_workspace("determinism");
    let state = ExperimentState::load(&model_path).unwrap();

    let first = run_evaluation(&state, &config, None, None).unwrap();
    let second = run_evaluation(&state, &config, None, None).unwrap();

    for (a, b) in first.splits.iter().zip(&second.splits) {
        assert_eq!(a.event_macro_f1().to_bits(), b.event_macro_f1().to_bits());
        assert_eq!(a.weak_macro_f1().to_bits(), b.weak_macro_f1().to_bits());
        assert_eq!(a.weak_metrics, b.weak_metrics);
    }

    fs::remove_dir_all(&workspace).ok();
}

#[test]
fn test_checkpoint_pooling_time_ratio_scales_event_times() {
    let (workspace, config, model_path) = setup_workspace("ptr");
    let mut state = ExperimentState::load(&model_path).unwrap();
    // Saturate the strong head so every output frame is active for both
    // classes and each clip decodes into full-length events
    state.model.state_dict.dense_b =
        Tensor::from_vec(&[LABELS.len()], vec![5.0; LABELS.len()]).unwrap();

    let run = |state: &ExperimentState, tag: &str| -> String {
        let path = workspace.join(format!("predictions_{}.tsv", tag));
        run_evaluation(state, &config, None, Some(&path)).unwrap();
        fs::read_to_string(&path).unwrap()
    };

    let base = run(&state, "base");
    state.pooling_time_ratio = 16;
    let doubled = run(&state, "doubled");

    // 125 input frames pool down to 15 output frames; at hop 128 / 16 kHz
    // the clip-length offset is 0.96 s at ratio 8 and 1.92 s at ratio 16
    assert!(base.contains("\t0.960\t"), "unexpected output:\n{}", base);
    assert!(doubled.contains("\t1.920\t"), "unexpected output:\n{}", doubled);
    assert_ne!(base, doubled);

    fs::remove_dir_all(&workspace).ok();
}

#[test]
fn test_checkpoint_without_scaler_fails_before_inference() {
    let (workspace, _config, model_path) = setup_workspace("noscaler");

    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&model_path).unwrap()).unwrap();
    value.as_object_mut().unwrap().remove("scaler");
    let stripped = workspace.join("stored_data/model/stripped.json");
    fs::write(&stripped, serde_json::to_string(&value).unwrap()).unwrap();

    let err = ExperimentState::load(&stripped).unwrap_err();
    assert!(matches!(err, EvalError::Checkpoint(_)));
    assert!(err.to_string().contains("scaler"));

    fs::remove_dir_all(&workspace).ok();
}

#[test]
fn test_missing_metadata_fails() {
    let (workspace, mut config, model_path) = setup_workspace("nometa");
    let state = ExperimentState::load(&model_path).unwrap();

    config.eval2018_metadata = PathBuf::from("dataset/metadata/validation/missing.csv");
    let err = run_evaluation(&state, &config, None, None).unwrap_err();
    assert!(matches!(err, EvalError::Dataset(_)));

    fs::remove_dir_all(&workspace).ok();
}
