//! Integration tests for the prediction service.
//!
//! These tests exercise the full pipeline: labeled samples flow into both
//! datasets, the reducer is fit once and reused, training runs in both
//! regimes, and service state survives a save/restart cycle.

use gazetrain_rs::{
    GazeConfig, ModelFamily, PredictionService, Sample, SaveStatus,
};

/// Small deterministic configuration rooted in a temp directory.
fn temp_config(dir: &tempfile::TempDir, family: ModelFamily) -> GazeConfig {
    let mut config = GazeConfig::test();
    config.model.family = family;
    config.paths.checkpoint = dir.path().join("model.safetensors");
    config.paths.dataset = dir.path().join("dataset.json");
    config.paths.finetune_dataset = dir.path().join("finetune.json");
    config.paths.reducer = dir.path().join("reducer.json");
    config
}

/// Synthetic frame whose features correlate with a target point on a line,
/// so a few epochs of training can actually reduce the loss.
fn labeled_frame(i: usize, feature_len: usize) -> Sample {
    let t = (i as f32 / 10.0).sin();
    let features = (0..feature_len)
        .map(|j| t * (j as f32 + 1.0) * 0.05)
        .collect();
    Sample {
        features,
        target: [t, -t],
    }
}

fn seed_service(service: &mut PredictionService, count: usize) {
    let len = service.config().feature_len();
    for i in 0..count {
        let sample = labeled_frame(i, len);
        service
            .predict(sample.features, Some(sample.target))
            .unwrap();
    }
}

#[test]
fn test_full_training_cycle_on_linear_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir, ModelFamily::Linear);
    let mut service = PredictionService::new(config).unwrap();

    seed_service(&mut service, 20);
    assert_eq!(service.dataset_len(), 20);

    let first = service.train(1, false).unwrap();
    assert!(!first.is_sentinel());
    let later = service.train(40, false).unwrap();
    assert!(later.combined < first.combined);

    // The stored report is what predictions echo back.
    let len = service.config().feature_len();
    let response = service.predict(vec![0.01; len], None).unwrap();
    assert_eq!(response.losses, later);
}

#[test]
fn test_training_below_minimum_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = temp_config(&dir, ModelFamily::Linear);
    config.data.dataset_min_size = 50;
    let mut service = PredictionService::new(config).unwrap();

    seed_service(&mut service, 10);
    let report = service.train(5, false).unwrap();
    assert!(report.is_sentinel());
}

#[test]
fn test_reduced_pipeline_with_persisted_reducer() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir, ModelFamily::PcaMlp);
    let reducer_path = config.paths.reducer.clone();
    let dataset_path = config.paths.dataset.clone();

    // First boot with the linear baseline gathers data and persists it.
    {
        let mut bootstrap =
            PredictionService::new(temp_config(&dir, ModelFamily::Linear)).unwrap();
        seed_service(&mut bootstrap, 20);
        assert_eq!(bootstrap.save().status, SaveStatus::Success);
        assert!(dataset_path.exists());
    }

    // Second boot with the reduced family fits the reducer from the loaded
    // dataset and persists the artifact.
    let mut service = PredictionService::new(config.clone()).unwrap();
    assert!(reducer_path.exists());
    assert_eq!(service.dataset_len(), 20);

    let report = service.train(10, false).unwrap();
    assert!(!report.is_sentinel());

    // A third boot must load the same artifact and keep predicting.
    let artifact = std::fs::read_to_string(&reducer_path).unwrap();
    let mut restarted = PredictionService::new(config).unwrap();
    assert_eq!(std::fs::read_to_string(&reducer_path).unwrap(), artifact);
    let len = restarted.config().feature_len();
    restarted.predict(vec![0.02; len], None).unwrap();
}

#[test]
fn test_streaming_finetune_uses_recent_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir, ModelFamily::PcaLstm);

    // Seed the dataset file so the reducer can be fit at startup.
    {
        let mut bootstrap =
            PredictionService::new(temp_config(&dir, ModelFamily::Linear)).unwrap();
        seed_service(&mut bootstrap, 16);
        assert_eq!(bootstrap.save().status, SaveStatus::Success);
    }

    let mut service = PredictionService::new(config).unwrap();
    seed_service(&mut service, 12);

    let report = service.train(2, true).unwrap();
    assert!(!report.is_sentinel());

    // Streaming prediction carries state; resetting at a sequence boundary
    // must be accepted at any point.
    let len = service.config().feature_len();
    service.predict(vec![0.01; len], None).unwrap();
    service.reset_session();
    service.predict(vec![0.01; len], None).unwrap();
}

#[test]
fn test_save_load_round_trip_preserves_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir, ModelFamily::Linear);
    let mut service = PredictionService::new(config.clone()).unwrap();

    seed_service(&mut service, 10);
    assert_eq!(service.save().status, SaveStatus::Success);

    let restarted = PredictionService::new(config).unwrap();
    assert_eq!(restarted.dataset_len(), 10);
}

#[test]
fn test_add_data_reports_last_item_and_write_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = temp_config(&dir, ModelFamily::Linear);
    let len = config.feature_len();
    let capacity = config.data.dataset_capacity;
    let mut service = PredictionService::new(config).unwrap();

    let batch: Vec<Sample> = (0..5).map(|i| labeled_frame(i, len)).collect();
    let response = service.add_data(batch).unwrap();
    assert_eq!(response.data_index, 5 % capacity);
    assert_eq!(service.dataset_len(), 5);
}

#[test]
fn test_unknown_family_tag_rejected_at_config_time() {
    let err = ModelFamily::from_tag("pca-transformer").unwrap_err();
    assert!(err.to_string().contains("pca-transformer"));
}
