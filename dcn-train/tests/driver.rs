mod common;

use common::{FakeData, FakeModel, ScriptedQuality, quiet_config};
use dcn_train::training::evaluator::ValidationEvaluator;
use dcn_train::training::{
    EpochOutcome, Metric, MetricCache, PerformanceLog, Split, TrainingStepDriver,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn test_nan_loss_stops_mid_epoch() {
    let config = quiet_config(1);
    let driver = TrainingStepDriver::new(&config, 4);
    let mut model = FakeModel::with_losses(&[0.5, 0.3, f64::NAN, 0.1]);
    let mut data = FakeData::new(16, 4);
    let mut cache = MetricCache::new(4, 1);
    let mut rng = StdRng::seed_from_u64(7);

    let outcome = driver
        .run_epoch(0, &mut model, &mut data, 1e-3, &mut cache, &mut rng)
        .unwrap();

    match outcome {
        EpochOutcome::Diverged {
            batch_id,
            diagnostics,
        } => {
            assert_eq!(batch_id, 2);
            assert_eq!(diagnostics.nan_parameters[0].0, "encoder/conv_0/kernel");
        }
        EpochOutcome::Finished { .. } => panic!("expected divergence"),
    }
    assert_eq!(model.steps.len(), 3);
    assert_eq!(cache.len(Metric::Loss, Split::Training), 2);
    let average = cache.average(Metric::Loss, Split::Training).unwrap();
    assert!((average - 0.4).abs() < 1e-12);
}

#[test]
fn test_finished_epoch_fills_cache_and_ignores_unknown_keys() {
    let config = quiet_config(1);
    let driver = TrainingStepDriver::new(&config, 3);
    let mut model = FakeModel::with_losses(&[3.0, 2.0, 1.0]);
    let mut data = FakeData::new(12, 4);
    let mut cache = MetricCache::new(3, 1);
    let mut rng = StdRng::seed_from_u64(7);

    let outcome = driver
        .run_epoch(0, &mut model, &mut data, 1e-3, &mut cache, &mut rng)
        .unwrap();

    let EpochOutcome::Finished { last_batch } = outcome else {
        panic!("expected a finished epoch");
    };
    assert_eq!(last_batch.unwrap().dim(), (4, 4, 4, 3));
    assert_eq!(cache.average(Metric::Loss, Split::Training), Some(2.0));
    assert_eq!(cache.average(Metric::Ssim, Split::Training), Some(0.5));
    assert_eq!(cache.len(Metric::Entropy, Split::Training), 3);
    assert!(cache.is_empty(Metric::Loss, Split::Validation));
}

#[test]
fn test_second_epoch_rolls_training_cache() {
    let config = quiet_config(2);
    let driver = TrainingStepDriver::new(&config, 2);
    let mut model = FakeModel::with_losses(&[4.0, 4.0, 1.0, 3.0]);
    let mut data = FakeData::new(8, 4);
    let mut cache = MetricCache::new(2, 1);
    let mut rng = StdRng::seed_from_u64(1);

    for epoch in 0..2 {
        driver
            .run_epoch(epoch, &mut model, &mut data, 1e-3, &mut cache, &mut rng)
            .unwrap();
    }
    assert_eq!(cache.len(Metric::Loss, Split::Training), 2);
    assert_eq!(cache.average(Metric::Loss, Split::Training), Some(2.0));
}

#[test]
fn test_validation_round_appends_one_entry_per_metric() {
    let config = quiet_config(1);
    let evaluator = ValidationEvaluator::new(&config, 2);
    let mut model = FakeModel::new();
    let mut data = FakeData::new(4, 8);
    let quality = ScriptedQuality::new(vec![0.6, 0.8], 4);
    let mut cache = MetricCache::new(1, 2);
    let mut performance = PerformanceLog::new();

    let round = evaluator
        .evaluate(&mut model, &mut data, &quality, &mut cache, &mut performance)
        .unwrap();

    assert_eq!(round.batch.dim(), (4, 4, 4, 3));
    assert_eq!(round.reconstruction, round.batch);
    for metric in Metric::ALL {
        assert_eq!(performance.series(metric, Split::Validation).len(), 1);
        assert!(performance.series(metric, Split::Training).is_empty());
    }
    let ssim = performance.last(Metric::Ssim, Split::Validation).unwrap();
    assert!((ssim - 0.7).abs() < 1e-12);
}
