use std::sync::Arc;

use approx::assert_abs_diff_eq;
use remix_core::{
    io::settings::PROCESSING_RATE_KEY, separation::estimator::PROGRESS_CAP, JsonFileStore,
    MemoryStore, PersistentStore, TimeEstimator,
};
use tempfile::tempdir;

#[test]
fn first_use_defaults_to_unit_rate() {
    let est = TimeEstimator::new(Arc::new(MemoryStore::new()));
    assert_eq!(est.rate(), 1.0);
    assert_abs_diff_eq!(est.estimate_total(180.0), 180.0, epsilon = 1e-9);
}

#[test]
fn slow_first_run_raises_rate() {
    let store = Arc::new(MemoryStore::new());
    let est = TimeEstimator::new(store.clone());
    assert_abs_diff_eq!(est.estimate_total(180.0), 180.0, epsilon = 1e-9);

    est.observe(360.0, 180.0);
    assert_abs_diff_eq!(est.rate(), 1.2, epsilon = 1e-9);
    assert_abs_diff_eq!(
        store.get_f64(PROCESSING_RATE_KEY).unwrap(),
        1.2,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(est.estimate_total(180.0), 216.0, epsilon = 1e-9);
}

#[test]
fn repeated_observations_converge() {
    let est = TimeEstimator::new(Arc::new(MemoryStore::new()));
    let mut last_gap = f64::MAX;
    for _ in 0..60 {
        est.observe(90.0, 30.0);
        let gap = (est.rate() - 3.0).abs();
        assert!(gap <= last_gap);
        last_gap = gap;
    }
    assert_abs_diff_eq!(est.rate(), 3.0, epsilon = 1e-4);
}

#[test]
fn zero_duration_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    let est = TimeEstimator::new(store.clone());
    est.observe(100.0, 0.0);
    est.observe(100.0, -5.0);
    assert_eq!(est.rate(), 1.0);
    assert!(store.get(PROCESSING_RATE_KEY).is_none());
}

#[test]
fn progress_is_capped_below_completion() {
    assert_abs_diff_eq!(TimeEstimator::progress(10.0, 100.0), 0.1, epsilon = 1e-12);
    assert_eq!(TimeEstimator::progress(99.0, 100.0), PROGRESS_CAP);
    assert_eq!(TimeEstimator::progress(500.0, 100.0), PROGRESS_CAP);
    assert_eq!(TimeEstimator::remaining(150.0, 100.0), 0.0);
    assert_abs_diff_eq!(TimeEstimator::remaining(40.0, 100.0), 60.0, epsilon = 1e-12);
}

#[test]
fn rate_survives_restart_through_settings_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("settings.json");
    {
        let est = TimeEstimator::new(Arc::new(JsonFileStore::open(&path)));
        est.observe(360.0, 180.0);
    }
    let est = TimeEstimator::new(Arc::new(JsonFileStore::open(&path)));
    assert_abs_diff_eq!(est.rate(), 1.2, epsilon = 1e-9);
}

#[test]
fn corrupt_settings_file_starts_fresh() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("settings.json");
    std::fs::write(&path, "][").unwrap();
    let est = TimeEstimator::new(Arc::new(JsonFileStore::open(&path)));
    assert_eq!(est.rate(), 1.0);
}
