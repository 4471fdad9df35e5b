use goalcast::calibration::{self, CalibrationParameters, PlattConfig};

const BUCKETS: [f64; 5] = [0.2, 0.35, 0.5, 0.65, 0.8];
const PER_BUCKET: usize = 100;

/// `PER_BUCKET` samples per bucket with exactly `round(PER_BUCKET * q)` hits,
/// each predicted at `predict(q)`.
fn bucketed_sample(predict: impl Fn(f64) -> f64) -> (Vec<f64>, Vec<bool>) {
    let mut raw = Vec::new();
    let mut hits = Vec::new();
    for q in BUCKETS {
        let positives = (PER_BUCKET as f64 * q).round() as usize;
        for i in 0..PER_BUCKET {
            raw.push(predict(q));
            hits.push(i < positives);
        }
    }
    (raw, hits)
}

#[test]
fn calibrated_sample_is_left_alone() {
    let (raw, hits) = bucketed_sample(|q| q);
    assert!(calibration::fit(&raw, &hits, &PlattConfig::default()).is_none());
}

#[test]
fn shifted_sample_recovers_offset() {
    let shift = 0.6;
    let (raw, hits) = bucketed_sample(|q| calibration::sigmoid(calibration::logit(q) - shift));
    let params = calibration::fit(&raw, &hits, &PlattConfig::default()).unwrap();

    assert!((params.slope - 1.0).abs() < 0.05, "slope {}", params.slope);
    assert!((params.intercept - shift).abs() < 0.05, "intercept {}", params.intercept);

    let calibrated: Vec<f64> = raw.iter().map(|p| calibration::apply(*p, &params)).collect();
    assert!(
        calibration::mean_log_loss(&calibrated, &hits) < calibration::mean_log_loss(&raw, &hits)
    );
}

#[test]
fn mismatched_lengths_are_rejected() {
    let (raw, mut hits) = bucketed_sample(|q| q);
    hits.pop();
    assert!(calibration::fit(&raw, &hits, &PlattConfig::default()).is_none());
}

#[test]
fn calibrated_probabilities_stay_inside_the_unit_interval() {
    let params = CalibrationParameters {
        slope: 4.0,
        intercept: -3.0,
    };
    let mut last = 0.0;
    for i in 0..=100 {
        let p = calibration::apply(i as f64 / 100.0, &params);
        assert!(p > 0.0 && p < 1.0);
        assert!(p >= last);
        last = p;
    }
}
