//! Property tests over the bundled models.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use chrono::NaiveDate;
use proptest::prelude::*;

use ckd_sentinel::adapters::{FsArtifactSource, SignaturePolicy};
use ckd_sentinel::application::KnownConditions;
use ckd_sentinel::domain::StageThresholds;
use ckd_sentinel::{CkdStage, LabObservation, ModelBundle, PredictionService, Sex};

fn service() -> &'static PredictionService {
    static SERVICE: OnceLock<PredictionService> = OnceLock::new();
    SERVICE.get_or_init(|| {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models");
        let source = FsArtifactSource::open(dir, &SignaturePolicy::default()).expect("model dir opens");
        PredictionService::new(Arc::new(ModelBundle::load(&source).expect("bundled models load")))
    })
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date")
}

fn sex() -> impl Strategy<Value = Sex> {
    prop_oneof![Just(Sex::Male), Just(Sex::Female)]
}

proptest! {
    #[test]
    fn prop_egfr_falls_as_creatinine_rises(
        scr in 0.3f64..14.0,
        bump in 0.05f64..5.0,
        age in 18.0f64..95.0,
        cys in proptest::option::of(0.5f64..6.0),
        sex in sex(),
    ) {
        let mut low = LabObservation::new(date(), scr, sex).with_age(age);
        low.cystatin_c = cys;
        let mut high = low.clone();
        high.serum_creatinine = Some(scr + bump);

        let (_, a) = service().predict_with_audit(&low, KnownConditions::default()).expect("prediction");
        let (_, b) = service().predict_with_audit(&high, KnownConditions::default()).expect("prediction");
        prop_assert!(b.raw_egfr < a.raw_egfr, "{} then {}", a.raw_egfr, b.raw_egfr);
    }

    #[test]
    fn prop_every_egfr_has_one_stage(egfr in -50.0f64..400.0) {
        let thresholds = StageThresholds::default();
        let stage = thresholds.stage_for(egfr);
        let matching = CkdStage::ALL
            .iter()
            .filter(|s| {
                let (lo, hi) = thresholds.band(**s);
                egfr >= lo && egfr < hi
            })
            .count();
        prop_assert_eq!(matching, 1);
        let (lo, hi) = thresholds.band(stage);
        prop_assert!(egfr >= lo && egfr < hi);
    }

    #[test]
    fn prop_attributions_add_up(
        scr in 0.3f64..15.0,
        age in proptest::option::of(18.0f64..95.0),
        bp in proptest::option::of((95.0f64..190.0, 10.0f64..40.0)),
        sex in sex(),
    ) {
        let mut obs = LabObservation::new(date(), scr, sex);
        obs.age = age;
        if let Some((sys, gap)) = bp {
            obs = obs.with_blood_pressure(sys, sys - gap);
        }
        let (result, audit) = service()
            .predict_with_audit(&obs, KnownConditions::default())
            .expect("prediction");
        let total: f64 = audit.all_attributions.iter().map(|a| a.importance).sum();
        let reconstructed = result.attribution_base_value + total;
        prop_assert!(
            (reconstructed - audit.raw_egfr).abs() <= 1e-6 * audit.raw_egfr.abs().max(1.0),
            "{} vs {}", reconstructed, audit.raw_egfr
        );
        prop_assert!((0.0..=1.0).contains(&result.egfr_confidence));
        prop_assert!((0.0..=200.0).contains(&result.egfr_predicted));
    }
}
