//! End-to-end inference scenarios with scripted models.

mod common;

use std::sync::Arc;

use common::{
    factory, harness, log_probabilities, png_file, Degrading, DualHead, FakeSource, Flaky, ScriptedClassifier,
};
use image::DynamicImage;
use neurolens::{
    ClassifierOutput, ImagePreprocessor, InferenceOrchestrator, Normalization, PredictionSource, TumorClass,
    TumorModel,
};

#[tokio::test]
async fn test_glioma_scenario_from_probabilities() {
    let h = harness(
        FakeSource::ok(),
        factory(ScriptedClassifier::new(vec![0.1, 0.1, 0.7, 0.1])),
        ClassifierOutput::Probabilities,
    );
    assert!(h.service.load_model().await);

    let result = h.service.analyze_image(&png_file("scan.png", 64, 48)).await.unwrap();

    assert_eq!(result.prediction, TumorClass::Glioma);
    assert!((result.confidence - 70.0).abs() <= 0.5, "confidence {}", result.confidence);
    assert_eq!(result.origin, PredictionSource::Model);
}

#[tokio::test]
async fn test_glioma_scenario_from_logits() {
    let h = harness(
        FakeSource::ok(),
        factory(ScriptedClassifier::new(log_probabilities(&[0.1, 0.1, 0.7, 0.1]))),
        ClassifierOutput::Logits,
    );

    let result = h.service.analyze_image(&png_file("scan.png", 32, 32)).await.unwrap();

    assert_eq!(result.prediction, TumorClass::Glioma);
    assert!((result.confidence - 70.0).abs() <= 0.5, "confidence {}", result.confidence);
    // Single head is also used as segmentation input; rank 2 carries no mask
    assert!(result.segmentation.is_none());
}

#[tokio::test]
async fn test_dual_head_segmentation_matches_source_size() {
    let model = DualHead {
        seg_class: 1,
        seg_size: 8,
        row: log_probabilities(&[0.05, 0.8, 0.1, 0.05]),
    };
    let h = harness(FakeSource::ok(), factory(model), ClassifierOutput::Logits);

    let result = h.service.analyze_image(&png_file("scan.png", 50, 30)).await.unwrap();

    assert_eq!(result.prediction, TumorClass::Meningioma);
    assert!((result.confidence - 80.0).abs() <= 0.5);
    let mask = result.segmentation.expect("tumor class must carry a mask");
    assert_eq!((mask.width(), mask.height()), (50, 30));
    assert_eq!(mask.image().get_pixel(0, 0).0, [255, 0, 0, 128]);
    assert_eq!(mask.covered_pixels(), 50 * 30);
}

#[tokio::test]
async fn test_no_tumor_has_no_segmentation() {
    let model = DualHead {
        seg_class: 2,
        seg_size: 4,
        row: log_probabilities(&[0.9, 0.05, 0.03, 0.02]),
    };
    let h = harness(FakeSource::ok(), factory(model), ClassifierOutput::Logits);

    let result = h.service.analyze_image(&png_file("clear.png", 24, 24)).await.unwrap();

    assert_eq!(result.prediction, TumorClass::NoTumor);
    assert!(result.segmentation.is_none());
}

#[tokio::test]
async fn test_out_of_range_index_is_unknown() {
    let h = harness(
        FakeSource::ok(),
        factory(ScriptedClassifier::new(vec![0.1, 0.1, 0.1, 0.1, 0.6])),
        ClassifierOutput::Probabilities,
    );

    let result = h.service.analyze_image(&png_file("odd.png", 16, 16)).await.unwrap();

    assert_eq!(result.prediction, TumorClass::Unknown);
    assert!((result.confidence - 60.0).abs() <= 0.5);
    assert!(result.segmentation.is_none());
    assert_eq!(result.origin, PredictionSource::Model);
}

#[tokio::test]
async fn test_load_failure_resolves_with_mock_result() {
    let h = harness(
        FakeSource::unreachable(),
        factory(ScriptedClassifier::new(vec![0.1, 0.1, 0.7, 0.1])),
        ClassifierOutput::Probabilities,
    );

    for i in 0..20 {
        let result = h
            .service
            .analyze_image(&png_file(&format!("scan-{i}.png"), 40, 20))
            .await
            .unwrap();

        assert!(TumorClass::KNOWN.contains(&result.prediction));
        assert!((70.0..=95.0).contains(&result.confidence), "confidence {}", result.confidence);
        assert_eq!(result.origin, PredictionSource::Mock);
        match &result.segmentation {
            Some(mask) => {
                assert!(result.prediction.is_tumor());
                assert_eq!((mask.width(), mask.height()), (40, 20));
            }
            None => assert_eq!(result.prediction, TumorClass::NoTumor),
        }
    }
    assert!(h.service.is_mock_mode());
    assert_eq!(h.source.fetch_count(), 1);
}

#[tokio::test]
async fn test_forward_failure_falls_back_and_releases_tensors() {
    let make: common::ModelFactory = Arc::new(|| {
        Box::new(Flaky {
            healthy_calls: 1,
            calls: 0,
        }) as Box<dyn TumorModel>
    });
    let h = harness(FakeSource::ok(), make, ClassifierOutput::Probabilities);
    assert!(h.service.load_model().await);

    let result = h.service.analyze_image(&png_file("scan.png", 16, 16)).await.unwrap();

    assert_eq!(result.origin, PredictionSource::Mock);
    assert!(h.service.is_mock_mode());
    assert_eq!(h.ledger.live(), 0);
}

#[tokio::test]
async fn test_non_finite_scores_after_warmup_fall_back() {
    let make: common::ModelFactory = Arc::new(|| {
        Box::new(Degrading {
            healthy_calls: 1,
            calls: 0,
        }) as Box<dyn TumorModel>
    });
    let h = harness(FakeSource::ok(), make, ClassifierOutput::Probabilities);
    assert!(h.service.load_model().await);
    assert!(!h.service.is_mock_mode());

    let result = h.service.analyze_image(&png_file("scan.png", 20, 20)).await.unwrap();

    assert_eq!(result.origin, PredictionSource::Mock);
    assert!((70.0..=95.0).contains(&result.confidence));
    assert!(h.service.is_mock_mode());
    assert_eq!(h.ledger.live(), 0);

    // Stays on the mock path without touching the model again
    let again = h.service.analyze_image(&png_file("scan.png", 20, 20)).await.unwrap();
    assert_eq!(again.origin, PredictionSource::Mock);
    assert_eq!(h.source.fetch_count(), 1);
}

#[tokio::test]
async fn test_tensor_hygiene_over_many_calls() {
    let h = harness(
        FakeSource::ok(),
        factory(DualHead {
            seg_class: 3,
            seg_size: 4,
            row: log_probabilities(&[0.1, 0.1, 0.1, 0.7]),
        }),
        ClassifierOutput::Logits,
    );
    assert!(h.service.load_model().await);

    let orchestrator = InferenceOrchestrator::new(
        h.service.lifecycle().clone(),
        ImagePreprocessor::new(8, Normalization::MinusOneOne),
        ClassifierOutput::Logits,
    );
    let image = DynamicImage::new_rgb8(12, 12);

    h.ledger.reset_peak();
    let first = orchestrator.infer(&image).await;
    assert_eq!(first.source, PredictionSource::Model);
    let per_call_peak = h.ledger.peak();
    let per_call_allocations = h.ledger.allocated_total();

    for _ in 1..1000 {
        let prediction = orchestrator.infer(&image).await;
        assert_eq!(prediction.prediction, TumorClass::Pituitary);
    }

    assert_eq!(h.ledger.live(), 0);
    assert_eq!(h.ledger.peak(), per_call_peak);
    assert!(h.ledger.allocated_total() >= per_call_allocations + 999);
}
