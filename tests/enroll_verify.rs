mod common;

use common::*;
use std::sync::Arc;
use tempfile::TempDir;
use votergate::common::{CaptureFailure, Config, GateError};
use votergate::core::{EnrolledTemplateStore, ReceiptSigner, VoterGate};
use votergate::storage::FileTemplateStore;

const CHALLENGE: &[u8] = b"ballot-2026-precinct-17";

fn gate(dir: &TempDir, extractor: Arc<ScriptedExtractor>) -> VoterGate<FileTemplateStore> {
    let store = FileTemplateStore::new(dir.path()).unwrap();
    let signer = ReceiptSigner::new(&[7u8; 32]).unwrap();
    VoterGate::new(&Config::default(), extractor, store, signer).unwrap()
}

#[tokio::test(start_paused = true)]
async fn enrolled_voter_is_verified_with_a_signed_receipt() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(ScriptedExtractor::new(vec![1.0, 0.0]));
    let gate = gate(&dir, extractor.clone());
    let announcer = RecordingAnnouncer::new();

    let registration = gate.register("voter-001", &mut MovingSource::new(), &announcer).await.unwrap();
    assert_eq!(registration.user_id, "voter-001");
    assert_eq!(registration.result.sample_count, 7);
    assert_eq!(gate.store().fetch("voter-001").unwrap(), registration.result.embedding);
    assert_eq!(announcer.texts().last().map(String::as_str), Some("Registration complete"));

    let verification = gate
        .verify("voter-001", CHALLENGE, &mut MovingSource::new(), &announcer)
        .await
        .unwrap();

    assert!(verification.comparison.is_match);
    assert!(verification.comparison.similarity > 0.99);
    assert_eq!(verification.comparison.threshold, 0.75);
    assert_eq!(verification.receipt.user_id, "voter-001");
    assert_eq!(verification.receipt.challenge, CHALLENGE);
    assert!(gate.signer().verify(&verification.receipt));
    assert_eq!(extractor.calls(), 14);
    assert_eq!(announcer.texts().last().map(String::as_str), Some("Identity verified"));

    let other_signer = ReceiptSigner::new(&[9u8; 32]).unwrap();
    assert!(!other_signer.verify(&verification.receipt));
}

#[tokio::test(start_paused = true)]
async fn different_face_is_rejected_but_still_receipted() {
    let dir = TempDir::new().unwrap();
    let enrolling = gate(&dir, Arc::new(ScriptedExtractor::new(vec![1.0, 0.0])));
    enrolling
        .register("voter-002", &mut MovingSource::new(), &RecordingAnnouncer::new())
        .await
        .unwrap();

    let impostor = gate(&dir, Arc::new(ScriptedExtractor::new(vec![0.0, 1.0])));
    let announcer = RecordingAnnouncer::new();
    let verification = impostor
        .verify("voter-002", CHALLENGE, &mut MovingSource::new(), &announcer)
        .await
        .unwrap();

    assert!(!verification.comparison.is_match);
    assert!(verification.comparison.similarity < 0.75);
    assert!(!verification.receipt.is_match);
    assert!(impostor.signer().verify(&verification.receipt));
    assert_eq!(announcer.assertive(), vec!["Identity could not be verified".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn unknown_voter_never_opens_the_camera() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(ScriptedExtractor::new(vec![1.0, 0.0]));
    let gate = gate(&dir, extractor.clone());
    let mut source = MovingSource::new();
    let counters = source.counters.clone();

    let err = gate
        .verify("nobody", CHALLENGE, &mut source, &RecordingAnnouncer::new())
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::TemplateNotFound(ref user) if user == "nobody"));
    assert_eq!(counters.acquired(), 0);
    assert_eq!(counters.frames(), 0);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn photo_held_to_the_camera_fails_liveness() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(ScriptedExtractor::new(vec![1.0, 0.0]));
    let gate = gate(&dir, extractor.clone());
    let mut source = MovingSource::frozen();
    let counters = source.counters.clone();

    let err = gate
        .register("voter-003", &mut source, &RecordingAnnouncer::new())
        .await
        .unwrap_err();

    match &err {
        GateError::Capture(CaptureFailure::Liveness { sample_index, reason }) => {
            assert_eq!(*sample_index, 2);
            assert!(reason.contains("no motion"), "{}", reason);
        }
        other => panic!("expected liveness failure, got {other}"),
    }
    assert!(err.to_string().starts_with("Liveness check failed during capture 2"));
    assert_eq!(extractor.calls(), 1);
    assert_eq!(counters.released(), 1);
    assert!(matches!(gate.store().fetch("voter-003"), Err(GateError::TemplateNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn failed_verification_leaves_the_template_untouched() {
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(ScriptedExtractor::new(vec![1.0, 0.0]));
    let gate = gate(&dir, extractor);
    gate.register("voter-004", &mut MovingSource::new(), &RecordingAnnouncer::new())
        .await
        .unwrap();
    let enrolled = gate.store().fetch("voter-004").unwrap();

    let err = gate
        .verify("voter-004", CHALLENGE, &mut MovingSource::frozen(), &RecordingAnnouncer::new())
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::Capture(CaptureFailure::Liveness { .. })));
    assert_eq!(gate.store().fetch("voter-004").unwrap(), enrolled);
}

#[tokio::test(start_paused = true)]
async fn template_that_averages_to_zero_is_never_enrolled() {
    let dir = TempDir::new().unwrap();
    // Six opposite samples cancel the first one out exactly
    let mut extractor = ScriptedExtractor::new(vec![-1.0, 0.0]).with_embedding_at(1, vec![6.0, 0.0]);
    for sample in 2..=7 {
        extractor = extractor.with_embedding_at(sample, vec![-1.0, 0.0]);
    }
    let gate = gate(&dir, Arc::new(extractor));

    let err = gate
        .register("voter-005", &mut MovingSource::new(), &RecordingAnnouncer::new())
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::Capture(CaptureFailure::Aggregation(_))));
    assert!(err.to_string().contains("averaged embedding has zero magnitude"), "{}", err);
    assert!(matches!(gate.store().fetch("voter-005"), Err(GateError::TemplateNotFound(_))));
}
