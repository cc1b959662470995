mod common;

use common::{case, date, request, rule, Fixture};
use dossier_export::core::export::{sha256_hex, ExportOutcome};
use dossier_export::domain::model::ExportStatus;
use dossier_export::{ExportError, ExportOrchestrator};

fn committed(outcome: ExportOutcome) -> dossier_export::core::export::CommittedBatch {
    match outcome {
        ExportOutcome::Committed(committed) => committed,
        ExportOutcome::NothingToExport { .. } => panic!("expected a committed batch"),
    }
}

#[test]
fn test_letter_code_export_end_to_end() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    fixture.seed_rules(&ledger);

    ledger.upsert_case(&case(1, "ACME", "at", "")).unwrap();
    ledger.upsert_case(&case(2, "ACME", "A", "")).unwrap();
    let mut unvalidated = case(3, "ACME", "T", "");
    unvalidated.validated_on = None;
    ledger.upsert_case(&unvalidated).unwrap();
    ledger.upsert_case(&case(4, "BANQ", "A", "Adresse")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let result = committed(orchestrator.export_batch(&mut ledger, &request("ACME")).unwrap());
    let batch = &result.batch;

    assert_eq!(batch.filename, "ACME_RETOUR_V1_20240331_001.txt");
    assert_eq!(batch.case_ids, vec![1, 2]);
    assert_eq!(batch.total_amount.to_string(), "30.00");
    assert_eq!(batch.byte_size, 2 * 258);
    assert!(result.deferred.is_empty());

    let content = std::fs::read(fixture.output_dir().join(&batch.filename)).unwrap();
    assert_eq!(content.len() as u64, batch.byte_size);
    assert_eq!(sha256_hex(&content), batch.checksum);

    let first = &content[..258];
    assert_eq!(&first[0..2], b"RE");
    assert_eq!(&first[2..22], b"CLI-0001            ");
    assert_eq!(&first[22..32], b"0000000001");
    assert_eq!(&first[32..40], b"LEF\xC8VRE ");
    assert_eq!(&first[215..223], b"15032024");
    assert_eq!(&first[231..235], b"at  ");
    assert_eq!(&first[235..245], b"+000002200");
    assert_eq!(&first[245..256], b"           ");
    assert_eq!(&first[256..], b"\r\n");
    assert_eq!(&content[258 + 235..258 + 245], b"+000000800");
    assert!(content.ends_with(b"\r\n"));

    for id in [1, 2] {
        let stored = ledger.case(id).unwrap().unwrap();
        assert_eq!(stored.export_status, ExportStatus::Exported);
        assert_eq!(stored.export_batch_id, Some(batch.id));
    }
    assert_eq!(ledger.case(3).unwrap().unwrap().export_status, ExportStatus::Pending);
    assert_eq!(ledger.case(4).unwrap().unwrap().export_status, ExportStatus::Pending);

    let lines = ledger.batch_lines(batch.id).unwrap();
    assert_eq!(lines[0].amount.to_string(), "22.00");
    assert_eq!(lines[1].amount.to_string(), "8.00");
}

#[test]
fn test_second_run_selects_nothing() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    fixture.seed_rules(&ledger);
    ledger.upsert_case(&case(1, "ACME", "A", "")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    committed(orchestrator.export_batch(&mut ledger, &request("ACME")).unwrap());

    let second = orchestrator.export_batch(&mut ledger, &request("ACME")).unwrap();
    assert!(matches!(
        second,
        ExportOutcome::NothingToExport { ref deferred } if deferred.is_empty()
    ));
    assert_eq!(ledger.batches(None).unwrap().len(), 1);
    assert_eq!(fixture.output_files().len(), 1);
}

#[test]
fn test_encoding_failures_abort_the_whole_batch() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    fixture.seed_rules(&ledger);

    ledger.upsert_case(&case(1, "ACME", "A", "")).unwrap();
    let mut too_long = case(2, "ACME", "A", "");
    too_long.surname = "X".repeat(31);
    ledger.upsert_case(&too_long).unwrap();
    let mut undated = case(3, "ACME", "T", "");
    undated.result_date = None;
    ledger.upsert_case(&undated).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let err = orchestrator
        .export_batch(&mut ledger, &request("ACME"))
        .unwrap_err();

    match err {
        ExportError::BatchRejected { tenant, failures } => {
            assert_eq!(tenant, "ACME");
            let ids: Vec<i64> = failures.iter().map(|f| f.case_id).collect();
            assert_eq!(ids, vec![2, 3]);
            assert!(matches!(
                failures[0].error,
                ExportError::FieldOverflow { width: 30, length: 31, .. }
            ));
            assert!(matches!(
                failures[1].error,
                ExportError::MissingRequiredField { ref field } if field == "result_date"
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    for id in [1, 2, 3] {
        assert_eq!(ledger.case(id).unwrap().unwrap().export_status, ExportStatus::Pending);
    }
    assert!(ledger.batches(None).unwrap().is_empty());
    assert!(fixture.output_files().is_empty());
}

#[test]
fn test_missing_tariff_blocks_by_default() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    fixture.seed_rules(&ledger);
    ledger.upsert_case(&case(1, "ACME", "A", "")).unwrap();
    ledger.upsert_case(&case(2, "ACME", "Z", "")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let err = orchestrator
        .export_batch(&mut ledger, &request("ACME"))
        .unwrap_err();

    let ExportError::BatchRejected { failures, .. } = err else {
        panic!("expected a rejected batch");
    };
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].error,
        ExportError::TariffNotFound { ref code, .. } if code == "Z"
    ));
    assert_eq!(ledger.case(1).unwrap().unwrap().export_status, ExportStatus::Pending);
}

#[test]
fn test_expired_tariff_is_not_a_silent_zero() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    let mut expired = rule(Some("ACME"), "A", None, "8.00");
    expired.valid_to = Some(date("2024-02-29"));
    ledger.insert_tariff_rule(&expired).unwrap();
    ledger.upsert_case(&case(1, "ACME", "A", "")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let err = orchestrator
        .export_batch(&mut ledger, &request("ACME"))
        .unwrap_err();
    assert!(matches!(err, ExportError::BatchRejected { .. }));
}

#[test]
fn test_advisory_tenant_defers_unpriced_cases() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    fixture.seed_rules(&ledger);

    ledger
        .upsert_case(&case(10, "BANQ", "", "Adresse et Téléphone"))
        .unwrap();
    ledger.upsert_case(&case(11, "BANQ", "E", "Employeur")).unwrap();
    ledger.upsert_case(&case(12, "BANQ", "", "adresse seule")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let result = committed(orchestrator.export_batch(&mut ledger, &request("BANQ")).unwrap());

    assert_eq!(result.batch.case_ids, vec![10, 12]);
    assert_eq!(result.batch.total_amount.to_string(), "30.00");
    assert_eq!(result.deferred.len(), 1);
    assert_eq!(result.deferred[0].case_id, 11);
    assert!(matches!(
        result.deferred[0].error,
        ExportError::TariffNotFound { ref request_key, .. } if request_key.is_none()
    ));

    assert_eq!(ledger.case(11).unwrap().unwrap().export_status, ExportStatus::Pending);
}

#[test]
fn test_free_text_tenant_without_keywords_explains_missing_tariff() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    ledger
        .insert_tariff_rule(&rule(Some("BANQ"), "X", Some("ADDRESS"), "9.00"))
        .unwrap();
    ledger.upsert_case(&case(20, "BANQ", "x", "Adresse")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let outcome = orchestrator.export_batch(&mut ledger, &request("BANQ")).unwrap();

    let ExportOutcome::NothingToExport { deferred } = outcome else {
        panic!("nothing should be committed");
    };
    assert_eq!(deferred.len(), 1);
    match &deferred[0].error {
        ExportError::TariffNotFound {
            request_key, note, ..
        } => {
            assert_eq!(request_key, &None);
            assert!(note.as_deref().unwrap().contains("no request keywords"));
        }
        other => panic!("expected a missing tariff, got {:?}", other),
    }
    assert!(deferred[0].to_string().contains("no request keywords configured"));
}

#[test]
fn test_advisory_tenant_with_only_deferred_cases_exports_nothing() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    fixture.seed_rules(&ledger);
    ledger.upsert_case(&case(11, "BANQ", "E", "Employeur")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let outcome = orchestrator.export_batch(&mut ledger, &request("BANQ")).unwrap();

    match outcome {
        ExportOutcome::NothingToExport { deferred } => assert_eq!(deferred.len(), 1),
        ExportOutcome::Committed(_) => panic!("nothing should be committed"),
    }
    assert!(ledger.batches(None).unwrap().is_empty());
    assert!(fixture.output_files().is_empty());
}

#[test]
fn test_default_tenant_falls_back_to_legacy_tariffs() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    fixture.seed_rules(&ledger);
    ledger.upsert_case(&case(1, "ACME", "l", "")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let result = committed(orchestrator.export_batch(&mut ledger, &request("ACME")).unwrap());
    assert_eq!(result.batch.total_amount.to_string(), "5.00");
}

#[test]
fn test_reset_then_reexport_creates_a_new_batch() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();
    fixture.seed_rules(&ledger);
    ledger.upsert_case(&case(1, "ACME", "A", "")).unwrap();
    ledger.upsert_case(&case(2, "ACME", "T", "")).unwrap();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let first = committed(orchestrator.export_batch(&mut ledger, &request("ACME")).unwrap());

    let resets = ledger
        .reset_export_status(&[2], "supervisor", "client lost the file")
        .unwrap();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].batch_id, first.batch.id);

    let second = committed(orchestrator.export_batch(&mut ledger, &request("ACME")).unwrap());
    assert_eq!(second.batch.case_ids, vec![2]);
    assert_eq!(second.batch.filename, "ACME_RETOUR_V1_20240331_002.txt");
    assert_eq!(second.batch.total_amount.to_string(), "14.00");

    // 第一批的紀錄不受影響
    assert_eq!(ledger.batch(first.batch.id).unwrap().case_ids, vec![1, 2]);
    assert_eq!(ledger.resets(2).unwrap().len(), 1);
    assert_eq!(fixture.output_files().len(), 2);
}

#[test]
fn test_unknown_tenant_is_a_configuration_error() {
    let fixture = Fixture::new();
    let mut ledger = fixture.ledger();

    let orchestrator = ExportOrchestrator::new(&fixture.config, &fixture.storage);
    let err = orchestrator
        .export_batch(&mut ledger, &request("NOPE"))
        .unwrap_err();
    assert!(matches!(err, ExportError::InvalidConfigValueError { .. }));
}
