use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use sgca_adapters::{AdapterRegistry, AdapterSettings};
use sgca_core::{FixedClock, ObligationCode, Source, YearMonth};
use sgca_storage::{HttpClient, HttpClientConfig};
use sgca_sync::{
    memory_store_for, CheckAction, CompanyMap, SlaType, SourceSelection, SyncConfig,
    SyncErrorKind, SyncOrchestrator, SyncRequest,
};

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

#[tokio::test]
async fn sample_company_map_and_fixtures_sync_offline() {
    let root = workspace_root();
    let companies = CompanyMap::load(&root.join("company_map.yaml")).await.unwrap();
    assert_eq!(companies.len(), 5);
    let store = Arc::new(memory_store_for(&companies));

    let settings = AdapterSettings {
        fixtures_dir: Some(root.join("fixtures")),
        ..Default::default()
    };
    let http = Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap());
    let registry = AdapterRegistry::from_settings(&settings, &http);
    let clock = FixedClock(Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap());
    let orchestrator = SyncOrchestrator::new(
        SyncConfig::default(),
        store.clone(),
        registry,
        companies,
        Arc::new(clock),
    );

    let result = orchestrator
        .sync_all(&SyncRequest {
            source: SourceSelection::Both,
            period: Some(YearMonth::new(2025, 1).unwrap()),
            only: None,
            dry_run: false,
            sla_type: SlaType::Monthly,
        })
        .await;

    // Legacy is disabled everywhere; the other four run.
    assert_eq!(result.companies_processed, 4);
    assert_eq!(result.companies_with_errors, 1);
    assert!(!result.success);

    let factorit = result.companies().find(|c| c.alias == "FactorIT").unwrap();
    assert_eq!(factorit.backlog.document_acceptance, 2);
    assert_eq!(factorit.backlog.bookkeeping, 0);
    assert_eq!(factorit.backlog.reconciliation, 3);
    assert_eq!(factorit.checks.created, 5);
    let digitacion = factorit.result_for(ObligationCode::DigitacionFacturas).unwrap();
    assert!(digitacion.is_completed);

    let cisi = result.companies().find(|c| c.alias == "CISI").unwrap();
    assert!(cisi.results.iter().all(|r| r.is_completed));

    let fidi = result.companies().find(|c| c.alias == "FIDI").unwrap();
    assert_eq!(fidi.source, Source::Skualo);
    assert_eq!(fidi.backlog.bookkeeping, 2);
    assert!(!fidi.has_errors());

    let latam = result.companies().find(|c| c.alias == "LATAM").unwrap();
    assert_eq!(latam.errors[0].kind, SyncErrorKind::Adapter);
    assert!(latam.errors[0].message.contains("503"));

    let snapshots = store.snapshots().await;
    assert_eq!(snapshots.len(), 3);
    let fidi_snapshot = snapshots.iter().find(|s| s.db_alias == "FIDI").unwrap();
    assert_eq!(fidi_snapshot.contabilizar_count, 2);
    assert_eq!(fidi_snapshot.period, "2025-01");

    let rerun = orchestrator
        .sync_all(&SyncRequest {
            source: SourceSelection::Odoo,
            period: Some(YearMonth::new(2025, 1).unwrap()),
            only: Some("FactorIT".into()),
            dry_run: true,
            sla_type: SlaType::Monthly,
        })
        .await;
    assert!(rerun
        .companies()
        .flat_map(|c| c.results.iter())
        .all(|r| r.action == CheckAction::Unchanged));
}
