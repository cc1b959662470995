use anyhow::Context;
use clap::Parser;
use dossier_export::adapters::import;
use dossier_export::config::cli::{Cli, Command};
use dossier_export::core::export::{ExportOutcome, ExportRequest};
use dossier_export::domain::model::TenantId;
use dossier_export::utils::error::{CaseFailure, ErrorSeverity};
use dossier_export::utils::logger;
use dossier_export::{
    ExportConfig, ExportError, ExportOrchestrator, KeywordDetector, Ledger, LocalStorage,
};
use std::fs::File;

fn main() {
    let cli = Cli::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting dossier-export");
    if cli.verbose {
        tracing::debug!("CLI arguments: {:?}", cli);
    }

    if let Err(e) = run(&cli) {
        let exit_code = match e.downcast_ref::<ExportError>() {
            Some(export_error) => {
                // 記錄詳細錯誤信息
                tracing::error!(
                    "❌ {} (Category: {:?}, Severity: {:?})",
                    export_error,
                    export_error.category(),
                    export_error.severity()
                );
                tracing::error!("💡 Recovery suggestion: {}", export_error.recovery_suggestion());

                eprintln!("❌ {}", export_error.user_friendly_message());
                if let ExportError::BatchRejected { failures, .. } = export_error {
                    print_failures(failures);
                }
                eprintln!("💡 建議: {}", export_error.recovery_suggestion());

                // 根據錯誤嚴重程度決定退出碼
                match export_error.severity() {
                    ErrorSeverity::Low => 0,
                    ErrorSeverity::Medium => 2,
                    ErrorSeverity::High => 1,
                    ErrorSeverity::Critical => 3,
                }
            }
            None => {
                tracing::error!("❌ {:#}", e);
                eprintln!("❌ {:#}", e);
                1
            }
        };

        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = ExportConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let mut ledger = Ledger::open(&config.export.database_path, config.busy_timeout())?;
    let storage = LocalStorage::new(&config.export.output_path);
    let orchestrator = ExportOrchestrator::new(&config, &storage);

    match &cli.command {
        Command::Export {
            tenant,
            as_of,
            operator,
        } => {
            let request = ExportRequest {
                tenant: TenantId::new(tenant),
                as_of: as_of.unwrap_or_else(|| chrono::Local::now().date_naive()),
                operator: operator.clone().unwrap_or_else(|| config.operator()),
            };

            match orchestrator.export_batch(&mut ledger, &request)? {
                ExportOutcome::Committed(committed) => {
                    let batch = &committed.batch;
                    println!("✅ Batch {} exported", batch.id);
                    println!("📁 {}", committed.location);
                    println!(
                        "   {} case(s), {} bytes, total {}",
                        batch.case_count, batch.byte_size, batch.total_amount
                    );
                    println!("   sha256 {}", batch.checksum);
                    print_deferred(&committed.deferred);
                }
                ExportOutcome::NothingToExport { deferred } => {
                    println!("📭 Nothing to export for {}", request.tenant);
                    print_deferred(&deferred);
                }
            }
        }

        Command::Batches { tenant, json } => {
            let tenant = tenant.as_deref().map(TenantId::new);
            let batches = orchestrator.batches(&ledger, tenant.as_ref())?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&batches).map_err(ExportError::from)?);
                return Ok(());
            }
            if batches.is_empty() {
                println!("No export batch recorded");
            }
            for batch in batches {
                println!(
                    "{:>6}  {}  {:<40}  {:>5} case(s)  {:>12}  {}  by {}",
                    batch.id,
                    batch.as_of,
                    batch.filename,
                    batch.case_count,
                    batch.total_amount,
                    batch.created_at.format("%Y-%m-%d %H:%M:%S"),
                    batch.operator
                );
            }
        }

        Command::Restore { batch } => {
            let restored = orchestrator.restore_artifact(&ledger, *batch)?;
            if restored.regenerated {
                println!("♻️ {} regenerated and verified", restored.batch.filename);
            } else {
                println!("✅ {} verified", restored.batch.filename);
            }
        }

        Command::Reset {
            cases,
            reason,
            operator,
        } => {
            let operator = operator.clone().unwrap_or_else(|| config.operator());
            let resets = ledger.reset_export_status(cases, &operator, reason)?;
            for reset in &resets {
                println!(
                    "🔓 Case {} returned to pending (was in batch {})",
                    reset.case_id, reset.batch_id
                );
            }
            if resets.len() < cases.len() {
                println!(
                    "⚠️ {} case(s) were not exported and were left untouched",
                    cases.len() - resets.len()
                );
            }
        }

        Command::Detect { tenant, text } => {
            let tenant = TenantId::new(tenant);
            let snapshot = ledger.load_snapshot(&tenant, false)?;
            let detection = KeywordDetector::new(tenant.clone(), &snapshot.keywords).detect(text);

            if !detection.rules_configured {
                println!("⚠️ No request keywords configured for {}", tenant);
            } else if detection.codes.is_empty() {
                println!("No request code detected");
            } else {
                let codes: Vec<&str> = detection.codes.iter().map(|c| c.as_str()).collect();
                println!("{}", codes.join(", "));
            }
        }

        Command::Import {
            cases,
            tariffs,
            keywords,
        } => {
            if let Some(path) = keywords {
                let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
                import::import_keywords(&ledger, file)?;
            }
            if let Some(path) = tariffs {
                let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
                import::import_tariffs(&ledger, file)?;
            }
            if let Some(path) = cases {
                let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
                import::import_cases(&ledger, file)?;
            }
        }
    }

    Ok(())
}

fn print_failures(failures: &[CaseFailure]) {
    for failure in failures {
        eprintln!("   - {}", failure);
    }
}

fn print_deferred(deferred: &[CaseFailure]) {
    if deferred.is_empty() {
        return;
    }
    println!("⚠️ {} case(s) left pending for manual reconciliation:", deferred.len());
    for failure in deferred {
        println!("   - {}", failure);
    }
}
