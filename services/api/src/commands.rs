use crate::infra::parse_date;
use chrono::{Local, NaiveDate};
use clap::Args;
use permit_sync::config::{AppConfig, PurchaseProfiles, PurchaseRequest};
use permit_sync::error::AppError;
use permit_sync::permit::{
    encode_payload, locate_permit_document, lookup, publisher_for, ExtractionError, FileRecordStore,
    PermitDocument, PermitExtractor, PermitSyncPipeline, PermitView, PipelineError,
    PipelineFailure, PublishStatus, RecordStore, RunOptions, RunReport, RunStage,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Receipt to process instead of the newest one in the download directory
    #[arg(long)]
    pub(crate) document: Option<PathBuf>,
    /// Extract and print only; nothing is stored or published
    #[arg(long)]
    pub(crate) parse_only: bool,
    /// Store the permit but leave publishing for a later `publish`
    #[arg(long)]
    pub(crate) no_push: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ParseArgs {
    /// Permit receipt PDF
    pub(crate) path: PathBuf,
    /// Also print the text pulled out of the PDF
    #[arg(long)]
    pub(crate) show_text: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ShowArgs {
    /// Permit number to look up in history (defaults to the current permit)
    #[arg(long)]
    pub(crate) permit: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct HistoryArgs {
    /// Write the history as CSV to stdout
    #[arg(long)]
    pub(crate) csv: bool,
}

#[derive(Args, Debug)]
pub(crate) struct PlanArgs {
    /// Vehicle number as listed by `profiles`
    #[arg(long)]
    pub(crate) vehicle: usize,
    /// Payment card number as listed by `profiles`
    #[arg(long)]
    pub(crate) card: usize,
    /// Purchase date (YYYY-MM-DD); defaults to today
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

fn open_store(config: &AppConfig) -> Arc<FileRecordStore> {
    Arc::new(FileRecordStore::new(&config.storage.data_dir))
}

fn pipeline(config: &AppConfig) -> Result<PermitSyncPipeline<FileRecordStore>, AppError> {
    let publisher = publisher_for(&config.publish)?;
    Ok(PermitSyncPipeline::new(open_store(config))
        .with_publisher(publisher)
        .with_archive_dir(&config.storage.archive_dir))
}

pub(crate) fn run_sync(config: &AppConfig, args: RunArgs) -> Result<(), AppError> {
    let RunArgs {
        document,
        parse_only,
        no_push,
    } = args;

    let pipeline = pipeline(config)?;
    let located = document.is_none();
    let document = match document {
        Some(path) => Some(path),
        None => locate_permit_document(&config.storage.download_dir)?,
    };

    let Some(path) = document else {
        if !resume_pending(&pipeline)? {
            println!(
                "No permit receipt found in {}",
                config.storage.download_dir.display()
            );
        }
        return Ok(());
    };

    println!("Processing {}", path.display());
    let options = RunOptions {
        parse_only,
        skip_publish: no_push,
    };
    match pipeline.run(&path, options) {
        Ok(report) => {
            render_report(&report, config);
            Ok(())
        }
        Err(err) => {
            if err.stage == RunStage::Publishing {
                if let Some(permit_number) = &err.permit_number {
                    println!("Permit {permit_number} is stored; run `permit-sync publish` to retry");
                }
            }
            // The download directory may hold PDFs that are not receipts.
            if located && err.stage == RunStage::Extracting && !parse_only && !no_push {
                if let Err(resume) = resume_pending(&pipeline) {
                    warn!(error = %resume, "pending permit could not be republished");
                }
            }
            Err(err.into())
        }
    }
}

/// Republishes a permit left pending by an earlier run; true if one was sent.
fn resume_pending(pipeline: &PermitSyncPipeline<FileRecordStore>) -> Result<bool, PipelineError> {
    match pipeline.resume_pending()? {
        Some((record, receipt)) => {
            println!(
                "Published pending permit {} to {}",
                record.permit_number, receipt.target
            );
            Ok(true)
        }
        None => Ok(false),
    }
}

fn render_report(report: &RunReport, config: &AppConfig) {
    let record = &report.record;
    println!(
        "Permit {} for {}: {} -> {}",
        record.permit_number, record.plate_number, record.valid_from, record.valid_to
    );
    if let Some(outcome) = report.commit {
        println!("- stored ({outcome:?})");
    }
    match &report.publish {
        PublishStatus::NotAttempted => println!("- not stored (parse only)"),
        PublishStatus::Pending if config.publish.is_enabled() => {
            println!("- publish skipped; run `permit-sync publish` to push it")
        }
        PublishStatus::Pending => println!("- no publish target configured"),
        PublishStatus::Published(receipt) => match &receipt.revision {
            Some(revision) => println!("- published to {} ({revision})", receipt.target),
            None => println!("- published to {}", receipt.target),
        },
    }
    if matches!(report.publish, PublishStatus::Published(_)) && !report.pending_cleared {
        println!("- pending marker left in place; the next run publishes again");
    }
    if let Some(archived) = &report.archived_to {
        println!("- receipt archived to {}", archived.display());
    }
    println!("Finished at stage: {}", report.stage);
}

pub(crate) fn run_parse(args: ParseArgs) -> Result<(), AppError> {
    let document = PermitDocument::from_path(&args.path).map_err(|err| PipelineError {
        stage: RunStage::Extracting,
        permit_number: None,
        source: PipelineFailure::Extraction(ExtractionError::Document(err)),
    })?;

    if args.show_text {
        println!("{}\n---", document.text());
    }

    let missing = PermitExtractor.missing_fields(document.text());
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|field| field.as_str()).collect();
        eprintln!("Missing fields: {}", names.join(", "));
    }

    let record = PermitExtractor
        .extract(&document)
        .map_err(|err| PipelineError {
            stage: RunStage::Extracting,
            permit_number: None,
            source: err.into(),
        })?;
    println!("{}", encode_payload(&record)?);
    Ok(())
}

pub(crate) fn run_publish(config: &AppConfig) -> Result<(), AppError> {
    let (record, receipt) = pipeline(config)?.republish()?;
    println!(
        "Published permit {} to {}",
        record.permit_number, receipt.target
    );
    Ok(())
}

pub(crate) fn run_show(config: &AppConfig, args: ShowArgs) -> Result<(), AppError> {
    let store = open_store(config);
    let Some(record) = lookup(store.as_ref(), args.permit.as_deref())? else {
        match args.permit {
            Some(permit) => println!("Permit {permit} is not in history"),
            None => println!("No current permit"),
        }
        return Ok(());
    };

    let current = store.get_current()?;
    let view = PermitView::new(record, current.as_ref(), Local::now().naive_local());
    render_view(&view);
    Ok(())
}

fn render_view(view: &PermitView) {
    let record = &view.record;
    let standing = if view.is_current { "current" } else { "historical" };
    println!("Permit {} ({standing})", record.permit_number);
    println!("- plate: {}", record.plate_number);
    println!("- valid: {} -> {}", record.valid_from, record.valid_to);
    println!(
        "- status: {} ({} days remaining)",
        view.status_label, view.days_remaining
    );
    if let Some(label) = &record.barcode_label {
        println!("- barcode label: {label}");
    }
    if let Some(value) = &record.barcode_value {
        println!("- barcode value: {value}");
    }
    if let Some(amount) = &record.amount_paid {
        println!("- amount paid: {amount}");
    }
}

pub(crate) fn run_history(config: &AppConfig, args: HistoryArgs) -> Result<(), AppError> {
    let store = open_store(config);
    let current = store.get_current()?;
    let now = Local::now().naive_local();
    let views: Vec<PermitView> = store
        .history()?
        .into_iter()
        .map(|record| PermitView::new(record, current.as_ref(), now))
        .collect();

    if args.csv {
        let stdout = std::io::stdout();
        write_history_csv(stdout.lock(), &views)?;
        return Ok(());
    }

    if views.is_empty() {
        println!("History is empty");
        return Ok(());
    }
    for view in &views {
        let marker = if view.is_current { "*" } else { " " };
        println!(
            "{marker} {} {} {} -> {} [{}]",
            view.record.permit_number,
            view.record.plate_number,
            view.record.valid_from,
            view.record.valid_to,
            view.status_label
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    permit_number: &'a str,
    plate_number: &'a str,
    valid_from: String,
    valid_to: String,
    barcode_label: Option<&'a str>,
    amount_paid: Option<&'a str>,
    status: &'static str,
    is_current: bool,
}

pub(crate) fn write_history_csv<W: Write>(
    writer: W,
    views: &[PermitView],
) -> Result<(), std::io::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    for view in views {
        csv.serialize(HistoryRow {
            permit_number: &view.record.permit_number,
            plate_number: &view.record.plate_number,
            valid_from: view.record.valid_from.to_string(),
            valid_to: view.record.valid_to.to_string(),
            barcode_label: view.record.barcode_label.as_deref(),
            amount_paid: view.record.amount_paid.as_deref(),
            status: view.status_label,
            is_current: view.is_current,
        })?;
    }
    csv.flush()
}

pub(crate) fn run_profiles(config: &AppConfig) -> Result<(), AppError> {
    let profiles = PurchaseProfiles::load(&config.storage.profile_dir)?;

    println!("Vehicles");
    for (position, vehicle) in profiles.vehicles.iter().enumerate() {
        println!("  {}. {} ({})", position + 1, vehicle.name, vehicle.plate);
    }
    println!("Payment cards");
    for (position, card) in profiles.cards.iter().enumerate() {
        println!(
            "  {}. {} {} exp {}",
            position + 1,
            card.card_name,
            card.masked_number(),
            card.card_expiry
        );
    }
    let address = &profiles.address;
    println!(
        "Address: {} {}, {} {}",
        address.initials, address.surname, address.street_number, address.street_name
    );
    Ok(())
}

pub(crate) fn run_plan(config: &AppConfig, args: PlanArgs) -> Result<(), AppError> {
    let profiles = PurchaseProfiles::load(&config.storage.profile_dir)?;
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let request = PurchaseRequest::prepare(&profiles, args.vehicle, args.card, today)?;

    println!("Permit purchase");
    println!(
        "- vehicle: {} ({})",
        request.vehicle.name, request.vehicle.plate
    );
    println!(
        "- card: {} {} ({})",
        request.card.card_name,
        request.card.masked_number(),
        request.card.cardholder_name
    );
    println!(
        "- address: {} {} {}",
        request.address.street_number, request.address.street_name, request.address.surname
    );
    println!("- duration: {}", request.address.permit_duration);
    println!("- start date: {}", request.start_date_field());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use permit_sync::config::{
        AppEnvironment, PublishTarget, ServerConfig, StorageConfig, TelemetryConfig,
    };
    use permit_sync::permit::{commit, PermitRecord, PermitTimestamp};
    use std::path::Path;

    fn record(permit_number: &str) -> PermitRecord {
        PermitRecord {
            permit_number: permit_number.to_string(),
            plate_number: "ABC123".to_string(),
            valid_from: PermitTimestamp::parse("Nov 7, 2025: 18:00").expect("from"),
            valid_to: PermitTimestamp::parse("Nov 14, 2025: 17:59").expect("to"),
            barcode_value: Some("6151625".to_string()),
            barcode_label: Some("00435".to_string()),
            amount_paid: None,
        }
    }

    #[test]
    fn history_csv_has_header_and_one_row_per_permit() {
        let now = NaiveDateTime::parse_from_str("2025-11-20 08:00", "%Y-%m-%d %H:%M")
            .expect("now");
        let current = record("T2");
        let views = vec![
            PermitView::new(record("T1"), Some(&current), now),
            PermitView::new(current.clone(), Some(&current), now),
        ];

        let mut buffer = Vec::new();
        write_history_csv(&mut buffer, &views).expect("write csv");
        let output = String::from_utf8(buffer).expect("utf8");
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(
            lines[0],
            "permit_number,plate_number,valid_from,valid_to,barcode_label,amount_paid,status,is_current"
        );
        assert_eq!(
            lines[1],
            "T1,ABC123,\"Nov 7, 2025: 18:00\",\"Nov 14, 2025: 17:59\",00435,,Expired,false"
        );
        assert!(lines[2].ends_with(",Expired,true"));
        assert_eq!(lines.len(), 3);
    }

    fn config_in(root: &Path) -> AppConfig {
        AppConfig {
            environment: AppEnvironment::Test,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                ansi: false,
            },
            storage: StorageConfig {
                data_dir: root.join("data"),
                download_dir: root.join("downloads"),
                archive_dir: root.join("archive"),
                profile_dir: root.to_path_buf(),
            },
            publish: PublishTarget::Directory(root.join("www")),
        }
    }

    /// A permit left pending by a failed publish, next to an unrelated PDF.
    fn pending_permit_beside_statement(config: &AppConfig) -> FileRecordStore {
        std::fs::create_dir_all(&config.storage.download_dir).expect("downloads dir");
        std::fs::write(
            config.storage.download_dir.join("statement.pdf"),
            b"bank statement, not a permit",
        )
        .expect("stray pdf");

        let store = FileRecordStore::new(&config.storage.data_dir);
        commit(&store, &record("T6151625")).expect("commit");
        store.mark_pending_publish("T6151625").expect("mark pending");
        store
    }

    #[test]
    fn stray_pdf_in_downloads_does_not_block_pending_publish() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = config_in(root.path());
        let store = pending_permit_beside_statement(&config);

        let error = run_sync(&config, RunArgs::default()).expect_err("statement is not a permit");
        assert!(matches!(
            error,
            AppError::Pipeline(PipelineError {
                stage: RunStage::Extracting,
                ..
            })
        ));

        assert_eq!(store.pending_publish().expect("pending"), None);
        let published = std::fs::read_to_string(root.path().join("www").join("permit.json"))
            .expect("pending permit published");
        assert!(published.contains("T6151625"));
    }

    #[test]
    fn explicit_document_failure_leaves_pending_alone() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = config_in(root.path());
        let store = pending_permit_beside_statement(&config);

        let args = RunArgs {
            document: Some(config.storage.download_dir.join("statement.pdf")),
            ..RunArgs::default()
        };
        run_sync(&config, args).expect_err("statement is not a permit");

        assert_eq!(
            store.pending_publish().expect("pending"),
            Some("T6151625".to_string())
        );
        assert!(!root.path().join("www").join("permit.json").exists());
    }
}
