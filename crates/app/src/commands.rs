//! CLI command implementations (classify, train, stats)

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ledgerlens_core::{non_blank, AccountInfo, Amount, ImportSource, ResolvedClassification, TransactionRecord};
use ledgerlens_engine::config::default_data_dir;
use ledgerlens_engine::{
    CategoryTypeResolver, ClassifierStore, DetectionCoordinator, DetectionInput, EngineConfig,
};
use ledgerlens_model::ModelError;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Rows ─────────────────────────────────────────────────────────────────────

/// One CSV input row. Every column is optional; unknown columns are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputRow {
    pub merchant: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub channel: Option<String>,
    pub indicator: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub import_source: Option<String>,
    pub account_type: Option<String>,
    pub account_subtype: Option<String>,
    pub currency: Option<String>,
}

fn owned(value: &Option<String>) -> Option<String> {
    non_blank(value.as_deref()).map(|s| s.trim().to_string())
}

impl InputRow {
    /// `line` is the CSV line number, used in warnings.
    pub fn to_record(&self, line: usize) -> TransactionRecord {
        let amount = non_blank(self.amount.as_deref()).and_then(|raw| match Amount::parse(raw) {
            Ok(amount) => Some(amount),
            Err(e) => {
                tracing::warn!(line, "ignoring amount '{raw}': {e}");
                None
            }
        });
        let import_source = non_blank(self.import_source.as_deref()).and_then(|s| s.parse::<ImportSource>().ok());
        let account = AccountInfo {
            account_type: owned(&self.account_type),
            account_subtype: owned(&self.account_subtype),
            currency: owned(&self.currency),
        };
        TransactionRecord {
            merchant: owned(&self.merchant),
            description: owned(&self.description),
            amount,
            payment_channel: owned(&self.channel),
            indicator: owned(&self.indicator),
            category: owned(&self.category),
            subcategory: owned(&self.subcategory),
            import_source,
            account: (account != AccountInfo::default()).then_some(account),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OutputRow {
    pub merchant: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub transaction_type: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence: String,
    pub source: String,
    pub type_confidence: String,
    pub type_source: String,
}

impl OutputRow {
    fn new(row: &InputRow, resolved: &ResolvedClassification) -> Self {
        Self {
            merchant: row.merchant.clone(),
            description: row.description.clone(),
            amount: row.amount.clone(),
            transaction_type: resolved.transaction_type.to_string(),
            category: resolved.category.clone(),
            subcategory: resolved.subcategory.clone(),
            confidence: format!("{:.2}", resolved.confidence),
            source: resolved.source.to_string(),
            type_confidence: format!("{:.2}", resolved.type_confidence),
            type_source: resolved.type_source.to_string(),
        }
    }
}

pub fn read_rows(path: &Path) -> Result<Vec<InputRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (idx, result) in reader.deserialize::<InputRow>().enumerate() {
        let row = result.with_context(|| format!("Invalid row at line {}", idx + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

fn write_rows<W: Write>(mut writer: csv::Writer<W>, rows: &[OutputRow]) -> Result<()> {
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

// ── Setup ────────────────────────────────────────────────────────────────────

/// Reads `--config` (which must exist) or the default config file (which may
/// not), then applies `--model-dir`.
pub fn load_config(path: Option<&Path>, model_dir: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            EngineConfig::from_toml(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => match default_data_dir() {
            Some(dir) => EngineConfig::load(&dir.join(CONFIG_FILE_NAME))?,
            None => EngineConfig::default(),
        },
    };
    if let Some(dir) = model_dir {
        config.model.dir = Some(dir.to_path_buf());
        config.model.in_memory = false;
    }
    Ok(config)
}

fn open_engine(config: &EngineConfig) -> (Arc<ClassifierStore>, Arc<DetectionCoordinator>) {
    let store = Arc::new(ClassifierStore::open(config));
    let coordinator = Arc::new(DetectionCoordinator::new(
        Arc::clone(&store),
        config.detection.clone(),
    ));
    (store, coordinator)
}

// ── Commands ─────────────────────────────────────────────────────────────────

pub async fn cmd_classify(config: &EngineConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    let rows = read_rows(input)?;
    let (_, coordinator) = open_engine(config);
    let resolver = Arc::new(CategoryTypeResolver::new(coordinator, config));

    let total = rows.len();
    let mut set = JoinSet::new();
    for (idx, row) in rows.into_iter().enumerate() {
        let resolver = Arc::clone(&resolver);
        set.spawn(async move {
            let record = row.to_record(idx + 2);
            let resolved = resolver.resolve(&record).await;
            (idx, OutputRow::new(&row, &resolved))
        });
    }

    let mut results = Vec::with_capacity(total);
    while let Some(joined) = set.join_next().await {
        results.push(joined.context("Classification task failed")?);
    }
    results.sort_by_key(|(idx, _)| *idx);
    let results: Vec<OutputRow> = results.into_iter().map(|(_, row)| row).collect();

    match output {
        Some(path) => {
            let writer = csv::Writer::from_path(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_rows(writer, &results)?;
            tracing::info!("classified {total} transactions into {}", path.display());
        }
        None => write_rows(csv::Writer::from_writer(std::io::stdout()), &results)?,
    }
    Ok(())
}

pub async fn cmd_train(config: &EngineConfig, input: &Path) -> Result<()> {
    let rows = read_rows(input)?;
    let (store, coordinator) = open_engine(config);

    let (trained, skipped) = tokio::task::spawn_blocking(move || {
        let mut trained = 0usize;
        let mut skipped = 0usize;
        for (idx, row) in rows.iter().enumerate() {
            let record = row.to_record(idx + 2);
            if non_blank(record.category.as_deref()).is_none() {
                skipped += 1;
                continue;
            }
            coordinator.train_model(&DetectionInput::from_record(&record), record.category.as_deref());
            trained += 1;
        }
        (trained, skipped)
    })
    .await
    .context("Training task failed")?;

    match store.save_model() {
        Ok(()) => {}
        Err(ModelError::PersistenceDisabled) => {
            tracing::warn!("model is in memory only, nothing was saved");
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Failed to save model")),
    }

    println!();
    println!("Training complete");
    println!("   Trained: {trained}");
    if skipped > 0 {
        println!("   Skipped (no category): {skipped}");
    }
    println!("   Total samples: {}", store.statistics().total_training_samples);
    println!();
    Ok(())
}

pub fn cmd_stats(config: &EngineConfig) -> Result<()> {
    let store = ClassifierStore::open(config);
    let stats = store.statistics();

    println!();
    println!("LedgerLens model");
    println!("   ─────────────────────────────────────────────");
    match store.classifier().model_path() {
        Some(path) => println!("   Model file: {}", path.display()),
        None => println!("   Model file: (in memory)"),
    }
    println!("   Training samples: {}", stats.total_training_samples);
    println!("   Merchants:        {}", stats.merchants);
    println!("   Keywords:         {}", stats.keywords);
    println!("   Amount ranges:    {}", stats.amount_ranges);
    println!("   Payment channels: {}", stats.payment_channels);
    println!();
    println!("   Known merchants:     {}", store.merchants().len());
    println!("   Semantic categories: {}", store.semantic().categories().len());
    println!();
    Ok(())
}
