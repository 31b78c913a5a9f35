//! checkout-store maintenance CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use checkout_store::{
    Config, DirFileStore, FieldKind, FieldValue, FjallKv, FormKey, FormRecord, FormSession,
    KvStore, LoadSource, PersistenceController, UpdateOutcome, Variant, WorkLogId, field_spec,
    subscriber,
};

#[derive(Parser, Debug)]
#[command(name = "checkout-store")]
#[command(about = "Inspect and maintain persisted checkout forms")]
struct Cli {
    /// Path to the configuration file. Defaults apply when absent.
    #[arg(short, long, env = "CHECKOUT_STORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the persisted record for a form
    Show {
        /// Form variant: plow or shovel
        variant: Variant,
        /// Work log id
        id: String,
    },

    /// Set one field of a form and write it through every tier
    Set {
        variant: Variant,
        id: String,
        /// Field name, e.g. snowDepth
        field: String,
        /// New value. List fields take a comma-separated list.
        value: String,
    },

    /// Remove a form from every tier
    Clear { variant: Variant, id: String },

    /// Delete forms and native files whose work log is not in the active set
    Sweep {
        /// Work log ids that are still active
        #[arg(long = "active", value_delimiter = ',')]
        active: Vec<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored form keys
    List,

    /// Print debug snapshots after loading forms. Without a form, every stored form is loaded.
    Debug {
        #[arg(requires = "id")]
        variant: Option<Variant>,
        #[arg(requires = "variant")]
        id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    subscriber::init(&config.logging)?;

    let kv = Arc::new(open_kv(&config)?);
    let controller = open_controller(&config, kv.clone());

    match cli.command {
        Commands::Show { variant, id } => {
            let key = FormKey::new(variant, id);
            let (record, source) = load_reconciled(&controller, &key).await?;
            println!("source: {}", source);
            println!("{}", record.encode()?);
        }
        Commands::Set {
            variant,
            id,
            field,
            value,
        } => {
            let key = FormKey::new(variant, id);
            let value = parse_value(variant, &field, value);
            let form = FormSession::mount_reconciled(controller.clone(), key.clone()).await;
            let outcome = form.update_field(&field, value)?;
            controller.flush_native().await;
            match outcome {
                UpdateOutcome::Unchanged => println!("{} unchanged", field),
                UpdateOutcome::Saved => println!("Saved {} for {}", field, key),
                UpdateOutcome::Failed => {
                    let snapshot = controller.debug_snapshot(&key);
                    let reason = snapshot
                        .and_then(|s| s.last_write_error)
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    anyhow::bail!("durable write failed for {}: {}", key, reason);
                }
            }
        }
        Commands::Clear { variant, id } => {
            let key = FormKey::new(variant, id);
            controller.clear_persisted_data(&key).await;
            println!("Cleared {}", key);
        }
        Commands::Sweep { active, json } => {
            let active: Vec<WorkLogId> = active.into_iter().map(WorkLogId::from).collect();
            let kv_report = controller.cleanup_stale_forms(&active);
            let native_report = controller.cleanup_stale_native(&active).await;
            if json {
                let reports = serde_json::json!({ "kv": kv_report, "native": native_report });
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for (tier, report) in [("kv", &kv_report), ("native", &native_report)] {
                    for removed in &report.removed {
                        println!("removed {}", removed);
                    }
                    println!(
                        "{}: {} removed, {} kept, {} failed",
                        tier,
                        report.removed.len(),
                        report.kept,
                        report.failed
                    );
                }
            }
        }
        Commands::List => {
            let keys = kv.keys()?;
            debug!(total = keys.len(), "listing stored keys");
            let mut count = 0;
            for key in keys {
                if let Some(form) = FormKey::parse(controller.key_prefix(), &key) {
                    println!("{}\t{}", form, key);
                    count += 1;
                }
            }
            if count == 0 {
                println!("No stored forms");
            }
        }
        Commands::Debug { variant, id } => match (variant, id) {
            (Some(variant), Some(id)) => {
                let key = FormKey::new(variant, id);
                load_reconciled(&controller, &key).await?;
                match controller.debug_snapshot(&key) {
                    Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                    None => println!("No diagnostics for {}", key),
                }
            }
            (None, None) => {
                for key in kv.keys()? {
                    if let Some(form) = FormKey::parse(controller.key_prefix(), &key) {
                        load_reconciled(&controller, &form).await?;
                    }
                }
                let all = controller.debug_registry().all();
                println!("{}", serde_json::to_string_pretty(&all)?);
            }
            _ => anyhow::bail!("debug takes both a variant and an id, or neither"),
        },
    }

    Ok(())
}

fn open_kv(config: &Config) -> anyhow::Result<FjallKv> {
    let kv = FjallKv::open(&config.store.kv_path)
        .with_context(|| format!("opening KV store at {}", config.store.kv_path.display()))?;
    Ok(kv.with_quota(config.store.max_value_bytes))
}

fn open_controller(config: &Config, kv: Arc<FjallKv>) -> PersistenceController {
    let mut builder = PersistenceController::builder(kv).config(&config.store);
    if config.store.is_native_runtime() {
        info!(root = %config.store.file_root.display(), "native file tier enabled");
        builder = builder.file_store(Arc::new(DirFileStore::new(&config.store.file_root)));
    }
    builder.build()
}

/// Sync load followed by the native read, as a mounted form would see it.
async fn load_reconciled(
    controller: &PersistenceController,
    key: &FormKey,
) -> anyhow::Result<(FormRecord, LoadSource)> {
    let loaded = controller.load(key);
    match controller.load_native(key).await? {
        Some(native) => {
            controller.adopt_native(key, native.clone());
            Ok((native, LoadSource::NativeFile))
        }
        None => Ok((loaded.record, loaded.source)),
    }
}

fn parse_value(variant: Variant, field: &str, raw: String) -> FieldValue {
    match field_spec(variant, field).map(|spec| spec.kind) {
        Some(FieldKind::TextList) => FieldValue::List(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => FieldValue::Text(raw),
    }
}
