use clap::{Parser, Subcommand};
use mp_harvest::apis::MaterialsProjectClient;
use mp_harvest::config::Config;
use mp_harvest::console::{self, QueryOutcome, CATALOG};
use mp_harvest::constants::{
    DEFAULT_BAND_GAP_RANGE, DEFAULT_E_HULL_MAX, DEFAULT_ELEMENT_LIMIT, DEFAULT_SEMICONDUCTOR_LIMIT,
    DEFAULT_STABLE_LIMIT, MAX_ADDITIONAL_PROPERTY_MATERIALS,
};
use mp_harvest::pipeline::{CollectionPlan, DirectoryImport, Importer, QueryRunner};
use mp_harvest::storage::{composition_label, MaterialStore, QueryRows, VerificationReport};
use mp_harvest::{logging, metrics};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mp_harvest")]
#[command(about = "Materials Project data collection and SQL import")]
#[command(version)]
struct Cli {
    /// Path to config.toml (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct QueryArgs {
    /// Material ids to query (comma-separated); defaults to the reference set
    #[arg(long)]
    ids: Option<String>,
    /// Elements for the membership query (comma-separated); empty disables it
    #[arg(long, default_value = "Si")]
    elements: String,
    #[arg(long, default_value_t = DEFAULT_ELEMENT_LIMIT)]
    element_limit: usize,
    #[arg(long, default_value_t = DEFAULT_BAND_GAP_RANGE.0)]
    band_gap_min: f64,
    #[arg(long, default_value_t = DEFAULT_BAND_GAP_RANGE.1)]
    band_gap_max: f64,
    #[arg(long, default_value_t = DEFAULT_SEMICONDUCTOR_LIMIT)]
    semiconductor_limit: usize,
    /// Also query thermodynamically stable materials
    #[arg(long)]
    stable: bool,
    #[arg(long, default_value_t = DEFAULT_E_HULL_MAX)]
    e_hull_max: f64,
    #[arg(long, default_value_t = DEFAULT_STABLE_LIMIT)]
    stable_limit: usize,
    /// Output directory (overrides config)
    #[arg(long)]
    output: Option<PathBuf>,
}

impl QueryArgs {
    fn plan(&self) -> CollectionPlan {
        let split = |s: &str| -> Vec<String> {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };
        let defaults = CollectionPlan::default();
        CollectionPlan {
            material_ids: self.ids.as_deref().map(split).unwrap_or(defaults.material_ids),
            elements: split(&self.elements),
            element_limit: self.element_limit,
            band_gap: (self.band_gap_min, self.band_gap_max),
            semiconductor_limit: self.semiconductor_limit,
            stable: self.stable.then_some((self.e_hull_max, self.stable_limit)),
            additional_properties: MAX_ADDITIONAL_PROPERTY_MATERIALS,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the Materials Project API is reachable
    Ping,
    /// Run the named queries and save JSON/CSV datasets
    Query(QueryArgs),
    /// Import saved datasets into the SQL store
    Import {
        /// Directory holding the CSV/JSON datasets (overrides config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print statistics about the SQL store
    Verify,
    /// Query, import and verify in one go
    Run(QueryArgs),
    /// Run read-only SQL against the store
    Sql(SqlArgs),
}

#[derive(clap::Args, Debug, Clone)]
#[group(required = true, multiple = false, id = "action")]
struct SqlActions {
    /// A single SELECT (or WITH ... SELECT) statement
    #[arg(long)]
    query: Option<String>,
    /// Run a catalog query by id, e.g. A1
    #[arg(long)]
    named: Option<String>,
    /// List the catalog queries
    #[arg(long)]
    list: bool,
    /// Print headline counts
    #[arg(long)]
    stats: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct SqlArgs {
    #[command(flatten)]
    action: SqlActions,
    /// Print rows as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn build_runner(config: &Config) -> anyhow::Result<QueryRunner> {
    let api_key = config.require_api_key()?;
    let client = MaterialsProjectClient::new(api_key, &config.materials_project)?;
    Ok(QueryRunner::new(Arc::new(client)))
}

async fn run_query(config: &Config, args: &QueryArgs) -> anyhow::Result<PathBuf> {
    let runner = build_runner(config)?;
    let output_dir = args.output.clone().unwrap_or_else(|| config.output.dir.clone());

    let (id, formula) = runner.ping().await?;
    println!("✅ API connected: {} - {}", id, formula.as_deref().unwrap_or("N/A"));

    let result = runner.collect(&args.plan(), &output_dir).await?;
    if result.unique.is_empty() {
        println!("❌ No materials were collected");
        return Ok(output_dir);
    }

    println!("\n📊 Collection Results:");
    println!("   Total unique materials: {}", result.unique.len());
    for saved in &result.saved {
        println!("   {} records -> {}", saved.records, saved.csv.display());
    }
    println!("\n📋 Sample materials collected:");
    for (i, record) in result.unique.iter().take(10).enumerate() {
        println!(
            "   {:2}. {} - {} ({}, Eg={}, Elements: {})",
            i + 1,
            record.material_id.as_deref().unwrap_or("?"),
            record.formula_pretty.as_deref().unwrap_or("?"),
            record.crystal_system.as_deref().unwrap_or("Unknown"),
            record.band_gap.map(|g| g.to_string()).unwrap_or_else(|| "N/A".into()),
            if record.elements.is_empty() { "N/A".to_string() } else { record.elements.join(", ") },
        );
    }
    if result.unique.len() > 10 {
        println!("   ... and {} more materials", result.unique.len() - 10);
    }
    println!("\n📁 Output directory: {}", output_dir.display());
    Ok(output_dir)
}

fn run_import(config: &Config, data_dir: &Path) -> anyhow::Result<DirectoryImport> {
    info!("Database: {}", config.database.describe());
    let mut store = MaterialStore::open(config.database.sqlite_path())?;
    let mut importer = Importer::new(&mut store, config.import.batch_size);
    let summary = importer.import_directory(data_dir)?;

    println!("\n📥 Import Results:");
    for path in &summary.csv_files {
        println!("   - {}", path.display());
    }
    println!("   Inserted: {}", summary.materials.inserted);
    println!("   Updated: {}", summary.materials.updated);
    println!("   Skipped: {}", summary.materials.skipped);
    println!("   Errors: {}", summary.materials.errors);
    for path in &summary.failed_files {
        println!("   ⚠️  Failed to import {}", path.display());
    }
    if let Some(path) = &summary.properties_file {
        println!(
            "   Additional properties from {}: {}",
            path.display(),
            summary.properties.processed()
        );
    }
    Ok(summary)
}

fn print_report(report: &VerificationReport) {
    println!("\n🔍 Verification:");
    println!("   Total materials: {}", report.total_materials);
    println!("\n   By crystal system:");
    for (system, count) in &report.by_crystal_system {
        println!("     {}: {}", system, count);
    }
    println!("\n   By query type:");
    for (query_type, count) in &report.by_query_type {
        println!("     {}: {}", query_type, count);
    }
    println!("\n   Semiconductors (0.1 < Eg < 5.0 eV): {}", report.semiconductors);
    println!("   Metals (Eg = 0): {}", report.metals);
    println!("   Insulators (Eg >= 5.0 eV): {}", report.insulators);
    println!("   Stable materials: {}", report.stable);
    if let Some(stats) = &report.band_gap {
        println!(
            "   Band gap: min {:.3}, max {:.3}, avg {:.3} eV",
            stats.min, stats.max, stats.avg
        );
    }
    if let Some(stats) = &report.formation_energy {
        println!(
            "   Formation energy: min {:.3}, max {:.3}, avg {:.3} eV/atom",
            stats.min, stats.max, stats.avg
        );
    }
    println!("\n   Element distribution:");
    for (n, count) in &report.element_distribution {
        println!("     {}: {}", composition_label(*n), count);
    }
    println!("\n   Most common formulas:");
    for (formula, count) in &report.top_formulas {
        println!("     {}: {}", formula, count);
    }
    println!("\n   Additional properties: {}", report.total_properties);
    println!("\n   Sample materials:");
    for row in &report.samples {
        println!(
            "     {} - {} ({})",
            row.material_id,
            row.formula_pretty.as_deref().unwrap_or("?"),
            row.crystal_system.as_deref().unwrap_or("Unknown")
        );
    }
}

fn run_verify(config: &Config) -> anyhow::Result<()> {
    let store = MaterialStore::open(config.database.sqlite_path())?;
    let report = store.verification_report()?;
    print_report(&report);
    Ok(())
}

fn format_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_rows(result: &QueryRows) {
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(format_cell).collect())
        .collect();
    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();
    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    println!("{}", line(&result.columns));
    println!("{}", widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));
    for row in &cells {
        println!("{}", line(row));
    }
}

fn print_outcome(outcome: &QueryOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.result.to_records())?);
    } else {
        print_rows(&outcome.result);
        println!("\n{} rows in {} ms", outcome.result.rows.len(), outcome.execution_ms);
    }
    Ok(())
}

fn run_sql(config: &Config, args: &SqlArgs) -> anyhow::Result<()> {
    let action = &args.action;
    if action.list {
        for query in CATALOG {
            println!("{:<4} {} - {}", query.id, query.title, query.description);
        }
        return Ok(());
    }

    let store = MaterialStore::open(config.database.sqlite_path())?;
    if action.stats {
        let stats = store.database_stats()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!("📊 Database statistics:");
            println!("   Total materials: {}", stats.total_materials);
            println!("   Crystal systems: {}", stats.crystal_systems);
            println!("   Semiconductors (0.1-3.0 eV): {}", stats.semiconductors);
            println!("   Metals: {}", stats.metals);
        }
        return Ok(());
    }

    if let Some(id) = &action.named {
        let (query, outcome) = console::execute_named(&store, id)?;
        if !args.json {
            println!("{} {}: {}\n", query.id, query.title, query.description);
        }
        return print_outcome(&outcome, args.json);
    }

    let sql = action.query.as_deref().unwrap_or_default();
    let outcome = console::execute(&store, sql)?;
    print_outcome(&outcome, args.json)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_from(cli.config.as_deref())?;

    match cli.command {
        Commands::Ping => {
            let runner = build_runner(&config)?;
            let (id, formula) = runner.ping().await?;
            println!("✅ API connected: {} - {}", id, formula.as_deref().unwrap_or("N/A"));
        }
        Commands::Query(args) => {
            println!("🔄 Running Materials Project queries...");
            run_query(&config, &args).await?;
        }
        Commands::Import { data_dir } => {
            println!("🔄 Importing datasets...");
            let data_dir = data_dir.unwrap_or_else(|| config.output.dir.clone());
            run_import(&config, &data_dir)?;
            run_verify(&config)?;
        }
        Commands::Verify => run_verify(&config)?,
        Commands::Run(args) => {
            println!("🚀 Running full pipeline (query + import)...");
            println!("\n📥 Step 1: Querying...");
            let output_dir = run_query(&config, &args).await?;
            println!("\n🔨 Step 2: Importing...");
            run_import(&config, &output_dir)?;
            run_verify(&config)?;
            println!("\n✅ Full pipeline completed successfully!");
        }
        Commands::Sql(args) => run_sql(&config, &args)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Run failed: {:#}", e);
        println!("❌ {:#}", e);
        std::process::exit(1);
    }
}
