// lforge - contract-ledger enrichment pipeline (headless)

mod exit_codes;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ledgerforge_engine::{PipelineInput, RunConfig, RunOutcome, Services};
use ledgerforge_enrich::HttpEnrichmentService;
use ledgerforge_sources::SourceTable;

use exit_codes::{EXIT_EXCEPTIONS, EXIT_FATAL_STORE, EXIT_INVALID_CONFIG, EXIT_RUNTIME, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "lforge")]
#[command(about = "Contract-ledger enrichment pipeline (headless)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full 17-stage pipeline from a TOML config
    #[command(after_help = "\
Exit codes:
  0   clean run (empty exception report)
  20  invalid config
  21  a required source table could not be loaded
  22  ledger store could not be acquired
  23  run completed with exceptions (see the report)

Examples:
  lforge run july-close.toml
  lforge run july-close.toml --quiet
  RUST_LOG=ledgerforge=debug lforge run july-close.toml")]
    Run {
        /// Path to the run config
        config: PathBuf,

        /// Suppress the stage-by-stage summary (exceptions still reported)
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Validate a run config without touching the ledger
    #[command(after_help = "\
Examples:
  lforge validate july-close.toml")]
    Validate {
        /// Path to the run config
        config: PathBuf,
    },
}

struct CliError {
    code: u8,
    message: String,
}

fn err(code: u8, message: impl Into<String>) -> CliError {
    CliError { code, message: message.into() }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config, quiet } => cmd_run(config, quiet),
        Commands::Validate { config } => cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("lforge: {}", e.message);
            ExitCode::from(e.code)
        }
    }
}

fn load_config(path: &Path) -> Result<RunConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| err(EXIT_RUNTIME, format!("cannot read config: {e}")))?;
    RunConfig::from_toml(&text).map_err(|e| err(EXIT_INVALID_CONFIG, e.to_string()))
}

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    eprintln!(
        "valid: run '{}' — ledger {} (sheet '{}'), {} retry attempt(s), report '{}'",
        config.name,
        config.ledger.file,
        config.ledger.sheet,
        config.retry.max_attempts,
        config.validation.report_file,
    );
    Ok(())
}

fn cmd_run(config_path: PathBuf, quiet: bool) -> Result<(), CliError> {
    let mut config = load_config(&config_path)?;

    // Paths in the config are relative to the config file's directory.
    let base_dir = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    config.ledger.file = resolve(&base_dir, &config.ledger.file);

    let input = load_input(&base_dir, &config)?;

    let fields = HttpEnrichmentService::new(
        &config.services.fields.url,
        config.services.fields.token.as_deref(),
    );
    let valuation = HttpEnrichmentService::new(
        &config.services.valuation.url,
        config.services.valuation.token.as_deref(),
    );
    let services = Services { fields: &fields, valuation: &valuation };

    let report = ledgerforge_engine::execute(&config, &input, &services);

    if !quiet {
        for stage in &report.stages {
            eprintln!(
                "  stage {:>2} {:<18} {}{}",
                stage.stage.number(),
                stage.stage.label(),
                stage.detail,
                if stage.soft_failed { " (soft failure)" } else { "" },
            );
        }
    }

    eprintln!(
        "run '{}': {} exception(s), ledger {}, report {}",
        config.name,
        report.exceptions.len(),
        report.ledger_path.display(),
        report.report_path.display(),
    );

    if report.outcome == RunOutcome::Aborted {
        return Err(err(EXIT_FATAL_STORE, "ledger store could not be acquired"));
    }
    if !report.exceptions.is_empty() {
        return Err(err(
            EXIT_EXCEPTIONS,
            format!("{} exception(s) recorded", report.exceptions.len()),
        ));
    }
    Ok(())
}

fn resolve(base_dir: &Path, file: &str) -> String {
    let path = Path::new(file);
    if path.is_absolute() {
        file.to_string()
    } else {
        base_dir.join(path).to_string_lossy().into_owned()
    }
}

fn load_table(base_dir: &Path, section: &str, file: &str) -> Result<SourceTable, CliError> {
    let path = base_dir.join(file);
    ledgerforge_sources::load(&path).map_err(|e| {
        err(
            EXIT_RUNTIME,
            format!("{section}: cannot load {}: {e}", path.display()),
        )
    })
}

fn load_input(base_dir: &Path, config: &RunConfig) -> Result<PipelineInput, CliError> {
    let sources = &config.sources;

    // The recovery extract comes and goes month to month; absence is data,
    // not an error.
    let recovery = match &sources.recovery {
        Some(src) => match ledgerforge_sources::load(&base_dir.join(&src.file)) {
            Ok(table) => Some(table),
            Err(e) => {
                warn!(file = %src.file, error = %e, "recovery table unavailable; skipping tier");
                None
            }
        },
        None => None,
    };

    let reference_rate = config
        .validation
        .reference_file
        .as_deref()
        .and_then(|file| match ledgerforge_sources::load(&base_dir.join(file)) {
            Ok(table) => first_number(&table),
            Err(e) => {
                warn!(%file, error = %e, "reference-rate source unavailable; using default");
                None
            }
        });

    Ok(PipelineInput {
        registry: load_table(base_dir, "sources.registry", &sources.registry.file)?,
        portfolio: load_table(base_dir, "sources.portfolio", &sources.portfolio.file)?,
        credit: load_table(base_dir, "sources.credit", &sources.credit.file)?,
        working: load_table(base_dir, "sources.working", &sources.working.file)?,
        property_list: load_table(base_dir, "sources.property_list", &sources.property_list.file)?,
        categories: load_table(base_dir, "sources.categories", &sources.categories.file)?,
        sale_listing: load_table(base_dir, "sources.sale_listing", &sources.sale_listing.file)?,
        recovery,
        prior_working: load_table(base_dir, "sources.prior_working", &sources.prior_working.file)?,
        reference_rate,
    })
}

/// First parseable number anywhere in the table, scanning row-major.
fn first_number(table: &SourceTable) -> Option<f64> {
    for row in 0..table.num_rows() {
        for col in 0..table.num_cols() {
            let cell = table.cell(row, col).trim();
            if cell.is_empty() {
                continue;
            }
            if let Ok(n) = cell.replace(',', "").parse::<f64>() {
                return Some(n);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_number_scans_past_labels() {
        let table = SourceTable::from_rows(vec![
            vec!["Reference minimum rate".into(), "".into()],
            vec!["as published".into(), "0.0575".into()],
        ]);
        assert_eq!(first_number(&table), Some(0.0575));
        assert_eq!(first_number(&SourceTable::from_rows(vec![])), None);
    }

    #[test]
    fn relative_paths_resolve_against_the_config_dir() {
        let resolved = resolve(Path::new("/data/july"), "ledger.xlsx");
        assert_eq!(resolved, "/data/july/ledger.xlsx");
        assert_eq!(resolve(Path::new("/data"), "/abs/l.xlsx"), "/abs/l.xlsx");
    }
}
