use anyhow::Context;
use clap::Parser;
use ledgersort_core::ChartOfAccounts;
use ledgersort_engine::{
    csv, household_chart, ChatCompletionFallback, CircuitBreaker, Classifier, Guarded, RuleTable,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod settings;
mod summary;

use settings::Settings;

#[derive(Parser)]
#[command(name = "ledgersort", about = "Classify bank transactions into chart-of-accounts paths.")]
struct Cli {
    /// CSV with Date, Description, Out and In columns
    #[arg(long, short)]
    input: PathBuf,
    /// Where to write the classified CSV (default: <input>.classified.csv)
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Chart of accounts, one colon path per line (default: bundled household chart)
    #[arg(long)]
    chart: Option<PathBuf>,
    /// Rule table TOML (default: bundled household rules)
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Settings TOML with [classifier] and [llm] sections
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ask a chat-completion model about transactions no rule matches
    #[arg(long)]
    llm: bool,
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("transactions");
    input.with_file_name(format!("{stem}.classified.csv"))
}

fn load_chart(path: Option<&Path>) -> anyhow::Result<ChartOfAccounts> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading chart of accounts {}", path.display()))?;
            ChartOfAccounts::parse(&text)
                .with_context(|| format!("parsing chart of accounts {}", path.display()))
        }
        None => household_chart().context("bundled chart of accounts"),
    }
}

fn load_rules(path: Option<&Path>) -> anyhow::Result<RuleTable> {
    match path {
        Some(path) => {
            RuleTable::load(path).with_context(|| format!("loading rules {}", path.display()))
        }
        None => RuleTable::household().context("bundled household rules"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings {}", path.display()))?,
        None => Settings::default(),
    };
    let chart = load_chart(cli.chart.as_deref())?;
    let rules = load_rules(cli.rules.as_deref())?;
    let accounts: Vec<String> = chart.iter().map(|a| a.to_string()).collect();

    let mut classifier = Classifier::new(&rules, chart, settings.classifier)
        .context("rule table does not fit the chart of accounts")?;

    if cli.llm {
        let llm = settings.llm;
        let breaker = CircuitBreaker::new(
            llm.failure_threshold,
            Duration::from_secs(llm.cooldown_secs),
        );
        let api_key_env = llm.api_key_env.clone();
        match ChatCompletionFallback::from_env(llm, accounts) {
            Some(fallback) => {
                let fallback = fallback.context("building the chat-completion client")?;
                classifier = classifier.with_fallback(Arc::new(Guarded::new(fallback, breaker)));
            }
            None => tracing::warn!(
                env = %api_key_env,
                "--llm given but the API key is not set; continuing without it"
            ),
        }
    }

    let transactions = csv::read_path(&cli.input)
        .with_context(|| format!("reading transactions {}", cli.input.display()))?;
    let outcome = classifier.classify_batch(&transactions).await;

    let output = cli.output.unwrap_or_else(|| default_output(&cli.input));
    csv::write_path(&output, &transactions, &outcome.results)
        .with_context(|| format!("writing {}", output.display()))?;

    summary::print(&transactions, &outcome, &output);
    Ok(())
}
