use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use biosense_core::{
    history::DEFAULT_TREND_WINDOW,
    model::WBC_DISPLAY_CAP,
    report::{render_record, summary_lines, OutputFormat},
    simulator::DEFAULT_TICK,
    Completion, LlmOverrides, LlmSettings, MetricSimulator, RiskClassifier, RiskLevel,
    ScanHistory, ScanRecord, Screen, SessionController, SimulatorConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::{ColoredString, Colorize};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_TICKS: u32 = 5;

#[derive(Parser, Debug)]
#[command(
    name = "biosense",
    author,
    version,
    about = "Simulated blood-metrics scanner with advisory risk analysis"
)]
struct Cli {
    /// Configuration file (TOML or YAML) with `[llm]` and `[scan]` sections
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one scan session: stream live metrics, stop, classify
    Scan {
        /// Number of simulator ticks before stopping
        #[arg(long)]
        ticks: Option<u32>,
        /// Tick period, e.g. `1s` or `250ms`
        #[arg(long, value_parser = humantime::parse_duration)]
        tick: Option<Duration>,
        /// Seed for a reproducible metric stream
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, value_enum, default_value_t = Format::Human)]
        format: Format,
    },
    /// Show the demonstration scan history, newest first
    History {
        /// Re-display a single record by id
        #[arg(long, value_name = "ID")]
        select: Option<String>,
        #[arg(long, value_enum, default_value_t = Format::Human)]
        format: Format,
    },
    /// Show metric trends over the most recent scans
    Trends {
        #[arg(long, default_value_t = DEFAULT_TREND_WINDOW)]
        limit: usize,
    },
    /// Print healthy-habit tips
    Guidance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Human,
    Json,
    Yaml,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    llm: LlmOverrides,
    #[serde(default)]
    scan: ScanFileConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ScanFileConfig {
    ticks: Option<u32>,
    tick: Option<String>,
    seed: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let file = load_config(cli.config.as_deref())?;
    match cli.command.unwrap_or(Commands::Scan {
        ticks: None,
        tick: None,
        seed: None,
        format: Format::Human,
    }) {
        Commands::Scan {
            ticks,
            tick,
            seed,
            format,
        } => run_scan(&file, ticks, tick, seed, format).await?,
        Commands::History { select, format } => show_history(select.as_deref(), format)?,
        Commands::Trends { limit } => show_trends(limit),
        Commands::Guidance => show_guidance(&file).await?,
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .and_then(|cfg| cfg.try_deserialize::<FileConfig>())
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn classifier(file: &FileConfig) -> Result<RiskClassifier> {
    let settings = LlmSettings::from_env_with(&file.llm)?;
    let classifier = RiskClassifier::from_settings(&settings)?;
    info!(provider = %settings.provider, online = classifier.is_online(), "classifier ready");
    Ok(classifier)
}

async fn run_scan(
    file: &FileConfig,
    ticks: Option<u32>,
    tick: Option<Duration>,
    seed: Option<u64>,
    format: Format,
) -> Result<()> {
    let tick = match (tick, file.scan.tick.as_deref()) {
        (Some(tick), _) => tick,
        (None, Some(raw)) => humantime::parse_duration(raw)
            .with_context(|| format!("invalid scan.tick `{raw}` in config"))?,
        (None, None) => DEFAULT_TICK,
    };
    if tick.is_zero() {
        bail!("tick period must be greater than zero");
    }
    let ticks = ticks.or(file.scan.ticks).unwrap_or(DEFAULT_TICKS);
    let classifier = classifier(file)?;
    let simulator = MetricSimulator::new(SimulatorConfig {
        tick,
        seed: seed.or(file.scan.seed),
    });

    let mut session = SessionController::new(simulator, ScanHistory::new());
    session.start_scan()?;
    let mut feed = session.live_feed().context("scan did not start")?;
    let human = format == Format::Human;
    if human {
        println!("Scanning ({ticks} ticks every {})", humantime::format_duration(tick));
    }

    for n in 1..=ticks {
        tokio::select! {
            changed = feed.changed() => changed.context("metric feed closed unexpectedly")?,
            _ = tokio::signal::ctrl_c() => {
                session.cancel_scan()?;
                warn!("scan interrupted; no record produced");
                return Ok(());
            }
        }
        let snapshot = *feed.borrow_and_update();
        if human {
            println!(
                "  tick {n:>3}  O2 {:>5.1}%  WBC {:>6.0}  RBC {:>4.2}",
                snapshot.oxygen,
                snapshot.wbc.min(WBC_DISPLAY_CAP),
                snapshot.rbc
            );
        }
    }

    let record = match session.analyze(&classifier).await? {
        Completion::Reviewed(record) => record,
        Completion::Stale => bail!("scan session was superseded before review"),
    };
    match format {
        Format::Human => {
            println!("\nAnalysis complete: {}", paint_risk(record.risk, record.risk.as_str()));
            print!("{}", render_record(&record, OutputFormat::Human)?);
        }
        Format::Json => println!("{}", render_record(&record, OutputFormat::Json)?),
        Format::Yaml => print!("{}", serde_yaml::to_string(&record)?),
    }
    Ok(())
}

fn show_history(select: Option<&str>, format: Format) -> Result<()> {
    let mut session = SessionController::new(MetricSimulator::default(), ScanHistory::sample());
    session.navigate(Screen::History);

    if let Some(id) = select {
        let record = session.select_history_record(id)?;
        return print_records(std::slice::from_ref(&record), format, true);
    }

    let records: Vec<ScanRecord> = session.history().latest_first().cloned().collect();
    if records.is_empty() {
        println!("No scan history available");
        return Ok(());
    }
    print_records(&records, format, false)
}

fn print_records(records: &[ScanRecord], format: Format, detailed: bool) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(records)?),
        Format::Yaml => print!("{}", serde_yaml::to_string(records)?),
        Format::Human if detailed => {
            for record in records {
                print!("{}", render_record(record, OutputFormat::Human)?);
            }
        }
        Format::Human => {
            println!("{} scan(s), newest first", records.len());
            for record in records {
                let headline = summary_lines(&record.summary)
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                println!(
                    "- {id:<14} {date:<13} {risk} {headline}",
                    id = record.id,
                    date = record.timestamp.format("%b %-d, %Y").to_string(),
                    risk = paint_risk(record.risk, format!("{:<8}", record.risk.as_str())),
                    headline = headline
                );
            }
        }
    }
    Ok(())
}

fn show_trends(limit: usize) {
    let history = ScanHistory::sample();
    let points = history.trend(limit);
    if points.is_empty() {
        println!("No scan history available");
        return;
    }
    println!("{:<8} {:>8} {:>8} {:>6}", "Date", "O2 %", "WBC", "RBC");
    for point in points {
        println!(
            "{:<8} {:>8.1} {:>8.0} {:>6.2}",
            point.label, point.oxygen, point.wbc, point.rbc
        );
    }
}

async fn show_guidance(file: &FileConfig) -> Result<()> {
    let tips = classifier(file)?.guidance().await;
    println!("Healthy Habits");
    for line in summary_lines(&tips) {
        println!("  • {line}");
    }
    println!(
        "\nThis tool is a simulation for demonstration only. Do not use it for medical diagnosis."
    );
    Ok(())
}

/// Colour `text` by risk. Pad before painting; escapes break width specifiers.
fn paint_risk(risk: RiskLevel, text: impl Into<String>) -> ColoredString {
    let text = text.into();
    let text = text.as_str();
    match risk {
        RiskLevel::Low => text.green(),
        RiskLevel::Moderate => text.yellow(),
        RiskLevel::High => text.red().bold(),
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_stays_inside_colour_escapes() {
        colored::control::set_override(true);
        let painted =
            paint_risk(RiskLevel::Low, format!("{:<8}", RiskLevel::Low.as_str())).to_string();
        colored::control::unset_override();
        assert!(painted.starts_with("\x1b["));
        assert!(painted.contains("Low     \x1b[0m"));
    }
}
