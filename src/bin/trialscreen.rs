//! CLI binary for trialscreen.
//!
//! A thin shim over the library crate: maps flags to `ScreenConfig`, runs a
//! pipeline, and prints results.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use trialscreen::{
    file_sha256, run_protocol_pipeline, run_screening_pipeline, DisqualificationPower,
    ExtractedCriteria, ScreenConfig, ScreeningDecision, ScreeningRequest,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

#[derive(Parser)]
#[command(
    name = "trialscreen",
    version,
    about = "Extract eligibility criteria from clinical-trial protocol PDFs and pre-screen patients",
    long_about = "Extract eligibility criteria from clinical-trial protocol PDFs (native text or \
OCR), rank the exclusion criteria by disqualification power, and pre-screen patient records \
against the top of that list. Supports OpenAI, Anthropic, Google Gemini, and any \
OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TRIALSCREEN_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, env = "TRIALSCREEN_QUIET", global = true)]
    quiet: bool,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Completion model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "TRIALSCREEN_MODEL")]
    model: Option<String>,

    /// Completion provider: openai, anthropic, gemini, azure, ollama.
    /// Auto-detected from API key env vars if not set.
    #[arg(long, env = "TRIALSCREEN_PROVIDER")]
    provider: Option<String>,

    /// Path to the tesseract binary (for scanned pages).
    #[arg(long, env = "TRIALSCREEN_TESSERACT")]
    tesseract: Option<String>,

    /// Skip the model-assisted section locator pass (fully deterministic
    /// location; still one extraction call).
    #[arg(long)]
    no_llm_locate: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Extract and rank eligibility criteria from a protocol PDF.
    Process {
        /// Protocol PDF file.
        pdf: PathBuf,

        /// How many top disqualifiers to keep.
        #[arg(long, default_value_t = 8)]
        top_n: usize,

        /// Write the full ExtractedCriteria JSON to this file.
        #[arg(short, long, env = "TRIALSCREEN_OUTPUT")]
        output: Option<PathBuf>,

        /// Print the full JSON to stdout instead of the summary table.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        model_args: ModelArgs,
    },

    /// Process a protocol PDF, then screen a patient record against it.
    Screen {
        /// Protocol PDF file.
        pdf: PathBuf,

        /// Patient data as inline JSON, or @file.json.
        #[arg(long)]
        patient: String,

        /// Identifier recorded on the screening result.
        #[arg(long, default_value = "cli_patient")]
        patient_id: String,

        /// Print the full ScreeningResult JSON instead of the summary.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        model_args: ModelArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The spinner provides the feedback that matters; keep library logs
    // quiet unless the user asks for them.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Process {
            pdf,
            top_n,
            output,
            json,
            model_args,
        } => {
            let config = build_config(&model_args, top_n)?;
            let extracted = run_with_spinner(&pdf, &config, cli.quiet || json).await?;

            if let Some(ref path) = output {
                std::fs::write(path, serde_json::to_string_pretty(&extracted)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                if !json {
                    eprintln!("{} wrote {}", green("✓"), path.display());
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&extracted)?);
            } else {
                print_summary(&pdf, &extracted);
            }
        }

        Command::Screen {
            pdf,
            patient,
            patient_id,
            json,
            model_args,
        } => {
            let config = build_config(&model_args, 8)?;
            let extracted = run_with_spinner(&pdf, &config, cli.quiet || json).await?;

            let request = ScreeningRequest {
                patient_id,
                protocol_id: file_sha256(&pdf)
                    .with_context(|| format!("hashing {}", pdf.display()))?,
                patient_data: parse_patient(&patient)?,
            };
            let result = run_screening_pipeline(&request, &extracted, &config).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_screening(&result);
            }
        }
    }

    Ok(())
}

fn build_config(args: &ModelArgs, top_n: usize) -> Result<ScreenConfig> {
    let mut builder = ScreenConfig::builder()
        .top_n_disqualifiers(top_n)
        .llm_section_fallback(!args.no_llm_locate);
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref tesseract) = args.tesseract {
        builder = builder.tesseract_cmd(tesseract);
    }
    builder.build().map_err(Into::into)
}

async fn run_with_spinner(
    pdf: &Path,
    config: &ScreenConfig,
    quiet: bool,
) -> Result<ExtractedCriteria> {
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Processing");
        bar.set_message(pdf.display().to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    };

    let result = run_protocol_pipeline(pdf, config).await;
    bar.finish_and_clear();
    result.with_context(|| format!("processing {}", pdf.display()))
}

fn parse_patient(spec: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    let body = match spec.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?
        }
        None => spec.to_string(),
    };
    match serde_json::from_str(&body) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => bail!("patient data must be a JSON object"),
        Err(e) => bail!("patient data is not valid JSON: {e}"),
    }
}

fn power_label(power: DisqualificationPower) -> String {
    match power {
        DisqualificationPower::VeryHigh => red("very high"),
        DisqualificationPower::High => yellow("high"),
        DisqualificationPower::Medium => cyan("medium"),
        DisqualificationPower::Low => dim("low"),
        DisqualificationPower::Unknown => dim("unknown"),
    }
}

fn print_summary(pdf: &Path, extracted: &ExtractedCriteria) {
    println!(
        "{} {}",
        cyan("◆"),
        bold(extracted.protocol_title.as_deref().unwrap_or(&pdf.display().to_string()))
    );
    if let Some(ref sponsor) = extracted.sponsor {
        println!("  {} {sponsor}", dim("sponsor:"));
    }
    if let Some(ref phase) = extracted.phase {
        println!("  {} {phase}", dim("phase:"));
    }
    println!(
        "  {} {} inclusion, {} exclusion ({} warnings, confidence {:.2})",
        dim("criteria:"),
        extracted.inclusion_criteria().len(),
        extracted.exclusion_criteria().len(),
        extracted.metadata.warnings.len(),
        extracted.metadata.extraction_confidence,
    );
    println!("\n{}", bold("Top disqualifiers:"));
    for c in &extracted.top_disqualifiers {
        let page = c
            .source_page
            .map(|p| format!("p.{p}"))
            .unwrap_or_else(|| "p.?".to_string());
        let text: String = c.text.chars().take(90).collect();
        println!(
            "  {:<9} {} {} {}",
            power_label(c.disqualification_power),
            dim(&c.id),
            text,
            dim(&page)
        );
    }
    for warning in &extracted.metadata.warnings {
        eprintln!("  {} {warning}", yellow("!"));
    }
}

fn print_screening(result: &trialscreen::ScreeningResult) {
    let decision = match result.decision {
        ScreeningDecision::Disqualified => red(&bold("DISQUALIFIED")),
        ScreeningDecision::PassedPrescreen => green(&bold("PASSED PRESCREEN")),
        ScreeningDecision::Escalate => yellow(&bold("ESCALATE")),
    };
    println!(
        "{decision}  {} (confidence {:.0}%)",
        dim(&result.patient_id),
        result.confidence * 100.0
    );
    for failed in &result.failed_criteria {
        println!(
            "  {} {} {}",
            red("✗"),
            dim(&failed.criterion.id),
            failed.reason
        );
    }
    if let Some(ref reason) = result.escalation_reason {
        println!("  {} {reason}", yellow("→"));
    }
    if result.decision == ScreeningDecision::PassedPrescreen {
        println!(
            "  {} passed {} top disqualifiers; full-criteria review still required",
            dim("note:"),
            result.passed_criteria_count
        );
    }
}
