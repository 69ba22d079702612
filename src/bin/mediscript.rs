//! CLI binary for mediscript.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, renders records and writes the export files.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mediscript::{
    enhance_only, run_batch, EnhancementConfig, EnhancementStage, ExtractionConfig,
    ExtractionFailure, ExtractionProgressCallback, ExtractionReport, PrescriptionRecord,
    ProgressCallback, Stage,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one spinner for the whole invocation plus a
/// log line per finished image. Runs may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    total: usize,
    done: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading image…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            total,
            done: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, source: &str) {
        self.bar.println(format!("{} {}", cyan("◆"), bold(source)));
    }

    fn on_stage_complete(&self, stage: Stage, width: u32, height: u32) {
        self.bar.set_prefix("Enhancing");
        self.bar.set_message(format!("{stage} ({width}×{height})"));
    }

    fn on_request_start(&self) {
        self.bar.set_prefix("Extracting");
        self.bar.set_message("waiting for the model…");
    }

    fn on_request_complete(&self, response_len: usize) {
        self.bar.set_prefix("Parsing");
        self.bar.set_message(format!("{response_len} chars"));
    }

    fn on_run_complete(&self, source: &str, extracted: bool) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let mark = if extracted { green("✓") } else { red("✗") };
        self.bar.println(format!(
            "  {} {}  {}",
            mark,
            source,
            dim(&format!("{done}/{}", self.total))
        ));
        if done >= self.total {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract and print a summary
  mediscript prescription.jpg

  # JSON on stdout, CSV of medications to a file
  mediscript --json --csv-out meds.csv prescription.jpg

  # Save every enhancement stage as PNG
  mediscript --steps-dir steps/ prescription.jpg

  # Only enhance (no API key needed)
  mediscript --enhance-only --enhanced-out clean.png prescription.jpg

  # Several images, two at a time
  mediscript --concurrency 2 --json-out out/ rx1.jpg rx2.png rx3.jpg

  # From a URL, with another provider
  mediscript --provider openai --model gpt-4.1-mini https://example.com/rx.jpg

ENVIRONMENT VARIABLES (also read from .env):
  GEMINI_API_KEY           Google Gemini API key (default provider)
  OPENAI_API_KEY           OpenAI API key (with --provider openai)
  MEDISCRIPT_PROVIDER      Override provider (gemini, openai, anthropic, ollama, ...)
  MEDISCRIPT_MODEL         Override model ID
  RUST_LOG                 Log filter, e.g. mediscript=debug

With several inputs, --json-out, --csv-out and --steps-dir are treated as
directories and each image gets files named after its stem.
"#;

/// Extract medication data from prescription photos with a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "mediscript",
    version,
    about = "Extract medication data from prescription photos using Vision LLMs",
    long_about = "Enhance photographed paper prescriptions (resize, grayscale, adaptive threshold, \
denoise, sharpen, contrast), send them to a multimodal model with a fixed extraction prompt, and \
recover a structured record: patient details, medications, remarks.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JPEG/PNG file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Print the record as JSON on stdout instead of a summary.
    #[arg(long, env = "MEDISCRIPT_JSON")]
    json: bool,

    /// Write the record as pretty JSON to this file.
    #[arg(long, env = "MEDISCRIPT_JSON_OUT")]
    json_out: Option<PathBuf>,

    /// Write the medications table as CSV to this file.
    #[arg(long, env = "MEDISCRIPT_CSV_OUT")]
    csv_out: Option<PathBuf>,

    /// Save every enhancement stage as NN-stage.png in this directory.
    #[arg(long, env = "MEDISCRIPT_STEPS_DIR")]
    steps_dir: Option<PathBuf>,

    /// Save the final enhanced image to this file (single input only).
    #[arg(long)]
    enhanced_out: Option<PathBuf>,

    /// Run the enhancement pipeline only; no inference call.
    #[arg(long)]
    enhance_only: bool,

    /// Vision model ID (default: gemini-2.0-flash with GEMINI_API_KEY).
    #[arg(long, env = "MEDISCRIPT_MODEL")]
    model: Option<String>,

    /// Provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "MEDISCRIPT_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file replacing the built-in extraction prompt.
    #[arg(long, env = "MEDISCRIPT_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Height in pixels the image is resized to before processing.
    #[arg(long, env = "MEDISCRIPT_TARGET_HEIGHT", default_value_t = 1200,
          value_parser = clap::value_parser!(u32).range(16..=8000))]
    target_height: u32,

    /// Contrast factor of the final stage.
    #[arg(long, env = "MEDISCRIPT_CONTRAST", default_value_t = 1.5)]
    contrast: f32,

    /// Number of images processed at once.
    #[arg(short, long, env = "MEDISCRIPT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Max LLM output tokens.
    #[arg(long, env = "MEDISCRIPT_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "MEDISCRIPT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// LLM call timeout in seconds.
    #[arg(long, env = "MEDISCRIPT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MEDISCRIPT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable the progress spinner.
    #[arg(long, env = "MEDISCRIPT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MEDISCRIPT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MEDISCRIPT_QUIET")]
    quiet: bool,
}

impl Cli {
    fn many(&self) -> bool {
        self.inputs.len() > 1
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are hidden while the spinner is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.enhanced_out.is_some() && cli.many() {
        anyhow::bail!("--enhanced-out takes a single input");
    }

    let spinner = (show_progress && !cli.enhance_only).then(|| CliProgressCallback::new(cli.inputs.len()));
    let progress_cb: Option<ProgressCallback> = spinner
        .clone()
        .map(|cb| cb as Arc<dyn ExtractionProgressCallback>);
    let config = build_config(&cli, progress_cb).await?;

    // ── Enhance-only mode ────────────────────────────────────────────────
    if cli.enhance_only {
        for input in &cli.inputs {
            let enhanced = enhance_only(input, &config)
                .await
                .with_context(|| format!("Failed to enhance {input}"))?;
            if let Some(ref path) = cli.enhanced_out {
                save_image(&enhanced.image, path)?;
            }
            if let Some(ref stages) = enhanced.stages {
                write_stages(&cli, input, stages)?;
            }
            if !cli.quiet {
                eprintln!(
                    "{} {}  {}×{}",
                    green("✔"),
                    input,
                    enhanced.image.width(),
                    enhanced.image.height()
                );
            }
        }
        return Ok(());
    }

    // ── Extraction ───────────────────────────────────────────────────────
    let results = run_batch(cli.inputs.clone(), &config).await;
    if let Some(ref spinner) = spinner {
        spinner.bar.finish_and_clear();
    }
    let results = results.context("Extraction failed")?;

    let mut json_entries = Vec::new();
    let mut failed = 0usize;

    for (input, result) in &results {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", red("✘"), input, e);
                continue;
            }
        };

        if let Some(ref path) = cli.enhanced_out {
            save_image(&report.enhanced, path)?;
        }
        if let Some(ref stages) = report.stages {
            write_stages(&cli, input, stages)?;
        }

        match &report.outcome {
            Ok(record) => {
                write_exports(&cli, input, record)?;
                if cli.json {
                    json_entries.push((input.as_str(), serde_json::to_value(record)?));
                } else if !cli.quiet {
                    print_summary(input, record, cli.many());
                }
            }
            Err(failure) => {
                failed += 1;
                report_failure(input, failure);
                if cli.json {
                    json_entries.push((input.as_str(), serde_json::to_value(failure)?));
                }
            }
        }

        if !cli.quiet && !cli.json {
            print_stats(report);
        }
    }

    if cli.json {
        let out = if cli.many() {
            let list: Vec<serde_json::Value> = json_entries
                .into_iter()
                .map(|(source, value)| serde_json::json!({ "source": source, "result": value }))
                .collect();
            serde_json::to_string_pretty(&list)?
        } else {
            match json_entries.into_iter().next() {
                Some((_, value)) => serde_json::to_string_pretty(&value)?,
                None => String::from("null"),
            }
        };
        println!("{out}");
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} image(s) produced no data", results.len());
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let prompt = if let Some(ref path) = cli.prompt_file {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let enhancement = EnhancementConfig {
        target_height: cli.target_height,
        contrast_factor: cli.contrast,
        ..EnhancementConfig::default()
    };

    let mut builder = ExtractionConfig::builder()
        .enhancement(enhancement)
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .trace(cli.steps_dir.is_some());

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(prompt) = prompt {
        builder = builder.prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn print_summary(input: &str, record: &PrescriptionRecord, with_source: bool) {
    if with_source {
        println!("{}", bold(&format!("── {input} ──")));
    }

    println!("{}", bold("Patient Information"));
    for (label, value) in [
        ("Patient", &record.patient_name),
        ("Date", &record.date),
        ("Address", &record.address),
        ("Doctor", &record.doctor_name),
        ("Diagnosis", &record.diagnosis),
        ("History", &record.history_symptoms),
    ] {
        println!("  {:<10} {}", label, value);
    }

    println!();
    println!("{}", bold("Medications"));
    if record.medications.is_empty() {
        println!("  {}", dim("none listed"));
    } else {
        let rows: Vec<[&str; 3]> = record
            .medications
            .iter()
            .map(|m| [m.name_or_empty(), m.dosage_or_empty(), m.frequency_or_empty()])
            .collect();
        let header = ["Medicine Name", "Dosage", "Frequency"];
        let mut widths = header.map(|h| h.chars().count());
        for row in &rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }
        let line = |cells: [&str; 3]| {
            format!(
                "  {:<w0$}  {:<w1$}  {:<w2$}",
                cells[0],
                cells[1],
                cells[2],
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2]
            )
        };
        println!("{}", bold(&line(header)));
        for row in rows {
            println!("{}", line(row));
        }
    }

    println!();
    println!("  {:<10} {}", "Refill", record.refill);
    println!("  {:<10} {}", "Remarks", record.remarks);
    println!();
}

fn report_failure(input: &str, failure: &ExtractionFailure) {
    eprintln!("{} No data extracted from {}: {}", yellow("⚠"), input, failure);
    if let Some(raw) = failure.raw_response() {
        eprintln!("{}", dim("Raw response:"));
        eprintln!("{raw}");
    }
}

fn print_stats(report: &ExtractionReport) {
    let s = &report.stats;
    eprintln!(
        "   {}",
        dim(&format!(
            "{}×{} → {}×{}  decode {}ms  enhance {}ms  model {}ms  total {}ms",
            s.original_width,
            s.original_height,
            s.enhanced_width,
            s.enhanced_height,
            s.decode_duration_ms,
            s.enhance_duration_ms,
            s.inference_duration_ms,
            s.total_duration_ms
        ))
    );
}

// ── Files ────────────────────────────────────────────────────────────────────

/// File stem of an input path or URL, e.g. `rx1` for `scans/rx1.jpg`.
fn input_stem(input: &str) -> String {
    let last = input
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(input);
    let last = last.split(['?', '#']).next().unwrap_or(last);
    let stem = Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if stem.is_empty() {
        "prescription".to_string()
    } else {
        stem.to_string()
    }
}

/// Resolve an output flag: the path itself for one input, or
/// `<dir>/<stem>.<ext>` when several inputs are processed.
fn output_path(cli: &Cli, base: &Path, input: &str, ext: &str) -> PathBuf {
    if cli.many() {
        base.join(format!("{}.{ext}", input_stem(input)))
    } else {
        base.to_path_buf()
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn write_exports(cli: &Cli, input: &str, record: &PrescriptionRecord) -> Result<()> {
    if let Some(ref base) = cli.json_out {
        let path = output_path(cli, base, input, "json");
        let mut json = record.to_json_pretty()?;
        json.push('\n');
        write_file(&path, json.as_bytes())?;
        if !cli.quiet {
            eprintln!("   {} {}", dim("json →"), path.display());
        }
    }
    if let Some(ref base) = cli.csv_out {
        let path = output_path(cli, base, input, "csv");
        write_file(&path, &record.medications_csv()?)?;
        if !cli.quiet {
            eprintln!("   {} {}", dim("csv  →"), path.display());
        }
    }
    Ok(())
}

fn write_stages(cli: &Cli, input: &str, stages: &[EnhancementStage]) -> Result<()> {
    let Some(ref base) = cli.steps_dir else {
        return Ok(());
    };
    let dir = if cli.many() {
        base.join(input_stem(input))
    } else {
        base.clone()
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for stage in stages {
        let path = dir.join(format!("{}.png", stage.file_stem()));
        save_image(&stage.image, &path)?;
    }
    if !cli.quiet {
        eprintln!("   {} {} stage images in {}", dim("steps →"), stages.len(), dir.display());
    }
    Ok(())
}

fn save_image(image: &image::DynamicImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("Failed to save image {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_from_paths_and_urls() {
        assert_eq!(input_stem("scans/rx1.jpg"), "rx1");
        assert_eq!(input_stem("https://example.com/a/rx-2.png?sig=abc"), "rx-2");
        assert_eq!(input_stem("C:\\scans\\rx3.jpeg"), "rx3");
        assert_eq!(input_stem("https://example.com/"), "example");
        assert_eq!(input_stem(""), "prescription");
    }

    #[test]
    fn cli_parses_multiple_inputs() {
        let cli = Cli::try_parse_from(["mediscript", "--json", "a.jpg", "b.png"]).unwrap();
        assert_eq!(cli.inputs, vec!["a.jpg", "b.png"]);
        assert!(cli.many());
        assert_eq!(cli.target_height, 1200);
    }
}
