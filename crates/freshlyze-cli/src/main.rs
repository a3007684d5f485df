use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use freshlyze_contracts::commands::{parse_intent, SESSION_HELP_COMMANDS};
use freshlyze_contracts::report::FreshnessReport;
use freshlyze_contracts::session::{AnalysisSession, AnalysisStatus};
use freshlyze_engine::{AnalysisEngine, AnalyzerConfig, FreshnessAnalyzer};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "freshlyze", version, about = "Produce freshness analysis with an AI vision model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one image and print the freshness report
    Analyze(AnalyzeArgs),
    /// Interactive analysis session
    Session(SessionArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Path to the produce photo
    image: PathBuf,
    /// Directory for report artifacts and the event log
    #[arg(long)]
    out: Option<PathBuf>,
    /// Event log path (defaults to <out>/events.jsonl)
    #[arg(long)]
    events: Option<PathBuf>,
    /// Vision model name
    #[arg(long)]
    model: Option<String>,
    /// Collaborator timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Use the built-in dry-run collaborator (no credentials, no network)
    #[arg(long)]
    dry_run: bool,
    /// Print the normalized report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    /// Directory for report artifacts and the event log
    #[arg(long)]
    out: Option<PathBuf>,
    /// Event log path (defaults to <out>/events.jsonl)
    #[arg(long)]
    events: Option<PathBuf>,
    /// Vision model name
    #[arg(long)]
    model: Option<String>,
    /// Collaborator timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Use the built-in dry-run collaborator (no credentials, no network)
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("freshlyze error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze_native(args),
        Command::Session(args) => {
            run_session_native(args)?;
            Ok(0)
        }
    }
}

fn build_engine(
    model: Option<&str>,
    timeout_secs: Option<u64>,
    dry_run: bool,
    out: Option<PathBuf>,
    events: Option<PathBuf>,
) -> Result<AnalysisEngine> {
    let events_path = events.or_else(|| out.as_ref().map(|dir| dir.join("events.jsonl")));
    if dry_run {
        return Ok(AnalysisEngine::new(
            FreshnessAnalyzer::dryrun(),
            None,
            out,
            events_path,
        ));
    }

    let mut config = AnalyzerConfig::from_env()?;
    if let Some(model) = model {
        config = config.with_model(model);
    }
    if let Some(secs) = timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    Ok(AnalysisEngine::new(
        FreshnessAnalyzer::gemini(config.clone()),
        Some(config),
        out,
        events_path,
    ))
}

fn run_analyze_native(args: AnalyzeArgs) -> Result<i32> {
    let engine = build_engine(
        args.model.as_deref(),
        args.timeout,
        args.dry_run,
        args.out,
        args.events,
    )?;
    let mut session = AnalysisSession::new();
    engine.analyze_path(&mut session, &args.image)?;

    if let Some(report) = session.result() {
        if args.json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            print!("{}", format_report(report));
        }
        return Ok(0);
    }
    if let Some(message) = session.error_message() {
        eprintln!("Analysis failed: {message}");
    }
    Ok(1)
}

fn run_session_native(args: SessionArgs) -> Result<()> {
    let mut engine = build_engine(
        args.model.as_deref(),
        args.timeout,
        args.dry_run,
        args.out,
        args.events,
    )?;
    let mut session = AnalysisSession::new();

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Freshlyze session started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", SESSION_HELP_COMMANDS.join(" "));
            }
            "status" => {
                println!("{}", format_status(&session, &engine));
            }
            "analyze" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path"))
                else {
                    // The selection event carried no file; nothing changes.
                    println!("/analyze requires a path");
                    continue;
                };
                match engine.analyze_path(&mut session, Path::new(&path)) {
                    Ok(AnalysisStatus::Success) => {
                        if let Some(report) = session.result() {
                            print!("{}", format_report(report));
                        }
                    }
                    Ok(AnalysisStatus::Error) => {
                        if let Some(message) = session.error_message() {
                            println!("Analysis failed: {message}");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => println!("Could not start the analysis: {err:#}"),
                }
            }
            "show_report" => match session.result() {
                Some(report) => print!("{}", format_report(report)),
                None => println!("No report yet. Analyze an image first."),
            },
            "save_report" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path"))
                else {
                    println!("/save requires a path");
                    continue;
                };
                match session.result() {
                    Some(report) => {
                        save_report(report, Path::new(&path))?;
                        println!("Report saved to {path}");
                    }
                    None => println!("No report to save."),
                }
            }
            "reset" => {
                engine.reset(&mut session)?;
                println!("Session reset.");
            }
            "set_model" => {
                let Some(model) = value_as_non_empty_string(intent.command_args.get("model"))
                else {
                    println!("/model requires a name");
                    continue;
                };
                if engine.set_model(&model) {
                    println!("Model set to {model}");
                } else {
                    println!("The dry-run collaborator has no model to swap.");
                }
            }
            "quit" => break,
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            _ => {}
        }
    }

    Ok(())
}

fn save_report(report: &FreshnessReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn format_status(session: &AnalysisSession, engine: &AnalysisEngine) -> String {
    let mut parts = vec![
        format!("status: {}", session.status().as_str()),
        format!("model: {}", engine.model_name()),
    ];
    if let Some(image) = session.image() {
        parts.push(format!(
            "image: {} ({} bytes)",
            image.media_type,
            image.bytes.len()
        ));
    }
    if let Some(message) = session.error_message() {
        parts.push(format!("error: {message}"));
    }
    parts.join("\n")
}

fn format_report(report: &FreshnessReport) -> String {
    let mut out = String::new();
    if !report.is_food {
        out.push_str("No fruit or vegetable detected in this image.\n");
        out.push_str("Try again with a clearer photo of fresh produce.\n");
        return out;
    }

    out.push_str(&format!("{}\n", report.item_name));
    if !report.short_description.is_empty() {
        out.push_str(&format!("{}\n", report.short_description));
    }
    out.push_str(&format!(
        "Freshness: {}/100 ({})\n",
        report.freshness_score, report.freshness_label
    ));
    out.push_str(&format!("Confidence: {}/100\n", report.confidence));
    out.push_str(&format!("Ripeness: {}\n", report.ripeness_level));

    if report.visual_indicators.is_empty() {
        out.push_str("Visual indicators: none reported\n");
    } else {
        out.push_str("Visual indicators:\n");
        for row in &report.visual_indicators {
            out.push_str(&format!("  - {row}\n"));
        }
    }

    out.push_str(&format!("Shelf life: {}\n", report.shelf_life));
    out.push_str(&format!("Storage: {}\n", report.storage_advice));
    out.push_str(&format!("Nutrition: {}\n", report.nutrition_highlights));

    if report.cooking_suggestions.is_empty() {
        out.push_str("Cooking suggestions: none reported\n");
    } else {
        out.push_str("Cooking suggestions:\n");
        for row in &report.cooking_suggestions {
            out.push_str(&format!("  - {row}\n"));
        }
    }

    out.push_str(&format!(
        "Recipe: {}\n  {}\n",
        report.recipe_name, report.recipe_instructions
    ));
    out
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use freshlyze_contracts::report::FreshnessReport;
    use serde_json::json;

    use super::{format_report, value_as_non_empty_string};

    fn food_report() -> FreshnessReport {
        FreshnessReport {
            is_food: true,
            item_name: "Mango".to_string(),
            short_description: "A ripe mango.".to_string(),
            freshness_score: 82,
            freshness_label: "Fresh".to_string(),
            confidence: 90,
            ripeness_level: "Ripe".to_string(),
            visual_indicators: vec!["Golden skin".to_string()],
            shelf_life: "2 days".to_string(),
            storage_advice: "Refrigerate.".to_string(),
            nutrition_highlights: "Vitamin A.".to_string(),
            cooking_suggestions: Vec::new(),
            recipe_name: "Mango lassi".to_string(),
            recipe_instructions: "Blend with yogurt.".to_string(),
        }
    }

    #[test]
    fn not_food_renders_the_fallback_message() {
        let rendered = format_report(&FreshnessReport::default());
        assert!(rendered.contains("No fruit or vegetable detected"));
        assert!(!rendered.contains("Freshness:"));
    }

    #[test]
    fn report_renders_scores_and_empty_list_fallback() {
        let rendered = format_report(&food_report());
        assert!(rendered.contains("Mango"));
        assert!(rendered.contains("Freshness: 82/100 (Fresh)"));
        assert!(rendered.contains("Confidence: 90/100"));
        assert!(rendered.contains("  - Golden skin"));
        assert!(rendered.contains("Cooking suggestions: none reported"));
        assert!(rendered.contains("Recipe: Mango lassi"));
    }

    #[test]
    fn non_empty_string_extraction_trims_and_filters() {
        assert_eq!(
            value_as_non_empty_string(Some(&json!("  a.png  "))),
            Some("a.png".to_string())
        );
        assert_eq!(value_as_non_empty_string(Some(&json!("   "))), None);
        assert_eq!(value_as_non_empty_string(Some(&json!(7))), None);
        assert_eq!(value_as_non_empty_string(None), None);
    }
}
