//! Command handlers
//!
//! None of these open a browser: they inspect configuration, dry-run the
//! filters, and read the fallback sink.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use super::{CheckArgs, FilterArgs, OutputFormat, PendingArgs};
use crate::config::{Config, SessionConfig};
use crate::filter::{FilterEngine, FilterRule, MatchMode};
use crate::record::Record;
use crate::store::{FallbackSink, JsonFileSink};

/// Show what each session would search for and how records are filtered
pub fn run_check(config: &Config, args: &CheckArgs, output: OutputFormat) -> Result<()> {
    let sessions: Vec<(&String, &SessionConfig)> = match &args.session {
        Some(name) => vec![(name, config.session(name)?)],
        None => config.sessions.iter().collect(),
    };

    // Compiling the rules is the validation
    let rules = config.filters();
    FilterEngine::new(&rules)?;

    if output == OutputFormat::Json {
        let mut summary = serde_json::Map::new();
        for (name, _) in &sessions {
            let plan = config.session_plan(name)?;
            summary.insert(
                name.to_string(),
                serde_json::json!({
                    "collection": plan.collection,
                    "searches": plan.searches,
                    "page_ceiling": plan.settings.page_ceiling,
                    "retry": plan.settings.retry,
                }),
            );
        }
        let json = serde_json::json!({ "sessions": summary, "filters": rules });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("{}", "Configuration OK".green().bold());

    if sessions.is_empty() {
        println!("{}", "No sessions configured.".yellow());
    }
    for (name, session) in sessions {
        let plan = config.session_plan(name)?;
        println!(
            "\n{} {} {}",
            "Session".bright_cyan().bold(),
            name.bold(),
            format!("→ {}", plan.collection).dimmed()
        );
        println!(
            "  pages: {}  retry: {} attempts, base {}s  page attempts: {}",
            plan.settings
                .page_ceiling
                .map(|c| c.to_string())
                .unwrap_or_else(|| "all".to_string()),
            plan.settings.retry.max_attempts,
            plan.settings.retry.base_delay_secs,
            session.page_attempts
        );
        for (i, search) in plan.searches.iter().enumerate() {
            println!("  {:>3}. {}", i + 1, search);
        }
    }

    println!("\n{} ({})", "Filters".bright_cyan().bold(), rules.len());
    for (i, rule) in rules.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, describe_rule(rule));
    }

    Ok(())
}

fn describe_rule(rule: &FilterRule) -> String {
    let mode = match rule.match_mode {
        MatchMode::Any => "any",
        MatchMode::All => "all",
    };
    let mut parts = vec![format!("{}", rule.key.to_string().bold())];
    if !rule.include.is_empty() {
        parts.push(format!("{} of [{}]", mode, rule.include.join(", ")).green().to_string());
    }
    if !rule.exclude.is_empty() {
        parts.push(format!("none of [{}]", rule.exclude.join(", ")).red().to_string());
    }
    parts.join("  ")
}

#[derive(Debug, Serialize)]
struct FilterVerdict {
    id: String,
    accepted: bool,
    /// 1-based index of the first failing rule
    failed_rule: Option<usize>,
}

/// Dry-run the configured filters over saved records
pub fn run_filter(config: &Config, args: &FilterArgs, output: OutputFormat) -> Result<()> {
    if let Some(session) = &args.session {
        config.session(session)?;
    }

    let records = load_records(&args.records)?;
    let engine = FilterEngine::new(&config.filters())?;

    let verdicts: Vec<FilterVerdict> = records
        .iter()
        .map(|record| {
            let failed_rule = engine.first_failure(record);
            FilterVerdict {
                id: record.id.clone(),
                accepted: failed_rule.is_none(),
                failed_rule,
            }
        })
        .collect();

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&verdicts)?);
        return Ok(());
    }

    let accepted = verdicts.iter().filter(|v| v.accepted).count();
    for (record, verdict) in records.iter().zip(&verdicts) {
        let title = record.title.as_deref().unwrap_or("<untitled>");
        match verdict.failed_rule {
            None => println!("  {} {} {}", "✓".green(), verdict.id, title.dimmed()),
            Some(rule) => println!(
                "  {} {} {} {}",
                "✗".red(),
                verdict.id,
                title.dimmed(),
                format!("(rule {})", rule).yellow()
            ),
        }
    }
    println!(
        "\n{} of {} records accepted by {} filters",
        accepted.to_string().green().bold(),
        verdicts.len(),
        engine.len()
    );

    Ok(())
}

fn load_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records: {}", path.display()))
}

/// List records a previous session left in fallback files
pub async fn run_pending(config: &Config, args: &PendingArgs, output: OutputFormat) -> Result<()> {
    let sink = match &args.dir {
        Some(dir) => JsonFileSink::new(dir.clone()),
        None => config.fallback_sink(),
    };
    let pending = sink.load_pending(&args.collection).await?;

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }

    let dir = sink.namespace_dir(&args.collection);
    if pending.is_empty() {
        println!("No pending records in {}", dir.display());
        return Ok(());
    }

    println!(
        "{} pending records in {}",
        pending.len().to_string().yellow().bold(),
        dir.display()
    );
    for record in &pending {
        println!(
            "  {} {}",
            record.id,
            record.title.as_deref().unwrap_or("<untitled>").dimmed()
        );
    }
    Ok(())
}
