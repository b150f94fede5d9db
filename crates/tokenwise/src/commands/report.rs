use super::session::newest_session_log;
use crate::cli::Scope;
use chrono::{DateTime, Local, NaiveDate};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokenwise_core::{CacheManager, Config};
use tokenwise_telemetry::{
    read_jsonl_counted, CacheEvent, CacheOutcome, Paths, PromptRecord, SessionEvent, SessionEventKind,
    ToolUsageRecord,
};
use tokenwise_transcript::{parse_file, SessionArchiver, SessionSummary};

const NO_DATA: &str = "No data available";

pub fn run(scope: Scope) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths);
    println!("{}", summarize(&paths, &config, scope));
    Ok(())
}

/// Everything a report is built from. Missing sources are `None`.
#[derive(Debug, Default)]
struct ReportData {
    label: String,
    sessions: Vec<SessionSummary>,
    cache_events: Option<Vec<CacheEvent>>,
    cache_entries: usize,
    prompts: Option<Vec<PromptRecord>>,
    tool_usage: Option<Vec<ToolUsageRecord>>,
    session_events: Vec<SessionEvent>,
    /// Daily log lines that failed to decode
    skipped_lines: usize,
    baseline: bool,
}

pub fn summarize(paths: &Paths, config: &Config, scope: Scope) -> String {
    build_report(&collect(paths, config, scope, Local::now().date_naive()))
}

fn collect(paths: &Paths, config: &Config, scope: Scope, today: NaiveDate) -> ReportData {
    let (label, logs, session_filter) = match scope {
        Scope::CurrentSession => {
            let session = current_session(paths, config);
            let label = match &session {
                Some((id, _)) => format!("current session {id}"),
                None => "current session".to_string(),
            };
            match session {
                Some((id, log)) => (label, vec![log], Some(id)),
                None => (label, Vec::new(), None),
            }
        }
        Scope::Today => (format!("today ({today})"), logs_modified_on(paths, today), None),
    };

    let sessions: Vec<SessionSummary> = logs
        .iter()
        .filter_map(|log| match parse_file(log) {
            Ok(transcript) if !transcript.is_empty() => {
                Some(SessionSummary::from_transcript(&transcript, &config.pricing))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %log.display(), error = %e, "skipping unreadable session log");
                None
            }
        })
        .collect();

    let in_scope = |sid: &Option<String>| match &session_filter {
        Some(id) => sid.as_deref() == Some(id.as_str()),
        None => true,
    };

    let mut skipped_lines = 0;
    let cache_events: Option<Vec<CacheEvent>> =
        read_daily::<CacheEvent>(&paths.cache_events_log(today), &mut skipped_lines)
            .map(|events| events.into_iter().filter(|e| in_scope(&e.session_id)).collect());
    let prompts: Option<Vec<PromptRecord>> =
        read_daily::<PromptRecord>(&paths.prompt_log(today), &mut skipped_lines)
            .map(|records| records.into_iter().filter(|r| in_scope(&r.session_id)).collect());
    let tool_usage: Option<Vec<ToolUsageRecord>> =
        read_daily::<ToolUsageRecord>(&paths.tool_usage_log(today), &mut skipped_lines)
            .map(|records| records.into_iter().filter(|r| in_scope(&r.session_id)).collect());
    let session_events: Vec<SessionEvent> =
        read_daily::<SessionEvent>(&paths.session_events_log(), &mut skipped_lines)
            .unwrap_or_default()
            .into_iter()
            .filter(|e| in_scope(&e.session_id))
            .filter(|e| session_filter.is_some() || e.timestamp.with_timezone(&Local).date_naive() == today)
            .collect();

    ReportData {
        label,
        sessions,
        cache_events,
        cache_entries: CacheManager::new(paths.clone(), config.clone()).stats().entries(),
        prompts,
        tool_usage,
        session_events,
        skipped_lines,
        baseline: !config.caching_enabled || !config.optimization_enabled,
    }
}

/// Tracked session, else the newest raw log
fn current_session(paths: &Paths, config: &Config) -> Option<(String, PathBuf)> {
    if let Some(state) = SessionArchiver::new(paths.clone(), config).state() {
        let log = paths.session_log(&state.session_id);
        if log.exists() {
            return Some((state.session_id, log));
        }
    }
    let log = newest_session_log(paths)?;
    let id = log.file_stem()?.to_string_lossy().into_owned();
    Some((id, log))
}

fn logs_modified_on(paths: &Paths, day: NaiveDate) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(paths.sessions_dir()) else {
        return Vec::new();
    };
    let mut logs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .filter(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .map(|t| DateTime::<Local>::from(t).date_naive() == day)
                .unwrap_or(false)
        })
        .collect();
    logs.sort();
    logs
}

/// `None` when the log is missing or unreadable; undecodable lines are
/// counted into `skipped`
fn read_daily<T: for<'de> serde::Deserialize<'de>>(path: &Path, skipped: &mut usize) -> Option<Vec<T>> {
    if !path.exists() {
        return None;
    }
    match read_jsonl_counted(path) {
        Ok((records, bad)) => {
            if bad > 0 {
                tracing::warn!(path = %path.display(), skipped = bad, "skipped undecodable log lines");
            }
            *skipped += bad;
            Some(records)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read log");
            None
        }
    }
}

fn build_report(data: &ReportData) -> String {
    let mut sections = vec![format!(
        "Tokenwise Report: {}\n{}",
        data.label,
        "=".repeat(18 + data.label.len())
    )];

    sections.push(format!("\nSession\n-------\n{}", session_section(&data.sessions)));
    sections.push(format!("\nCache\n-----\n{}", cache_section(data)));
    sections.push(format!(
        "\nPrompt Optimization\n-------------------\n{}",
        prompt_section(data.prompts.as_deref())
    ));
    sections.push(format!("\nTool Usage\n----------\n{}", tool_section(data)));
    sections.push(format!(
        "\nRecommendations\n---------------\n{}",
        recommendations(data).join("\n")
    ));

    sections.join("\n")
}

fn session_section(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return NO_DATA.to_string();
    }

    let messages: usize = sessions.iter().map(|s| s.message_count).sum();
    let tools: usize = sessions.iter().map(|s| s.tool_calls).sum();
    let usage: tokenwise_telemetry::TokenUsage = sessions.iter().map(|s| s.usage).sum();
    let cost: f64 = sessions.iter().map(|s| s.estimated_cost).sum();
    let orphans: usize = sessions.iter().map(|s| s.orphan_results).sum();
    let malformed: usize = sessions.iter().map(|s| s.malformed_records).sum();

    format!(
        "Sessions: {} | Messages: {} | Tool calls: {}\n\
         Tokens in: {} | Tokens out: {} | Cache read: {} | Cache write: {}\n\
         Estimated cost: ${:.4}\n\
         Orphan tool results: {} | Malformed records: {}",
        sessions.len(),
        messages,
        tools,
        usage.tokens_in(),
        usage.tokens_out(),
        usage.cache_read,
        usage.cache_creation,
        cost,
        orphans,
        malformed
    )
}

#[derive(Debug, Default, PartialEq)]
struct CacheTotals {
    hits: usize,
    misses: usize,
    stores: usize,
    tokens_served: usize,
}

impl CacheTotals {
    fn from_events(events: &[CacheEvent]) -> Self {
        let mut totals = Self::default();
        for event in events {
            match event.outcome {
                CacheOutcome::Hit => {
                    totals.hits += 1;
                    totals.tokens_served += event.estimated_tokens;
                }
                CacheOutcome::Miss => totals.misses += 1,
                CacheOutcome::Store => totals.stores += 1,
            }
        }
        totals
    }

    fn lookups(&self) -> usize {
        self.hits + self.misses
    }

    fn hit_rate(&self) -> f64 {
        if self.lookups() == 0 {
            return 0.0;
        }
        self.hits as f64 / self.lookups() as f64 * 100.0
    }
}

fn cache_section(data: &ReportData) -> String {
    let events = match data.cache_events.as_deref() {
        Some(events) if !events.is_empty() => events,
        _ => return format!("{NO_DATA}\nEntries stored: {}", data.cache_entries),
    };
    let totals = CacheTotals::from_events(events);
    format!(
        "Lookups: {} (hits {}, misses {}) | Stores: {}\n\
         Hit rate: {:.1}%\n\
         Estimated tokens served from cache: {}\n\
         Entries stored: {}",
        totals.lookups(),
        totals.hits,
        totals.misses,
        totals.stores,
        totals.hit_rate(),
        totals.tokens_served,
        data.cache_entries
    )
}

#[derive(Debug, Default, PartialEq)]
struct PromptTotals {
    prompts: usize,
    optimized: usize,
    baseline: usize,
    simple: usize,
    original_chars: usize,
    chars_saved: usize,
    baseline_chars: usize,
    optimized_chars: usize,
}

impl PromptTotals {
    fn from_records(records: &[PromptRecord]) -> Self {
        let mut totals = Self {
            prompts: records.len(),
            ..Self::default()
        };
        for record in records {
            if record.baseline {
                totals.baseline += 1;
                totals.baseline_chars += record.original_chars();
            } else {
                totals.optimized_chars += record.optimized_chars();
            }
            if record.optimization_applied {
                totals.optimized += 1;
            }
            if record.is_simple_query {
                totals.simple += 1;
            }
            totals.original_chars += record.original_chars();
            totals.chars_saved += record.char_savings;
        }
        totals
    }

    fn simple_rate(&self) -> f64 {
        let eligible = self.prompts - self.baseline;
        if eligible == 0 {
            return 0.0;
        }
        self.simple as f64 / eligible as f64 * 100.0
    }

    /// Average prompt length sent with and without optimization
    fn ab_comparison(&self) -> Option<(f64, f64)> {
        let optimized_prompts = self.prompts - self.baseline;
        if self.baseline == 0 || optimized_prompts == 0 {
            return None;
        }
        Some((
            self.baseline_chars as f64 / self.baseline as f64,
            self.optimized_chars as f64 / optimized_prompts as f64,
        ))
    }

    fn compression_ratio(&self) -> f64 {
        if self.original_chars == 0 {
            return 0.0;
        }
        self.chars_saved as f64 / self.original_chars as f64 * 100.0
    }
}

fn prompt_section(records: Option<&[PromptRecord]>) -> String {
    let records = match records {
        Some(records) if !records.is_empty() => records,
        _ => return NO_DATA.to_string(),
    };
    let totals = PromptTotals::from_records(records);
    let mut section = format!(
        "Prompts: {} | Optimized: {} | Baseline: {}\n\
         Chars saved: {} ({:.1}% of input)\n\
         Simple queries: {} ({:.1}%)",
        totals.prompts,
        totals.optimized,
        totals.baseline,
        totals.chars_saved,
        totals.compression_ratio(),
        totals.simple,
        totals.simple_rate()
    );
    if let Some((baseline, optimized)) = totals.ab_comparison() {
        let saved = if baseline > 0.0 { (1.0 - optimized / baseline) * 100.0 } else { 0.0 };
        section.push_str(&format!(
            "\nA/B: baseline avg {baseline:.0} chars vs optimized avg {optimized:.0} chars ({saved:.1}% saved)"
        ));
    }
    section
}

fn tool_section(data: &ReportData) -> String {
    let records = match data.tool_usage.as_deref() {
        Some(records) if !records.is_empty() => records,
        _ => return NO_DATA.to_string(),
    };

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.tool_name.as_str()).or_insert(0) += 1;
    }
    let mut by_tool: Vec<(&str, usize)> = counts.into_iter().collect();
    by_tool.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let failed = records.iter().filter(|r| !r.success).count();
    let count_event = |kind: SessionEventKind| data.session_events.iter().filter(|e| e.event == kind).count();

    format!(
        "Calls: {} | Failed: {}\n\
         By tool: {}\n\
         Stops: {} | Compactions: {}",
        records.len(),
        failed,
        by_tool
            .iter()
            .map(|(name, count)| format!("{name} {count}"))
            .collect::<Vec<_>>()
            .join(", "),
        count_event(SessionEventKind::Stop),
        count_event(SessionEventKind::PreCompact)
    )
}

fn recommendations(data: &ReportData) -> Vec<String> {
    let mut recs = Vec::new();

    if data.baseline {
        recs.push(
            "- Baseline mode is active; delete .claude/.optimization_disabled to re-enable caching and prompt optimization"
                .to_string(),
        );
    }

    if let Some(events) = data.cache_events.as_deref() {
        let totals = CacheTotals::from_events(events);
        if totals.lookups() >= 10 && totals.hit_rate() < 10.0 {
            recs.push(
                "- Cache hit rate is low; most tool calls are unique or invalidated before reuse"
                    .to_string(),
            );
        }
    }

    if let Some(records) = data.prompts.as_deref() {
        let totals = PromptTotals::from_records(records);
        if totals.simple_rate() > 20.0 {
            recs.push(
                "- Consider routing simple queries to a cheaper model (e.g. Haiku) for additional savings"
                    .to_string(),
            );
        }
        if totals.prompts - totals.baseline >= 5 && totals.compression_ratio() < 5.0 {
            recs.push("- Prompt compression is minimal; prompts are already concise".to_string());
        }
        if totals.baseline == 0 && totals.prompts >= 5 {
            recs.push(
                "- No baseline prompts recorded; create .claude/.optimization_disabled for a while to measure savings"
                    .to_string(),
            );
        }
    }

    let orphans: usize = data.sessions.iter().map(|s| s.orphan_results).sum();
    if orphans > 0 {
        recs.push(format!(
            "- {orphans} tool result(s) had no matching tool use; the session log may be truncated"
        ));
    }

    if data.skipped_lines > 0 {
        recs.push(format!(
            "- {} daily log line(s) could not be decoded and were skipped",
            data.skipped_lines
        ));
    }

    if recs.is_empty() {
        recs.push("- Nothing to flag".to_string());
    }
    recs
}
