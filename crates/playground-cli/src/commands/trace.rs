//! Trace command - Rebuild call trees from captured program output

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use playground_core::{SpanNode, TraceForest};
use std::path::PathBuf;

pub async fn execute(file: PathBuf, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let forest = TraceForest::from_lines(content.lines());

    if json {
        println!("{}", serde_json::to_string_pretty(&forest)?);
    } else {
        print_forest(&forest);
    }
    Ok(())
}

/// Print every trace as an indented tree
pub fn print_forest(forest: &TraceForest) {
    if forest.is_empty() {
        println!("{}", "No spans recorded".dimmed());
        return;
    }
    println!("{} ({} spans)", "Traces".bold().underline(), forest.len());
    for root in forest.roots() {
        println!();
        println!("{} {}", "trace".dimmed(), root.trace_id.cyan());
        print_node(root, 1);
    }
}

fn print_node(node: &SpanNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let name = if node.is_external() {
        node.name().dimmed().italic()
    } else {
        node.name().bold()
    };

    let timing = match (&node.detail, node.duration()) {
        (Some(detail), Some(duration)) => format!(
            "{} +{}",
            format_time(detail.start_time),
            format_duration(duration)
        ),
        (Some(detail), None) => format!("{} {}", format_time(detail.start_time), "running".yellow()),
        (None, _) => String::new(),
    };
    println!("{}{} {} {}", indent, name, node.span_id.dimmed(), timing);

    for event in &node.events {
        println!("{}  {} {}", indent, "•".blue(), event.name);
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

fn format_time(nanos: u64) -> String {
    let secs = (nanos / 1_000_000_000) as i64;
    let sub = (nanos % 1_000_000_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, sub)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| nanos.to_string())
}

fn format_duration(nanos: u64) -> String {
    if nanos >= 1_000_000_000 {
        format!("{:.2}s", nanos as f64 / 1e9)
    } else if nanos >= 1_000_000 {
        format!("{:.1}ms", nanos as f64 / 1e6)
    } else {
        format!("{}µs", nanos / 1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(2_500_000_000), "2.50s");
        assert_eq!(format_duration(1_500_000), "1.5ms");
        assert_eq!(format_duration(42_000), "42µs");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(1_500_000_000), "00:00:01.500");
    }
}
