// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};

use crate::log::{Entry, IdentificationTable};

/// Renders an entry to the line format shared by text drivers:
/// timestamp, level, source location, thread/process (with names when the
/// identification table knows them), note, then one indented line per
/// watch pair.
pub fn render_entry(entry: &Entry, ident: Option<&IdentificationTable>) -> String {
    use std::fmt::Write;

    let timestamp: DateTime<Utc> = entry.timestamp.into();
    let mut line = format!(
        "{} [{}] @{}:{} {}",
        timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        entry.level.name(),
        entry.source_file,
        entry.source_line,
        entry.source_function,
    );
    let thread = ident
        .and_then(|t| t.thread_name(entry.thread_id))
        .unwrap_or_else(|| entry.thread_id.to_string());
    let process = ident
        .and_then(|t| t.process_name(entry.process_id))
        .unwrap_or_else(|| entry.process_id.to_string());
    let _ = write!(line, " <{thread}:{process}>");
    if !entry.note.is_empty() {
        let _ = write!(line, " {}", entry.note);
    }
    for (symbol, value) in &entry.watches {
        let _ = write!(line, "\n     {symbol} => {value}");
    }
    if let Some(trace) = entry.trace.as_deref() {
        if trace.resolved() {
            let _ = write!(line, "\n{trace:?}");
        }
    }
    line
}
