// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::log::{Channel, Entry, Level, Trace};

/// Fluent builder for log entries. The entry is submitted to its destination
/// channel when the builder drops, so a bare statement like
///
/// ```ignore
/// pmlog!(channel, Level::Info).note("service started");
/// ```
///
/// logs without any explicit commit call. Rate controls (`every`, `first`,
/// `after`) consult a per-callsite hit counter supplied by the logging
/// macro; without one they are inert.
pub struct EntryBuilder<'a> {
    entry: Option<Entry>,
    dest: Option<&'a Channel>,
    hit: Option<u32>,
    suppressed: bool,
}

impl<'a> EntryBuilder<'a> {
    pub fn new(
        level: Level,
        source_file: &'static str,
        source_function: &'static str,
        source_line: u32,
    ) -> Self {
        Self {
            entry: Some(Entry::new(level, source_file, source_function, source_line)),
            dest: None,
            hit: None,
            suppressed: false,
        }
    }

    /// Sets the destination channel; without one the entry is discarded.
    pub fn to(mut self, channel: &'a Channel) -> Self {
        self.dest = Some(channel);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        if let Some(entry) = self.entry.as_mut() {
            entry.note = note.into();
        }
        self
    }

    /// Records a (symbol, rendered value) watch pair.
    pub fn watch(mut self, symbol: &'static str, value: &dyn std::fmt::Debug) -> Self {
        if let Some(entry) = self.entry.as_mut() {
            entry.watches.push((symbol, format!("{value:?}")));
        }
        self
    }

    /// Captures an unresolved stack trace; resolution happens on the worker.
    pub fn trace(mut self) -> Self {
        if let Some(entry) = self.entry.as_mut() {
            entry.trace = Some(Box::new(Trace::capture()));
        }
        self
    }

    /// Supplies the per-callsite hit count (1-based) that rate controls use.
    pub fn hit(mut self, hit: u32) -> Self {
        self.hit = Some(hit);
        self
    }

    /// Keeps one entry in `n`; `include_first` anchors the kept entry at the
    /// first hit rather than the n-th.
    pub fn every(mut self, n: u32, include_first: bool) -> Self {
        if let Some(hit) = self.hit {
            let keep = if include_first {
                (hit - 1) % n == 0
            } else {
                hit % n == 0
            };
            self.suppressed |= !keep;
        }
        self
    }

    /// Keeps only the first `n` hits of this callsite.
    pub fn first(mut self, n: u32) -> Self {
        if let Some(hit) = self.hit {
            self.suppressed |= hit > n;
        }
        self
    }

    /// Suppresses the first `n` hits of this callsite.
    pub fn after(mut self, n: u32) -> Self {
        if let Some(hit) = self.hit {
            self.suppressed |= hit <= n;
        }
        self
    }

    /// Appends the callsite hit count as a watch pair.
    pub fn hitcount(mut self) -> Self {
        if let (Some(entry), Some(hit)) = (self.entry.as_mut(), self.hit) {
            entry.watches.push(("hitcount", hit.to_string()));
        }
        self
    }
}

impl Drop for EntryBuilder<'_> {
    fn drop(&mut self) {
        if self.suppressed {
            return;
        }
        if let (Some(entry), Some(dest)) = (self.entry.take(), self.dest) {
            dest.submit(entry);
        }
    }
}

/// Builds an [`EntryBuilder`] bound to `channel` with the callsite's source
/// location and a per-callsite hit counter.
#[macro_export]
macro_rules! pmlog {
    ($channel:expr, $level:expr) => {{
        static HITS: ::std::sync::atomic::AtomicU32 = ::std::sync::atomic::AtomicU32::new(0);
        let hit = HITS.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed) + 1;
        $crate::log::EntryBuilder::new($level, file!(), module_path!(), line!())
            .hit(hit)
            .to($channel)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{Component, Driver};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct NoteDriver(Arc<Mutex<Vec<String>>>);

    impl Driver for NoteDriver {
        fn submit(&mut self, entry: &Entry) {
            self.0.lock().unwrap().push(entry.note.clone());
        }

        fn flush(&mut self) {}
    }

    #[test]
    fn builder_submits_on_drop() {
        let driver = NoteDriver::default();
        let channel = Channel::new(vec![Component::driver(driver.clone())]);
        EntryBuilder::new(Level::Info, file!(), module_path!(), line!())
            .to(&channel)
            .note("built");
        channel.flush();
        assert_eq!(*driver.0.lock().unwrap(), vec!["built".to_string()]);
    }

    #[test]
    fn every_keeps_one_in_n() {
        let driver = NoteDriver::default();
        let channel = Channel::new(vec![Component::driver(driver.clone())]);
        for hit in 1..=6 {
            EntryBuilder::new(Level::Info, file!(), module_path!(), line!())
                .to(&channel)
                .hit(hit)
                .every(3, true)
                .note(format!("{hit}"));
        }
        channel.flush();
        assert_eq!(
            *driver.0.lock().unwrap(),
            vec!["1".to_string(), "4".to_string()]
        );
    }

    #[test]
    fn first_and_after_partition_hits() {
        let driver = NoteDriver::default();
        let channel = Channel::new(vec![Component::driver(driver.clone())]);
        for hit in 1..=4 {
            EntryBuilder::new(Level::Info, file!(), module_path!(), line!())
                .to(&channel)
                .hit(hit)
                .first(2)
                .note(format!("first{hit}"));
            EntryBuilder::new(Level::Info, file!(), module_path!(), line!())
                .to(&channel)
                .hit(hit)
                .after(2)
                .note(format!("after{hit}"));
        }
        channel.flush();
        assert_eq!(
            *driver.0.lock().unwrap(),
            vec![
                "first1".to_string(),
                "first2".to_string(),
                "after3".to_string(),
                "after4".to_string()
            ]
        );
    }

    #[test]
    fn pmlog_macro_counts_hits_per_callsite() {
        let driver = NoteDriver::default();
        let channel = Channel::new(vec![Component::driver(driver.clone())]);
        for _ in 0..4 {
            pmlog!(&channel, Level::Info).every(2, true).note("tick");
        }
        channel.flush();
        assert_eq!(driver.0.lock().unwrap().len(), 2);
    }
}
