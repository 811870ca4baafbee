// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::log::ChannelObject;

#[derive(Default)]
struct Tables {
    threads: HashMap<i64, (u32, String)>,
    processes: HashMap<u32, String>,
}

/// Process/thread id→name table.
///
/// Cheap to clone; all clones share the underlying tables. Attached to a
/// channel as an `Object` component so its lifetime covers every driver
/// that renders names from it.
#[derive(Clone, Default)]
pub struct IdentificationTable {
    inner: Arc<RwLock<Tables>>,
}

impl IdentificationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thread(&self, tid: i64, pid: u32, name: impl Into<String>) {
        if let Ok(mut tables) = self.inner.write() {
            tables.threads.insert(tid, (pid, name.into()));
        }
    }

    pub fn add_process(&self, pid: u32, name: impl Into<String>) {
        if let Ok(mut tables) = self.inner.write() {
            tables.processes.insert(pid, name.into());
        }
    }

    pub fn thread_name(&self, tid: i64) -> Option<String> {
        self.inner
            .read()
            .ok()?
            .threads
            .get(&tid)
            .map(|(_, name)| name.clone())
    }

    pub fn process_name(&self, pid: u32) -> Option<String> {
        self.inner.read().ok()?.processes.get(&pid).cloned()
    }
}

impl ChannelObject for IdentificationTable {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_tables() {
        let table = IdentificationTable::new();
        let clone = table.clone();
        table.add_process(42, "game.exe");
        clone.add_thread(7, 42, "render");
        assert_eq!(table.thread_name(7).as_deref(), Some("render"));
        assert_eq!(clone.process_name(42).as_deref(), Some("game.exe"));
        assert_eq!(table.process_name(1), None);
    }
}
