// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use crate::log::format::render_entry;
use crate::log::{Driver, Entry, IdentificationTable};

/// Terminal driver writing rendered entries to stderr.
pub struct StderrDriver {
    ident: Option<IdentificationTable>,
}

impl StderrDriver {
    pub fn new() -> Self {
        Self { ident: None }
    }

    /// Uses `ident` to render thread/process names instead of raw ids.
    pub fn with_identification(ident: IdentificationTable) -> Self {
        Self { ident: Some(ident) }
    }
}

impl Default for StderrDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for StderrDriver {
    fn submit(&mut self, entry: &Entry) {
        eprintln!("{}", render_entry(entry, self.ident.as_ref()));
    }

    fn flush(&mut self) {
        let _ = std::io::stderr().flush();
    }
}
