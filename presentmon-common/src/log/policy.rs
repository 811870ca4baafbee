// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::log::{Entry, Level, Policy};

/// Drops every entry less severe than the configured floor.
pub struct LevelFilterPolicy {
    floor: Level,
}

impl LevelFilterPolicy {
    pub fn new(floor: Level) -> Self {
        Self { floor }
    }
}

impl Policy for LevelFilterPolicy {
    fn transform_filter(&mut self, entry: &mut Entry) -> bool {
        entry.level <= self.floor
    }
}
