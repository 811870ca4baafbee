// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::log::Entry;

/// Terminal sink for processed entries.
pub trait Driver: Send {
    fn submit(&mut self, entry: &Entry);
    fn flush(&mut self);
}

/// In-place transform/filter applied before any driver sees an entry.
/// Returning `false` drops the entry; the first drop ends the chain.
pub trait Policy: Send {
    fn transform_filter(&mut self, entry: &mut Entry) -> bool;
}

/// Lifetime-anchored auxiliary with no per-entry behavior, kept alive as
/// long as the channel (e.g. an id/name table shared with drivers).
pub trait ChannelObject: Send {}

/// A channel attachment. Exactly one of the three capability sets applies
/// to any component; the variant makes the choice explicit at attach time,
/// and the worker dispatches on it without any dynamic type probing.
pub enum Component {
    Driver(Box<dyn Driver>),
    Policy(Box<dyn Policy>),
    Object(Box<dyn ChannelObject>),
}

impl Component {
    pub fn driver(d: impl Driver + 'static) -> Self {
        Component::Driver(Box::new(d))
    }

    pub fn policy(p: impl Policy + 'static) -> Self {
        Component::Policy(Box::new(p))
    }

    pub fn object(o: impl ChannelObject + 'static) -> Self {
        Component::Object(Box::new(o))
    }
}
