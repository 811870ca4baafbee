// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous, multi-sink structured logging.
//!
//! Entries are submitted from any thread onto an unbounded MPSC queue and
//! processed in order by a single worker thread, which runs the attached
//! policy chain, resolves captured stack traces, and fans the entry out to
//! every attached driver. Control operations (flush, attach, shutdown) ride
//! the same queue as command packets so they are totally ordered with entry
//! processing.

mod builder;
mod channel;
mod component;
mod drivers;
mod entry;
mod format;
mod ident;
mod panic;
mod policy;

pub use builder::EntryBuilder;
pub use channel::Channel;
pub use component::{ChannelObject, Component, Driver, Policy};
pub use drivers::StderrDriver;
pub use entry::{Entry, Level, Trace};
pub use format::render_entry;
pub use ident::IdentificationTable;
pub use panic::{panic_log, recent_panics};
pub use policy::LevelFilterPolicy;
