// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client side of the PresentMon core.
//!
//! The middleware connects to the service's control pipe, opens the
//! introspection segment, negotiates per-process frame streams, and
//! evaluates dynamic queries against the resulting rings.

pub mod comms;
pub mod middleware;
pub mod pipe_client;
pub mod query;
pub mod stream;

pub use comms::{CommsError, MiddlewareComms};
pub use middleware::{Middleware, MiddlewareError, MiddlewareOptions};
pub use query::{DynamicQuery, QueryElement, QueryError};
pub use stream::StreamClient;
