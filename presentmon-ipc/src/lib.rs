// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod gid;
pub mod intro;
pub mod pipe;
pub mod ring;
pub mod shm;
pub mod values;
