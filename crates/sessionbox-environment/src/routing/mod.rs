// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Routing strategies - how preview containers are reached.

pub mod port_mapping;
pub mod reverse_proxy;
mod traits;

pub use port_mapping::{PortMappingConfig, PortMappingRouting};
pub use reverse_proxy::{ReverseProxyConfig, ReverseProxyRouting};
pub use traits::*;
