// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime module - engine backends and the call gate.

pub mod docker;
pub mod gate;
pub mod mock;
mod traits;

pub use docker::DockerRuntime;
pub use gate::{RuntimeGate, RuntimeTimeouts};
pub use mock::MockRuntime;
pub use traits::*;
