// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster module - access to the container orchestration cluster.

pub mod kubernetes;
pub mod mock;
mod traits;

pub use kubernetes::KubeCluster;
pub use mock::{MockCluster, MockDeletion};
pub use traits::*;
