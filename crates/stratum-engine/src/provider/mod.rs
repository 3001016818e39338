// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider module - back-end dispatch per area.
//!
//! A provider talks to one back-end (a VIM, a Kubernetes cluster) on behalf
//! of one instance in one area. The [`ProviderAggregator`] picks and caches
//! the right provider for each area.

pub mod aggregator;
pub mod mock;
pub mod registry;
mod traits;

pub use aggregator::{ProviderAggregator, ProviderBinding};
pub use mock::{MockProvider, MockProviderData, MockProviderFactory, ProviderCall};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use traits::*;
