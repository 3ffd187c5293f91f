// SPDX-License-Identifier: MPL-2.0

mod client;
pub mod types;

pub use client::{NexusApi, NexusClient, NexusError};
