// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod device;
pub mod error;
pub mod policies;
pub mod transport;
pub mod tune;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use device::{AntennaSelector, Device, GainRange};
pub use error::{LinkError, LinkResult};
pub use policies::{ReconnectBudget, ReconnectPolicy};
pub use transport::{Destination, NetworkTransport, PacketHeader};
pub use tune::{TuneResult, TuneVerdict};
