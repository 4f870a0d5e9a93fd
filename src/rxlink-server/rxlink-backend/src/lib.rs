// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receiver backends, hint parsing and device construction.
//!
//! Built-in backends:
//! - `sim`: native simulated receiver. Keys: `gain_min`, `gain_max`,
//!   `gain_step`, `gain`, `rate`, `master_clock`, `step`, `lo_error`,
//!   `tolerance`, `antennas` (`"A|B"`), `serial`, `name`, `tone`,
//!   `fail_open`.
//! - `tone`: property-block tone generator. Keys: `pll_step`, `clock_rate`,
//!   `samp_rate`, `tone`, `name`.

use std::collections::BTreeMap;

use rxlink_core::DynResult;
use tracing::warn;

mod adapter;
mod factory;
mod hint;
mod signal;
mod sim;
mod tone;
mod udp;

pub use adapter::{
    adapt, BackendInstance, Bindings, BlockAdapter, Capability, PropertyBlock, PropertyValue,
    SYNONYMS,
};
pub use factory::{DeviceFactory, RadioHandle};
pub use hint::{
    classify, tokenize, ArgValue, DefaultHintResolver, HintArg, HintArgs, HintKind, HintResolver,
    ParsedHint, Separator,
};
pub use signal::{IqSource, ToneParams, ToneSource};
pub use sim::SimDevice;
pub use tone::ToneBlock;
pub use udp::{SamplePump, UdpTransport};

/// What a backend constructor receives: parsed hint arguments and the sink
/// its samples go to.
#[derive(Clone)]
pub struct BackendContext {
    pub args: HintArgs,
    pub transport: UdpTransport,
}

pub type BackendFactory = fn(BackendContext) -> DynResult<BackendInstance>;

/// Canonical backend id: trimmed and upper-cased, the form hints resolve to.
pub fn backend_id(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

#[derive(Clone, Copy)]
struct BackendEntry {
    factory: BackendFactory,
    summary: &'static str,
}

/// Backend table the factory builds from. Built-ins and plugins register
/// into it at startup; it is read-only afterwards.
#[derive(Clone, Default)]
pub struct RegistrationContext {
    entries: BTreeMap<String, BackendEntry>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `id`. A later registration replaces an
    /// earlier one, so plugins can override built-ins.
    pub fn register_backend(&mut self, id: &str, summary: &'static str, factory: BackendFactory) {
        let id = backend_id(id);
        if self
            .entries
            .insert(id.clone(), BackendEntry { factory, summary })
            .is_some()
        {
            warn!("Backend {} registered twice; keeping the later one", id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(&backend_id(id))
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// `(id, summary)` pairs, sorted by id.
    pub fn describe(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.as_str(), entry.summary))
    }

    /// Instantiate backend `id`.
    pub fn build(&self, id: &str, context: BackendContext) -> DynResult<BackendInstance> {
        let key = backend_id(id);
        let entry = self.entries.get(&key).ok_or_else(|| {
            format!(
                "unknown backend: {} (available: {})",
                key,
                self.ids().join(", ")
            )
        })?;
        (entry.factory)(context)
    }
}

/// Register all built-in backends on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_backend("sim", "simulated tuner with synthesizer error", sim_factory);
    context.register_backend("tone", "property-block tone generator", tone_factory);
}

fn sim_factory(context: BackendContext) -> DynResult<BackendInstance> {
    let device = SimDevice::from_args(&context.args, context.transport)?;
    Ok(BackendInstance::Native(Box::new(device)))
}

fn tone_factory(context: BackendContext) -> DynResult<BackendInstance> {
    let block = ToneBlock::from_args(&context.args, context.transport)?;
    Ok(BackendInstance::Block(Box::new(block)))
}
