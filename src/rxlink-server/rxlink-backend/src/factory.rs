// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::Arc;

use rxlink_core::transport::DEFAULT_SAMPLES_PER_PACKET;
use rxlink_core::{Device, DynResult};
use tracing::{error, info};

use crate::adapter::adapt;
use crate::hint::{DefaultHintResolver, HintResolver, ParsedHint};
use crate::udp::UdpTransport;
use crate::{BackendContext, RegistrationContext};

/// Hint meaning "no specific device": use the server default.
const DEFAULT_HINT: &str = "-";

/// An opened device and the transport its samples go out on.
///
/// Dropping the handle closes the device.
pub struct RadioHandle {
    pub device: Box<dyn Device>,
    pub transport: UdpTransport,
    /// Canonical form of the hint the device was built from.
    pub hint: String,
}

impl Drop for RadioHandle {
    fn drop(&mut self) {
        self.device.close();
    }
}

/// Builds devices from hints.
#[derive(Clone)]
pub struct DeviceFactory {
    registry: Arc<RegistrationContext>,
    resolver: Arc<dyn HintResolver>,
    default_hint: Option<String>,
    samples_per_packet: usize,
}

impl DeviceFactory {
    pub fn new(registry: Arc<RegistrationContext>) -> Self {
        Self {
            registry,
            resolver: Arc::new(DefaultHintResolver::default()),
            default_hint: None,
            samples_per_packet: DEFAULT_SAMPLES_PER_PACKET,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HintResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Hint substituted for an empty or `-` request.
    pub fn with_default_hint(mut self, hint: Option<String>) -> Self {
        self.default_hint = hint.filter(|h| !h.trim().is_empty());
        self
    }

    pub fn with_samples_per_packet(mut self, samples: usize) -> Self {
        self.samples_per_packet = samples.max(1);
        self
    }

    pub fn default_hint(&self) -> Option<&str> {
        self.default_hint.as_deref()
    }

    /// Resolve a hint to a backend id and arguments without building it.
    pub fn parse(&self, hint: &str) -> DynResult<ParsedHint> {
        let text = self.effective_hint(hint)?;
        Ok(ParsedHint::parse(text, self.resolver.as_ref())?)
    }

    fn effective_hint<'a>(&'a self, hint: &'a str) -> DynResult<&'a str> {
        let hint = hint.trim();
        if !hint.is_empty() && hint != DEFAULT_HINT {
            return Ok(hint);
        }
        self.default_hint
            .as_deref()
            .ok_or_else(|| "no device hint given and no server default configured".into())
    }

    /// Build, adapt and open a device.
    pub fn create_device(&self, hint: &str) -> DynResult<RadioHandle> {
        let parsed = self.parse(hint)?;
        info!(
            "Creating device: backend={} args=[{}]",
            parsed.backend, parsed.args
        );

        let transport = UdpTransport::new(self.samples_per_packet);
        let instance = self.registry.build(
            &parsed.backend,
            BackendContext {
                args: parsed.args.clone(),
                transport: transport.clone(),
            },
        )?;
        let mut device = adapt(instance)?;

        if let Err(e) = device.open() {
            error!("Failed to open {} device: {}", parsed.backend, e);
            device.close();
            return Err(format!("open failed: {}", e).into());
        }

        Ok(RadioHandle {
            device,
            transport,
            hint: parsed.to_string(),
        })
    }
}
