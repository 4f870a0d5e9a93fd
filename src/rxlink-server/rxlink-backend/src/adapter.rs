// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Adapters from backend instances to [`Device`].
//!
//! Native backends implement [`Device`] directly. Property-block backends
//! expose named properties instead; [`BlockAdapter`] binds each capability to
//! one of those names through [`SYNONYMS`] when it is constructed, so no
//! name lookup happens per call.

use std::collections::HashMap;

use rxlink_core::device::{check_gain, check_sample_rate};
use rxlink_core::{AntennaSelector, Device, DynResult, GainRange, TuneResult};

/// Value of a block property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
    Range(GainRange),
}

impl PropertyValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(v) => Some(*v),
            PropertyValue::Text(t) => t.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            PropertyValue::Text(t) => Some(t.clone()),
            PropertyValue::Number(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

/// A processing block configured through named properties.
pub trait PropertyBlock: Send {
    /// Names of every property the block exposes.
    fn properties(&self) -> Vec<&'static str>;
    fn get(&self, name: &str) -> Option<PropertyValue>;
    fn set(&mut self, name: &str, value: PropertyValue) -> DynResult<()>;
    fn start(&mut self) -> DynResult<()>;
    fn stop(&mut self) -> DynResult<()>;
    fn is_running(&self) -> bool;
}

/// What a backend constructor produced.
pub enum BackendInstance {
    Native(Box<dyn Device>),
    Block(Box<dyn PropertyBlock>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Name,
    Serial,
    Freq,
    Gain,
    GainRange,
    SampleRate,
    MasterClock,
    Antenna,
    Antennas,
    Tolerance,
}

/// Property names accepted for each capability, in preference order.
pub const SYNONYMS: &[(Capability, &[&str])] = &[
    (Capability::Name, &["name", "identity", "hw_name"]),
    (Capability::Serial, &["serial", "serial_number"]),
    (Capability::Freq, &["freq", "center_freq", "frequency", "rf_freq"]),
    (Capability::Gain, &["gain", "rf_gain", "lna_gain"]),
    (Capability::GainRange, &["gain_range", "rf_gain_range"]),
    (Capability::SampleRate, &["sample_rate", "samp_rate", "rate"]),
    (Capability::MasterClock, &["master_clock", "clock_rate", "xtal_freq"]),
    (Capability::Antenna, &["antenna", "ant"]),
    (Capability::Antennas, &["antennas", "antenna_list"]),
    (Capability::Tolerance, &["freq_tolerance", "tune_tolerance"]),
];

const REQUIRED: &[Capability] = &[
    Capability::Freq,
    Capability::Gain,
    Capability::GainRange,
    Capability::SampleRate,
];

/// Capability to property-name table resolved for one block.
#[derive(Debug, Clone, Default)]
pub struct Bindings(HashMap<Capability, &'static str>);

impl Bindings {
    /// Bind every capability the block offers. Fails when a required
    /// capability has no matching property.
    pub fn resolve(block: &dyn PropertyBlock) -> DynResult<Self> {
        let offered = block.properties();
        let mut table = HashMap::new();
        for (capability, names) in SYNONYMS {
            if let Some(name) = names.iter().find(|n| offered.contains(*n)) {
                table.insert(*capability, *name);
            }
        }
        let missing: Vec<String> = REQUIRED
            .iter()
            .filter(|c| !table.contains_key(*c))
            .map(|c| format!("{:?}", c))
            .collect();
        if !missing.is_empty() {
            return Err(format!("block lacks required properties: {}", missing.join(", ")).into());
        }
        Ok(Self(table))
    }

    pub fn property(&self, capability: Capability) -> Option<&'static str> {
        self.0.get(&capability).copied()
    }
}

/// Adapt whatever a backend built into a [`Device`].
pub fn adapt(instance: BackendInstance) -> DynResult<Box<dyn Device>> {
    match instance {
        BackendInstance::Native(device) => Ok(device),
        BackendInstance::Block(block) => Ok(Box::new(BlockAdapter::new(block)?)),
    }
}

pub struct BlockAdapter {
    block: Box<dyn PropertyBlock>,
    bindings: Bindings,
    last_tune: Option<TuneResult>,
    last_error: Option<String>,
}

impl BlockAdapter {
    pub fn new(block: Box<dyn PropertyBlock>) -> DynResult<Self> {
        let bindings = Bindings::resolve(block.as_ref())?;
        Ok(Self {
            block,
            bindings,
            last_tune: None,
            last_error: None,
        })
    }

    fn read(&self, capability: Capability) -> Option<PropertyValue> {
        self.bindings
            .property(capability)
            .and_then(|name| self.block.get(name))
    }

    fn read_number(&self, capability: Capability) -> Option<f64> {
        self.read(capability).as_ref().and_then(PropertyValue::as_number)
    }

    fn write(&mut self, capability: Capability, value: PropertyValue) -> DynResult<()> {
        let Some(name) = self.bindings.property(capability) else {
            return self.record(Err(format!("{:?} is not supported by this block", capability).into()));
        };
        let result = self.block.set(name, value);
        self.record(result)
    }

    fn record<T>(&mut self, result: DynResult<T>) -> DynResult<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }
}

impl Device for BlockAdapter {
    fn open(&mut self) -> DynResult<()> {
        if self.antenna().is_none() {
            if let Some(first) = self.antennas().into_iter().next() {
                self.write(Capability::Antenna, PropertyValue::Text(first))?;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.block.stop() {
            self.last_error = Some(e.to_string());
        }
    }

    fn start(&mut self) -> DynResult<()> {
        let result = self.block.start();
        self.record(result)
    }

    fn stop(&mut self) -> DynResult<()> {
        let result = self.block.stop();
        self.record(result)
    }

    fn is_running(&self) -> bool {
        self.block.is_running()
    }

    fn name(&self) -> DynResult<String> {
        self.read(Capability::Name)
            .as_ref()
            .and_then(PropertyValue::as_text)
            .ok_or_else(|| "block does not report a name".into())
    }

    fn serial(&self) -> DynResult<Option<String>> {
        Ok(self
            .read(Capability::Serial)
            .as_ref()
            .and_then(PropertyValue::as_text))
    }

    fn gain_range(&self) -> GainRange {
        match self.read(Capability::GainRange) {
            Some(PropertyValue::Range(range)) => range,
            _ => GainRange::default(),
        }
    }

    fn gain(&self) -> f64 {
        self.read_number(Capability::Gain).unwrap_or(0.0)
    }

    fn set_gain(&mut self, gain: f64) -> DynResult<()> {
        let range = self.gain_range();
        let gain = self.record(check_gain(&range, gain))?;
        self.write(Capability::Gain, PropertyValue::Number(gain))
    }

    fn sample_rate(&self) -> f64 {
        self.read_number(Capability::SampleRate).unwrap_or(0.0)
    }

    fn set_sample_rate(&mut self, rate: f64) -> DynResult<()> {
        let rate = self.record(check_sample_rate(rate))?;
        self.write(Capability::SampleRate, PropertyValue::Number(rate))
    }

    fn master_clock(&self) -> f64 {
        self.read_number(Capability::MasterClock)
            .unwrap_or_else(|| self.sample_rate())
    }

    fn freq(&self) -> f64 {
        self.read_number(Capability::Freq).unwrap_or(0.0)
    }

    fn set_freq(&mut self, hz: f64) -> DynResult<TuneResult> {
        if !hz.is_finite() || hz < 0.0 {
            return self.record(Err(format!("invalid frequency: {}", hz).into()));
        }
        self.write(Capability::Freq, PropertyValue::Number(hz))?;
        // The block may land elsewhere; read back what it achieved.
        let actual = self.freq();
        let offset = actual - hz;
        let result = TuneResult {
            target_rf_hz: hz,
            actual_rf_hz: actual,
            target_baseband_hz: offset,
            actual_baseband_hz: offset,
        };
        self.last_tune = Some(result);
        Ok(result)
    }

    fn freq_tolerance(&self) -> Option<f64> {
        self.read_number(Capability::Tolerance)
    }

    fn last_tune_result(&self) -> Option<TuneResult> {
        self.last_tune
    }

    fn antennas(&self) -> Vec<String> {
        match self.read(Capability::Antennas) {
            Some(PropertyValue::List(list)) => list,
            Some(PropertyValue::Text(text)) => text
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn antenna(&self) -> Option<String> {
        self.read(Capability::Antenna)
            .as_ref()
            .and_then(PropertyValue::as_text)
            .filter(|a| !a.is_empty())
    }

    fn set_antenna(&mut self, antenna: &AntennaSelector) -> DynResult<()> {
        let antennas = self.antennas();
        let Some(name) = antenna.resolve(&antennas).map(str::to_string) else {
            return self.record(Err(format!("unknown antenna: {}", antenna).into()));
        };
        self.write(Capability::Antenna, PropertyValue::Text(name))
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxlink_core::TuneVerdict;

    /// Block that snaps frequency to 1 kHz and stores everything else.
    struct FakeBlock {
        props: HashMap<&'static str, PropertyValue>,
        names: Vec<&'static str>,
        running: bool,
    }

    impl FakeBlock {
        fn new(names: &[&'static str]) -> Self {
            let mut props = HashMap::new();
            props.insert("rf_gain_range", PropertyValue::Range(GainRange::new(0.0, 30.0, 1.0)));
            props.insert("ant", PropertyValue::Text(String::new()));
            props.insert(
                "antenna_list",
                PropertyValue::List(vec!["J1".to_string(), "J2".to_string()]),
            );
            props.insert("identity", PropertyValue::Text("fake".to_string()));
            props.insert("tune_tolerance", PropertyValue::Number(10.0));
            Self {
                props,
                names: names.to_vec(),
                running: false,
            }
        }
    }

    impl PropertyBlock for FakeBlock {
        fn properties(&self) -> Vec<&'static str> {
            self.names.clone()
        }

        fn get(&self, name: &str) -> Option<PropertyValue> {
            self.props.get(name).cloned()
        }

        fn set(&mut self, name: &str, value: PropertyValue) -> DynResult<()> {
            let value = match (name, value) {
                ("center_freq", PropertyValue::Number(hz)) => {
                    PropertyValue::Number((hz / 1000.0).round() * 1000.0)
                }
                (_, value) => value,
            };
            let key = self
                .names
                .iter()
                .find(|n| **n == name)
                .copied()
                .ok_or_else(|| format!("no property {}", name))?;
            self.props.insert(key, value);
            Ok(())
        }

        fn start(&mut self) -> DynResult<()> {
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> DynResult<()> {
            self.running = false;
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    const FULL: &[&str] = &[
        "identity",
        "center_freq",
        "rf_gain",
        "rf_gain_range",
        "samp_rate",
        "ant",
        "antenna_list",
        "tune_tolerance",
    ];

    fn adapter() -> BlockAdapter {
        let mut adapter = BlockAdapter::new(Box::new(FakeBlock::new(FULL))).unwrap();
        adapter.open().unwrap();
        adapter
    }

    #[test]
    fn synonyms_bind_non_native_names() {
        let block = FakeBlock::new(FULL);
        let bindings = Bindings::resolve(&block).unwrap();
        assert_eq!(bindings.property(Capability::Freq), Some("center_freq"));
        assert_eq!(bindings.property(Capability::Gain), Some("rf_gain"));
        assert_eq!(bindings.property(Capability::SampleRate), Some("samp_rate"));
        assert_eq!(bindings.property(Capability::Serial), None);
    }

    #[test]
    fn missing_required_binding_fails() {
        let block = FakeBlock::new(&["identity", "rf_gain", "rf_gain_range"]);
        let err = BlockAdapter::new(Box::new(block)).err().unwrap();
        assert!(err.to_string().contains("Freq"));
    }

    #[test]
    fn open_selects_first_antenna() {
        let adapter = adapter();
        assert_eq!(adapter.antenna().as_deref(), Some("J1"));
        assert_eq!(adapter.name().unwrap(), "fake");
    }

    #[test]
    fn freq_reads_back_achieved_value() {
        let mut adapter = adapter();
        let result = adapter.set_freq(145_000_400.0).unwrap();
        assert_eq!(result.actual_rf_hz, 145_000_000.0);
        assert_eq!(result.actual_baseband_hz, -400.0);
        assert_eq!(adapter.was_tune_successful(), TuneVerdict::Low);
        adapter.set_freq(145_001_005.0).unwrap();
        assert_eq!(adapter.was_tune_successful(), TuneVerdict::OnTarget);
    }

    #[test]
    fn gain_is_clamped_through_the_range_property() {
        let mut adapter = adapter();
        adapter.set_gain(99.0).unwrap();
        assert_eq!(adapter.gain(), 30.0);
    }

    #[test]
    fn invalid_rate_and_antenna_record_errors() {
        let mut adapter = adapter();
        assert!(adapter.set_sample_rate(0.0).is_err());
        assert!(adapter.last_error().is_some());
        assert!(adapter.set_antenna(&AntennaSelector::parse("J9")).is_err());
        adapter.set_antenna(&AntennaSelector::parse("1")).unwrap();
        assert_eq!(adapter.antenna().as_deref(), Some("J2"));
    }

    #[test]
    fn start_stop_delegate_to_block() {
        let mut adapter = adapter();
        adapter.start().unwrap();
        assert!(adapter.is_running());
        adapter.close();
        assert!(!adapter.is_running());
    }
}
