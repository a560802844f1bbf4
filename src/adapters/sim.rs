//! Simulated RF bench
//!
//! A signal generator feeding an optional amplifier (the DUT) into a spectrum
//! analyzer, modelled closely enough that every scan procedure in this crate
//! can run against it: marker peak search, reference level, RBW, traces,
//! instrument state save/recall and the `SYST:ERR?` error queue.
//!
//! Both instruments share one [`BenchState`] behind a mutex, so tuning the
//! generator is visible to the analyzer immediately. Commands are matched with
//! SCPI short/long-form rules (`FREQ:CENT` == `sense:FREQuency:CENTer`).
//!
//! Unknown commands push `-113,"Undefined header"` onto the error queue;
//! unknown queries are left unanswered, which the mock transport reports as a
//! timeout, as a real instrument would.

use super::mock::{MockReply, MockResponder, MockTransport};
use super::{Connector, Transport};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Which instrument a simulated transport talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimRole {
    /// Spectrum analyzer
    Analyzer,
    /// Signal generator
    Generator,
}

/// Amplifier with soft compression and fixed intermodulation intercepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplifierModel {
    /// Small-signal gain (dB)
    pub gain_db: f64,
    /// Saturated output power (dBm); output is 3 dB compressed here
    pub psat_dbm: f64,
    /// Output third-order intercept (dBm)
    pub oip3_dbm: f64,
    /// Output fifth-order intercept (dBm)
    pub oip5_dbm: f64,
}

impl AmplifierModel {
    /// Output power for a given input power.
    pub fn output_dbm(&self, input_dbm: f64) -> f64 {
        let linear = input_dbm + self.gain_db;
        -10.0 * (10f64.powf(-linear / 10.0) + 10f64.powf(-self.psat_dbm / 10.0)).log10()
    }

    /// Input power at which gain has dropped by `drop_db`.
    pub fn input_at_compression(&self, drop_db: f64) -> f64 {
        self.psat_dbm - self.gain_db + (10f64.powf(drop_db / 10.0) - 1.0).log10() * 10.0
    }
}

impl Default for AmplifierModel {
    fn default() -> Self {
        Self {
            gain_db: 20.0,
            psat_dbm: 30.0,
            oip3_dbm: 40.0,
            oip5_dbm: 32.0,
        }
    }
}

/// Complete state of the simulated bench.
#[derive(Debug, Clone)]
pub struct BenchState {
    /// Generator CW frequency (Hz)
    pub sg_freq_hz: f64,
    /// Generator output level (dBm)
    pub sg_power_dbm: f64,
    /// RF output enabled
    pub sg_output_on: bool,
    /// Two-tone modulation enabled
    pub sg_mod_on: bool,
    /// Two-tone spacing when modulation is on (Hz)
    pub tone_spacing_hz: f64,

    /// Analyzer center frequency (Hz)
    pub center_hz: f64,
    /// Analyzer span (Hz)
    pub span_hz: f64,
    /// Resolution bandwidth (Hz)
    pub rbw_hz: f64,
    /// RBW follows span
    pub rbw_auto: bool,
    /// Reference level (dBm)
    pub ref_level_dbm: f64,
    /// Trace points per sweep
    pub sweep_points: usize,
    /// Sweep time (s)
    pub sweep_time_s: f64,
    /// Continuous sweep mode
    pub continuous: bool,
    /// Marker position (Hz)
    pub marker_hz: f64,
    /// Full span of the analyzer (Hz)
    pub max_freq_hz: f64,

    /// Cable/attenuator loss between DUT and analyzer (dB)
    pub path_loss_db: f64,
    /// Amplifier under test; `None` is a straight cable
    pub dut: Option<AmplifierModel>,
    /// Displayed noise floor (dBm)
    pub noise_floor_dbm: f64,

    /// Pending SCPI errors (code, message)
    pub errors: VecDeque<(i32, String)>,
    saved: HashMap<u32, (f64, f64, f64, bool)>,
}

impl Default for BenchState {
    fn default() -> Self {
        Self {
            sg_freq_hz: 1.0e9,
            sg_power_dbm: -20.0,
            sg_output_on: false,
            sg_mod_on: false,
            tone_spacing_hz: 1.0e6,
            center_hz: 1.5e9,
            span_hz: 10.0e6,
            rbw_hz: 10.0e3,
            rbw_auto: true,
            ref_level_dbm: 0.0,
            sweep_points: 1001,
            sweep_time_s: 0.01,
            continuous: true,
            marker_hz: 1.5e9,
            max_freq_hz: 3.0e9,
            path_loss_db: 0.0,
            dut: None,
            noise_floor_dbm: -160.0,
            errors: VecDeque::new(),
            saved: HashMap::new(),
        }
    }
}

impl BenchState {
    fn push_error(&mut self, code: i32, message: &str) {
        self.errors.push_back((code, message.to_string()));
    }

    fn set_span(&mut self, span_hz: f64) {
        self.span_hz = span_hz.clamp(10.0, self.max_freq_hz);
        if self.rbw_auto {
            self.rbw_hz = (self.span_hz / 1000.0).clamp(1.0, 8.0e6);
        }
    }

    /// Every tone present at the analyzer input as (frequency Hz, level dBm).
    pub fn components(&self) -> Vec<(f64, f64)> {
        if !self.sg_output_on {
            return Vec::new();
        }
        let amp = |p: f64| match self.dut {
            Some(dut) => dut.output_dbm(p),
            None => p,
        };
        let loss = self.path_loss_db;

        if !self.sg_mod_on {
            return vec![(self.sg_freq_hz, amp(self.sg_power_dbm) - loss)];
        }

        let delta = self.tone_spacing_hz;
        let f_low = self.sg_freq_hz - delta / 2.0;
        let f_high = self.sg_freq_hz + delta / 2.0;
        let tone = amp(self.sg_power_dbm - 3.0);
        let mut out = vec![(f_high, tone - loss), (f_low, tone - loss)];
        if let Some(dut) = self.dut {
            let im3 = 3.0 * tone - 2.0 * dut.oip3_dbm;
            let im5 = 5.0 * tone - 4.0 * dut.oip5_dbm;
            out.push((f_high + delta, im3 - loss));
            out.push((f_low - delta, im3 - loss));
            out.push((f_high + 2.0 * delta, im5 - loss));
            out.push((f_low - 2.0 * delta, im5 - loss));
        }
        out
    }

    fn start_hz(&self) -> f64 {
        self.center_hz - self.span_hz / 2.0
    }

    fn stop_hz(&self) -> f64 {
        self.center_hz + self.span_hz / 2.0
    }

    fn visible(&self) -> Vec<(f64, f64)> {
        let (start, stop) = (self.start_hz(), self.stop_hz());
        self.components()
            .into_iter()
            .filter(|(f, p)| *f >= start && *f <= stop && *p > self.noise_floor_dbm)
            .collect()
    }

    fn level_at(&self, freq_hz: f64) -> f64 {
        let window = self.rbw_hz.max(self.span_hz / self.sweep_points.max(2) as f64);
        self.visible()
            .into_iter()
            .filter(|(f, _)| (f - freq_hz).abs() <= window)
            .map(|(_, p)| p)
            .fold(self.noise_floor_dbm, f64::max)
    }

    fn marker_to_peak(&mut self) {
        let peak = self
            .visible()
            .into_iter()
            .fold(None::<(f64, f64)>, |best, c| match best {
                Some(b) if b.1 >= c.1 => Some(b),
                _ => Some(c),
            });
        self.marker_hz = peak.map_or(self.center_hz, |(f, _)| f);
    }

    fn marker_to_next_peak(&mut self) {
        let current = self.level_at(self.marker_hz);
        let marker = self.marker_hz;
        let next = self
            .visible()
            .into_iter()
            .filter(|(f, p)| (f - marker).abs() > self.rbw_hz && *p <= current)
            .fold(None::<(f64, f64)>, |best, c| match best {
                Some(b) if b.1 >= c.1 => Some(b),
                _ => Some(c),
            });
        if let Some((f, _)) = next {
            self.marker_hz = f;
        }
    }

    fn trace(&self) -> String {
        let points = self.sweep_points.max(2);
        let step = self.span_hz / (points - 1) as f64;
        (0..points)
            .map(|i| format!("{:.2}", self.level_at(self.start_hz() + step * i as f64)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ============================================================================
// SCPI parsing
// ============================================================================

struct PatternNode {
    short: String,
    long: String,
    optional: bool,
}

impl PatternNode {
    fn parse(node: &str) -> Self {
        let optional = node.starts_with('[') && node.ends_with(']');
        let name = node.trim_start_matches('[').trim_end_matches(']');
        Self {
            short: name.chars().take_while(|c| !c.is_ascii_lowercase()).collect(),
            long: name.to_ascii_uppercase(),
            optional,
        }
    }

    fn accepts(&self, node: &str) -> bool {
        node == self.short || node == self.long
    }
}

fn match_nodes(nodes: &[String], pattern: &[PatternNode]) -> bool {
    match (nodes.first(), pattern.first()) {
        (_, None) => nodes.is_empty(),
        (None, Some(_)) => pattern.iter().all(|p| p.optional),
        (Some(node), Some(p)) => {
            (p.accepts(node) && match_nodes(&nodes[1..], &pattern[1..]))
                || (p.optional && match_nodes(nodes, &pattern[1..]))
        }
    }
}

/// True if `header` (e.g. `"sense:FREQuency:CENTer"`) names the command
/// described by `pattern` (e.g. `"[SENSe]:FREQuency:CENTer"`).
///
/// Numeric node suffixes (`TRACe1`) are ignored.
pub fn header_matches(header: &str, pattern: &str) -> bool {
    let nodes: Vec<String> = header
        .trim_start_matches(':')
        .split(':')
        .filter(|n| !n.is_empty())
        .map(|n| {
            n.to_ascii_uppercase()
                .trim_end_matches(|c: char| c.is_ascii_digit())
                .to_string()
        })
        .collect();
    let pattern: Vec<PatternNode> = pattern.split(':').map(PatternNode::parse).collect();
    match_nodes(&nodes, &pattern)
}

/// Parse a numeric SCPI argument with an optional unit suffix
/// (`"100 MHz"`, `"-10dBm"`, `"1e6"`). Frequencies are returned in Hz.
pub fn parse_quantity(arg: &str) -> Option<f64> {
    let arg = arg.trim();
    let split = arg
        .find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
        .unwrap_or(arg.len());
    let (number, unit) = arg.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    let scale = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "HZ" | "DBM" | "DB" | "S" => 1.0,
        "KHZ" => 1.0e3,
        "MHZ" => 1.0e6,
        "GHZ" => 1.0e9,
        "MS" => 1.0e-3,
        _ => return None,
    };
    Some(value * scale)
}

fn parse_bool(arg: &str) -> Option<bool> {
    match arg.trim().to_ascii_uppercase().as_str() {
        "ON" | "1" => Some(true),
        "OFF" | "0" => Some(false),
        _ => None,
    }
}

enum Outcome {
    Handled,
    Reply(String),
    BadArgument,
    Unknown,
}

fn common(state: &mut BenchState, header: &str, arg: &str, is_query: bool) -> Outcome {
    match header.to_ascii_uppercase().as_str() {
        "*OPC?" => Outcome::Reply("1".into()),
        "*CLS" => {
            state.errors.clear();
            Outcome::Handled
        }
        "*RST" | "*WAI" | "*OPC" => Outcome::Handled,
        "*SAV" | "*RCL" => match arg.trim().parse::<u32>() {
            Ok(slot) if header.eq_ignore_ascii_case("*SAV") => {
                state.saved.insert(
                    slot,
                    (state.center_hz, state.span_hz, state.rbw_hz, state.rbw_auto),
                );
                Outcome::Handled
            }
            Ok(slot) => match state.saved.get(&slot).copied() {
                Some((center, span, rbw, auto)) => {
                    state.center_hz = center;
                    state.span_hz = span;
                    state.rbw_hz = rbw;
                    state.rbw_auto = auto;
                    Outcome::Handled
                }
                None => Outcome::BadArgument,
            },
            Err(_) => Outcome::BadArgument,
        },
        _ if is_query && header_matches(header.trim_end_matches('?'), "SYSTem:ERRor:[NEXT]") => {
            let (code, message) = state
                .errors
                .pop_front()
                .unwrap_or((0, "No error".to_string()));
            Outcome::Reply(format!("{},\"{}\"", code, message))
        }
        _ => Outcome::Unknown,
    }
}

fn analyzer(state: &mut BenchState, header: &str, arg: &str, is_query: bool) -> Outcome {
    let h = header.trim_end_matches('?');
    let number = || parse_quantity(arg);
    let reply = |v: f64| Outcome::Reply(format!("{}", v));

    if h.starts_with('*') {
        return match h.to_ascii_uppercase().as_str() {
            "*IDN" => Outcome::Reply("Simulated,SA-3000,SIM0001,1.0.0".into()),
            _ => common(state, header, arg, is_query),
        };
    }

    if header_matches(h, "[SENSe]:FREQuency:CENTer") {
        if is_query {
            return reply(state.center_hz);
        }
        return number().map_or(Outcome::BadArgument, |v| {
            state.center_hz = v;
            Outcome::Handled
        });
    }
    if header_matches(h, "[SENSe]:FREQuency:SPAN:FULL") {
        state.center_hz = state.max_freq_hz / 2.0;
        state.set_span(state.max_freq_hz);
        return Outcome::Handled;
    }
    if header_matches(h, "[SENSe]:FREQuency:SPAN") {
        if is_query {
            return reply(state.span_hz);
        }
        return number().map_or(Outcome::BadArgument, |v| {
            state.set_span(v);
            Outcome::Handled
        });
    }
    if header_matches(h, "[SENSe]:FREQuency:STARt") && is_query {
        return reply(state.start_hz());
    }
    if header_matches(h, "[SENSe]:FREQuency:STOP") && is_query {
        return reply(state.stop_hz());
    }
    if header_matches(h, "[SENSe]:BANDwidth:[RESolution]:AUTO") {
        return parse_bool(arg).map_or(Outcome::BadArgument, |on| {
            state.rbw_auto = on;
            let span = state.span_hz;
            state.set_span(span);
            Outcome::Handled
        });
    }
    if header_matches(h, "[SENSe]:BANDwidth:[RESolution]") {
        if is_query {
            return reply(state.rbw_hz);
        }
        return number().map_or(Outcome::BadArgument, |v| {
            state.rbw_auto = false;
            state.rbw_hz = v.clamp(1.0, 8.0e6);
            Outcome::Handled
        });
    }
    if header_matches(h, "[SENSe]:SWEep:TIME:AUTO") {
        state.sweep_time_s = 0.01;
        return Outcome::Handled;
    }
    if header_matches(h, "[SENSe]:SWEep:TIME") {
        if is_query {
            return reply(state.sweep_time_s);
        }
        return number().map_or(Outcome::BadArgument, |v| {
            state.sweep_time_s = v;
            Outcome::Handled
        });
    }
    if header_matches(h, "[SENSe]:SWEep:POINts") {
        if is_query {
            return Outcome::Reply(state.sweep_points.to_string());
        }
        return match arg.trim().parse::<usize>() {
            Ok(points) if points >= 2 => {
                state.sweep_points = points;
                Outcome::Handled
            }
            _ => Outcome::BadArgument,
        };
    }
    if header_matches(h, "[SENSe]:DETector:[FUNCtion]")
        || header_matches(h, "TRACe:TYPE")
        || header_matches(h, "TRACe:MODE")
    {
        return Outcome::Handled;
    }
    if header_matches(h, "INITiate:CONTinuous") {
        return parse_bool(arg).map_or(Outcome::BadArgument, |on| {
            state.continuous = on;
            Outcome::Handled
        });
    }
    if header_matches(h, "INITiate:[IMMediate]") {
        return Outcome::Handled;
    }
    if header_matches(h, "TRACe:[DATA]") && is_query {
        return Outcome::Reply(state.trace());
    }
    if header_matches(h, "CALCulate:MARKer:MAXimum:NEXT") {
        state.marker_to_next_peak();
        return Outcome::Handled;
    }
    if header_matches(h, "CALCulate:MARKer:MAXimum:[PEAK]") {
        state.marker_to_peak();
        return Outcome::Handled;
    }
    if header_matches(h, "CALCulate:MARKer:X") {
        if is_query {
            return reply(state.marker_hz);
        }
        return number().map_or(Outcome::BadArgument, |v| {
            state.marker_hz = v;
            Outcome::Handled
        });
    }
    if header_matches(h, "CALCulate:MARKer:Y") && is_query {
        return reply((state.level_at(state.marker_hz) * 100.0).round() / 100.0);
    }
    if header_matches(h, "DISPlay:WINDow:TRACe:Y:[SCALe]:RLEVel") {
        if is_query {
            return reply(state.ref_level_dbm);
        }
        return number().map_or(Outcome::BadArgument, |v| {
            state.ref_level_dbm = v;
            Outcome::Handled
        });
    }
    if header_matches(h, "DISPlay:WINDow:TRACe:Y:[SCALe]:PDIVision") {
        return Outcome::Handled;
    }
    common(state, header, arg, is_query)
}

fn generator(state: &mut BenchState, header: &str, arg: &str, is_query: bool) -> Outcome {
    let h = header.trim_end_matches('?');
    let number = || parse_quantity(arg);
    let on_off = |v: bool| Outcome::Reply(if v { "1".into() } else { "0".into() });

    if h.starts_with('*') {
        return match h.to_ascii_uppercase().as_str() {
            "*IDN" => Outcome::Reply("Simulated,SG-6000,SIM0002,1.0.0".into()),
            _ => common(state, header, arg, is_query),
        };
    }

    if header_matches(h, "OUTPut:MODulation:[STATe]") {
        if is_query {
            return on_off(state.sg_mod_on);
        }
        return parse_bool(arg).map_or(Outcome::BadArgument, |on| {
            state.sg_mod_on = on;
            Outcome::Handled
        });
    }
    if header_matches(h, "OUTPut:[STATe]") {
        if is_query {
            return on_off(state.sg_output_on);
        }
        return parse_bool(arg).map_or(Outcome::BadArgument, |on| {
            state.sg_output_on = on;
            Outcome::Handled
        });
    }
    if header_matches(h, "[SOURce]:FREQuency:[CW]") {
        if is_query {
            return Outcome::Reply(format!("{}", state.sg_freq_hz));
        }
        return number().map_or(Outcome::BadArgument, |v| {
            state.sg_freq_hz = v;
            Outcome::Handled
        });
    }
    if header_matches(h, "[SOURce]:POWer:[LEVel]:[IMMediate]:[AMPLitude]") {
        if is_query {
            return Outcome::Reply(format!("{}", state.sg_power_dbm));
        }
        return number().map_or(Outcome::BadArgument, |v| {
            state.sg_power_dbm = v;
            Outcome::Handled
        });
    }
    common(state, header, arg, is_query)
}

/// Shared handle on a simulated bench.
#[derive(Clone, Default)]
pub struct SimulatedBench {
    state: Arc<Mutex<BenchState>>,
}

impl SimulatedBench {
    /// Bench starting from `state`.
    pub fn new(state: BenchState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the shared state for inspection or tweaking.
    pub fn state(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Process one command line as instrument `role` would.
    pub fn handle(&self, role: SimRole, line: &str) -> MockReply {
        let line = line.trim();
        let (header, arg) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let is_query = header.ends_with('?');

        let mut state = self.state();
        let outcome = match role {
            SimRole::Analyzer => analyzer(&mut state, header, arg, is_query),
            SimRole::Generator => generator(&mut state, header, arg, is_query),
        };
        match outcome {
            Outcome::Reply(text) if is_query => MockReply::Line(text),
            Outcome::Reply(_) | Outcome::Handled => MockReply::Silent,
            Outcome::BadArgument => {
                state.push_error(-224, "Illegal parameter value");
                MockReply::Silent
            }
            Outcome::Unknown => {
                state.push_error(-113, "Undefined header");
                MockReply::Silent
            }
        }
    }

    /// Transport talking to this bench as `role`.
    pub fn transport(&self, role: SimRole, address: &str) -> MockTransport {
        MockTransport::new(
            address,
            SimResponder {
                bench: self.clone(),
                role,
            },
        )
    }
}

struct SimResponder {
    bench: SimulatedBench,
    role: SimRole,
}

impl MockResponder for SimResponder {
    fn respond(&mut self, command: &str) -> MockReply {
        self.bench.handle(self.role, command)
    }
}

/// Connector resolving configured addresses to simulated instruments.
///
/// Addresses with no registered role are refused, which makes the connector
/// usable for exercising connection retries as well.
#[derive(Clone, Default)]
pub struct SimConnector {
    bench: SimulatedBench,
    roles: HashMap<String, SimRole>,
}

impl SimConnector {
    /// Connector over `bench` with no instruments registered.
    pub fn new(bench: SimulatedBench) -> Self {
        Self {
            bench,
            roles: HashMap::new(),
        }
    }

    /// Answer connections to `address` as instrument `role`.
    pub fn with_instrument(mut self, address: impl Into<String>, role: SimRole) -> Self {
        self.roles.insert(address.into(), role);
        self
    }

    /// The bench behind this connector.
    pub fn bench(&self) -> &SimulatedBench {
        &self.bench
    }
}

#[async_trait]
impl Connector for SimConnector {
    async fn open(&self, address: &str, _timeout: Duration) -> AppResult<Box<dyn Transport>> {
        match self.roles.get(address) {
            Some(role) => Ok(Box::new(self.bench.transport(*role, address))),
            None => Err(DaqError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("no simulated instrument at {}", address),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_matches_short_and_long_forms() {
        assert!(header_matches("sense:FREQuency:CENTer", "[SENSe]:FREQuency:CENTer"));
        assert!(header_matches("FREQ:CENT", "[SENSe]:FREQuency:CENTer"));
        assert!(header_matches(":SENS:FREQ:CENT", "[SENSe]:FREQuency:CENTer"));
        assert!(header_matches("DISP:WIND:TRAC:Y:RLEV", "DISPlay:WINDow:TRACe:Y:[SCALe]:RLEVel"));
        assert!(header_matches(":TRACe1:TYPE", "TRACe:TYPE"));
        assert!(!header_matches("FREQ:CENTE", "[SENSe]:FREQuency:CENTer"));
        assert!(!header_matches("FREQ:SPAN:FULL", "[SENSe]:FREQuency:SPAN"));
    }

    #[test]
    fn test_parse_quantity_units() {
        assert_eq!(parse_quantity("100 MHz"), Some(100.0e6));
        assert_eq!(parse_quantity("0.1MHz"), Some(0.1e6));
        assert_eq!(parse_quantity("-10 dBm"), Some(-10.0));
        assert_eq!(parse_quantity("1e6 Hz"), Some(1.0e6));
        assert_eq!(parse_quantity("abc"), None);
    }

    #[test]
    fn test_amplifier_compression_point() {
        let dut = AmplifierModel::default();
        let p1 = dut.input_at_compression(1.0);
        let gain = dut.output_dbm(p1) - p1;
        assert!((dut.gain_db - gain - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_marker_finds_generator_tone() {
        let bench = SimulatedBench::default();
        bench.handle(SimRole::Generator, ":OUTPUT:STATE ON");
        bench.handle(SimRole::Generator, "freq 1000 MHz");
        bench.handle(SimRole::Generator, "POW:LEV -15");
        bench.handle(SimRole::Analyzer, "sense:FREQuency:CENTer 1000 MHz");
        bench.handle(SimRole::Analyzer, "CALCulate:MARKer:MAXimum");

        assert_eq!(
            bench.handle(SimRole::Analyzer, "CALC:MARK:Y?"),
            MockReply::line("-15")
        );
        assert_eq!(
            bench.handle(SimRole::Analyzer, "CALC:MARK:X?"),
            MockReply::line("1000000000")
        );
    }

    #[test]
    fn test_unknown_command_lands_in_error_queue() {
        let bench = SimulatedBench::default();
        assert_eq!(bench.handle(SimRole::Analyzer, "BOGUS:CMD 1"), MockReply::Silent);
        assert_eq!(
            bench.handle(SimRole::Analyzer, "SYST:ERR?"),
            MockReply::line("-113,\"Undefined header\"")
        );
        assert_eq!(
            bench.handle(SimRole::Analyzer, "SYST:ERR?"),
            MockReply::line("0,\"No error\"")
        );
    }

    #[test]
    fn test_save_and_recall_restore_frequency_settings() {
        let bench = SimulatedBench::default();
        bench.handle(SimRole::Analyzer, "FREQ:CENT 2 GHz");
        bench.handle(SimRole::Analyzer, "*SAV 1");
        bench.handle(SimRole::Analyzer, "FREQ:CENT 1 GHz");
        bench.handle(SimRole::Analyzer, "*RCL 1");
        assert_eq!(bench.state().center_hz, 2.0e9);
    }
}
