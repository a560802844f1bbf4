//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use rf_daq::adapters::{MockReply, SimRole, SimulatedBench};
use rf_daq::scan::{ScanEvent, Series};
use rf_daq::scpi::ScpiSession;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Bench with the generator on at `freq_hz` / `power_dbm` and the analyzer
/// centered on it.
pub fn bench_with_tone(freq_hz: f64, power_dbm: f64) -> SimulatedBench {
    let bench = SimulatedBench::default();
    {
        let mut state = bench.state();
        state.sg_output_on = true;
        state.sg_freq_hz = freq_hz;
        state.sg_power_dbm = power_dbm;
        state.center_hz = freq_hz;
    }
    bench
}

/// Analyzer and generator sessions on `bench`.
pub fn sessions(bench: &SimulatedBench) -> (ScpiSession, ScpiSession) {
    (
        ScpiSession::new("SA", Box::new(bench.transport(SimRole::Analyzer, "sim://sa"))),
        ScpiSession::new("SG", Box::new(bench.transport(SimRole::Generator, "sim://sg"))),
    )
}

/// Serve `bench` as instrument `role` over raw TCP on an ephemeral port.
///
/// Replies to commands starting with `slow_prefix` are held back for `delay`.
pub async fn serve_bench(
    bench: SimulatedBench,
    role: SimRole,
    slow: Option<(&'static str, Duration)>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let bench = bench.clone();
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some((prefix, delay)) = slow {
                        if line.starts_with(prefix) {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    match bench.handle(role, &line) {
                        MockReply::Line(text) => {
                            let reply = format!("{}\n", text);
                            if write.write_all(reply.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        MockReply::Silent => {}
                        MockReply::Disconnect => break,
                    }
                }
            });
        }
    });
    addr
}

/// Collect every event until the worker drops its sender.
pub async fn drain(mut rx: mpsc::UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Most recent data series.
pub fn last_data(events: &[ScanEvent]) -> Option<&Series> {
    events.iter().rev().find_map(|e| match e {
        ScanEvent::Data(s) => Some(s),
        _ => None,
    })
}

/// Log lines containing `needle`.
pub fn logs_with<'a>(events: &'a [ScanEvent], needle: &str) -> Vec<&'a str> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Log(line) if line.contains(needle) => Some(line.as_str()),
            _ => None,
        })
        .collect()
}
