//! SCPI sessions over real sockets against an in-process simulated bench.

mod common;

use common::{bench_with_tone, serve_bench};
use rf_daq::adapters::{Connector, SimRole, TcpAdapter, TcpConnector};
use rf_daq::scpi::ScpiSession;
use std::time::Duration;
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_identify_over_tcp() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let addr = serve_bench(bench, SimRole::Analyzer, None).await;

    let transport = TcpConnector.open(&addr.to_string(), TIMEOUT).await.unwrap();
    let mut sa = ScpiSession::new("SA", transport);
    let identity = sa.identify().await.unwrap();

    assert_eq!(identity.manufacturer, "Simulated");
    assert_eq!(identity.model, "SA-3000");
    assert_eq!(sa.instrument_error_count(), 0);
    sa.close().await.unwrap();
    assert!(!sa.is_connected());
}

#[tokio::test]
async fn test_instrument_errors_are_counted_not_raised() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let addr = serve_bench(bench.clone(), SimRole::Analyzer, None).await;

    let transport = TcpConnector.open(&addr.to_string(), TIMEOUT).await.unwrap();
    let mut sa = ScpiSession::new("SA", transport);

    sa.write("NOT:A:COMMand 12").await.unwrap();
    sa.write("sense:FREQuency:CENTer 2 GHz").await.unwrap();

    assert_eq!(sa.instrument_error_count(), 1);
    assert_eq!(sa.query_f64("sense:FREQuency:CENTer?").await.unwrap(), 2.0e9);
    assert!(bench.state().errors.is_empty());
}

#[tokio::test]
async fn test_late_opc_reply_is_not_paired_with_next_query() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let addr = serve_bench(
        bench,
        SimRole::Analyzer,
        Some(("*OPC?", Duration::from_millis(300))),
    )
    .await;

    let adapter = TcpAdapter::connect(&addr.to_string(), TIMEOUT).await.unwrap();
    let mut sa = ScpiSession::new("SA", Box::new(adapter));

    let completed = sa.wait_opc(Duration::from_millis(50)).await.unwrap();
    assert!(!completed);

    // The "1" that eventually answers *OPC? must be dropped.
    let points = sa.query_i64("sense:SWEep:POINts?").await.unwrap();
    assert_eq!(points, 1001);
}

#[tokio::test]
async fn test_peer_hangup_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let transport = TcpConnector.open(&addr.to_string(), TIMEOUT).await.unwrap();
    let mut sa = ScpiSession::new("SA", transport);
    let err = sa.query("*IDN?").await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {}", err);
}
