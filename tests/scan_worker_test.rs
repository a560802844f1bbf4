//! Scan procedures run on the background worker against the simulated bench.

mod common;

use common::{bench_with_tone, drain, last_data, logs_with, sessions};
use rf_daq::adapters::{AmplifierModel, MockReply, MockTransport, SimRole};
use rf_daq::error::DaqError;
use rf_daq::scan::hires::HiResSettings;
use rf_daq::scan::pa::PaSettings;
use rf_daq::scan::peak_search::PeakSearchSettings;
use rf_daq::scan::spectrum::SweepSettings;
use rf_daq::scan::{
    HiResSnapshot, PaCharacterization, PeakSearch, ScanEvent, ScanPlan, ScanState, ScanWorker,
    SpectrumSweep, StopFlag,
};
use rf_daq::scpi::ScpiSession;

fn plan_1000_to_1040() -> ScanPlan {
    ScanPlan::stepped(1000.0, 1040.0, 10.0).unwrap()
}

#[tokio::test]
async fn test_sweep_records_every_point() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let (sa, sg) = sessions(&bench);
    let sweep = SpectrumSweep::new(sa, sg, plan_1000_to_1040(), SweepSettings::default());

    let (handle, rx) = ScanWorker::new(sweep).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed);
    let data = last_data(&events).unwrap();
    assert_eq!(data.x, vec![1000.0, 1010.0, 1020.0, 1030.0, 1040.0]);
    assert!(data.y.iter().all(|&p| p == -20.0));
    assert_eq!(
        events.iter().rev().find(|e| matches!(e, ScanEvent::Progress(_))),
        Some(&ScanEvent::Progress(100))
    );

    let state = bench.state();
    assert_eq!(state.ref_level_dbm, -10.0);
    assert!(state.continuous, "cleanup puts the analyzer back in continuous mode");
}

#[tokio::test]
async fn test_sweep_stops_after_requested_point() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let stop = StopFlag::new();
    let (sa, _) = sessions(&bench);
    let sg = {
        let (bench, stop) = (bench.clone(), stop.clone());
        MockTransport::new("sim://sg", move |cmd: &str| {
            if cmd == "freq 1020 MHz" {
                stop.request();
            }
            bench.handle(SimRole::Generator, cmd)
        })
    };
    let sg = ScpiSession::new("SG", Box::new(sg));
    let sweep = SpectrumSweep::new(sa, sg, plan_1000_to_1040(), SweepSettings::default());

    let (handle, rx) = ScanWorker::new(sweep).with_stop_flag(stop).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Stopped);
    assert_eq!(last_data(&events).unwrap().len(), 3);
    assert_eq!(outcome.procedure.points().count(), 3);
    assert_eq!(logs_with(&events, "spectrum sweep stopped").len(), 1);
}

#[tokio::test]
async fn test_sweep_skips_point_without_operation_complete() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let (_, sg) = sessions(&bench);
    let sa = {
        let bench = bench.clone();
        MockTransport::new("sim://sa", move |cmd: &str| {
            let stuck = bench.state().center_hz == 1.02e9;
            if cmd == "*OPC?" && stuck {
                MockReply::Silent
            } else {
                bench.handle(SimRole::Analyzer, cmd)
            }
        })
    };
    let sa = ScpiSession::new("SA", Box::new(sa));
    let sweep = SpectrumSweep::new(sa, sg, plan_1000_to_1040(), SweepSettings::default());

    let (handle, rx) = ScanWorker::new(sweep).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed);
    assert_eq!(
        last_data(&events).unwrap().x,
        vec![1000.0, 1010.0, 1030.0, 1040.0]
    );
    assert_eq!(logs_with(&events, "OPC failed at 1020 MHz").len(), 1);
}

#[tokio::test]
async fn test_sweep_skips_point_with_malformed_reply() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let (_, sg) = sessions(&bench);
    let sa = {
        let bench = bench.clone();
        let mut last = String::new();
        MockTransport::new("sim://sa", move |cmd: &str| {
            let garbled = cmd == "SYST:ERR?"
                && last == "INITiate:IMMediate"
                && bench.state().center_hz == 1.02e9;
            last = cmd.to_string();
            if garbled {
                MockReply::line("garbage")
            } else {
                bench.handle(SimRole::Analyzer, cmd)
            }
        })
    };
    let sa = ScpiSession::new("SA", Box::new(sa));
    let sweep = SpectrumSweep::new(sa, sg, plan_1000_to_1040(), SweepSettings::default());

    let (handle, rx) = ScanWorker::new(sweep).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed, "{:?}", outcome.error);
    assert_eq!(
        last_data(&events).unwrap().x,
        vec![1000.0, 1010.0, 1030.0, 1040.0]
    );
    assert_eq!(logs_with(&events, "Point 1020 MHz skipped").len(), 1);
}

#[tokio::test]
async fn test_sweep_keeps_points_when_reference_level_is_unreadable() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let (_, sg) = sessions(&bench);
    let sa = {
        let bench = bench.clone();
        MockTransport::new("sim://sa", move |cmd: &str| {
            if cmd == "DISP:WIND:TRAC:Y:RLEV?" {
                MockReply::line("garbage")
            } else {
                bench.handle(SimRole::Analyzer, cmd)
            }
        })
    };
    let sa = ScpiSession::new("SA", Box::new(sa));
    let sweep = SpectrumSweep::new(sa, sg, plan_1000_to_1040(), SweepSettings::default());

    let (handle, rx) = ScanWorker::new(sweep).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed, "{:?}", outcome.error);
    assert_eq!(last_data(&events).unwrap().len(), 5);
    assert_eq!(logs_with(&events, "Reference level not adapted").len(), 5);
    assert_eq!(bench.state().ref_level_dbm, 0.0);
}

#[tokio::test]
async fn test_sweep_transport_failure_keeps_partial_results() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let (sa, _) = sessions(&bench);
    let sg = {
        let bench = bench.clone();
        MockTransport::new("sim://sg", move |cmd: &str| {
            if cmd == "freq 1030 MHz" {
                MockReply::Disconnect
            } else {
                bench.handle(SimRole::Generator, cmd)
            }
        })
    };
    let sg = ScpiSession::new("SG", Box::new(sg));
    let sweep = SpectrumSweep::new(sa, sg, plan_1000_to_1040(), SweepSettings::default());

    let (handle, rx) = ScanWorker::new(sweep).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Failed);
    assert!(matches!(outcome.error, Some(DaqError::ConnectionClosed(_))));
    assert_eq!(last_data(&events).unwrap().len(), 3);
    assert_eq!(logs_with(&events, "spectrum sweep aborted").len(), 1);
}

#[tokio::test]
async fn test_peak_search_converges_on_tone() {
    let bench = bench_with_tone(1_234.567_8e6, -25.0);
    bench.state().center_hz = 2.0e9;
    let (sa, _) = sessions(&bench);
    let search = PeakSearch::new(sa, PeakSearchSettings::default()).unwrap();

    let (handle, rx) = ScanWorker::new(search).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed);
    assert_eq!(
        events.iter().rev().find(|e| matches!(e, ScanEvent::Progress(_))),
        Some(&ScanEvent::Progress(100))
    );
    assert_eq!(logs_with(&events, "Last RBW").len(), 1);
    assert_eq!(logs_with(&events, "Setting reference level to -10").len(), 1);
    assert_eq!(logs_with(&events, "Center Frequency").len(), 5);

    let search = outcome.procedure;
    let peak = search.peak().unwrap();
    assert!((peak.freq_mhz() - 1_234.567_8).abs() < 1e-6);
    assert_eq!(peak.power_dbm, -25.0);
    assert!(search.final_rbw_hz().is_some());
    assert_eq!(last_data(&events).unwrap().x, vec![100.0, 10.0, 1.0, 0.1, 0.01]);
}

#[tokio::test]
async fn test_peak_search_unreadable_marker_reports_and_completes() {
    let bench = bench_with_tone(1.0e9, -20.0);
    let sa = {
        let bench = bench.clone();
        MockTransport::new("sim://sa", move |cmd: &str| {
            if cmd == "CALCulate:MARKer:X?" {
                MockReply::line("--")
            } else {
                bench.handle(SimRole::Analyzer, cmd)
            }
        })
    };
    let search = PeakSearch::new(
        ScpiSession::new("SA", Box::new(sa)),
        PeakSearchSettings::default(),
    )
    .unwrap();

    let (handle, rx) = ScanWorker::new(search).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed);
    assert_eq!(logs_with(&events, "Failed to find initial peak").len(), 1);
    assert!(logs_with(&events, "Last RBW").is_empty());
    assert!(outcome.procedure.peak().is_none());
}

#[tokio::test]
async fn test_hires_snapshot_stitches_segments_and_restores_setup() {
    let bench = bench_with_tone(1.5e9, -20.0);
    let settings = HiResSettings {
        half_width_mhz: 10.0,
        ..HiResSettings::default()
    };
    let (sa, _) = sessions(&bench);
    let snapshot = HiResSnapshot::new(sa, settings);

    let (handle, rx) = ScanWorker::new(snapshot).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed);
    let data = last_data(&events).unwrap();
    assert_eq!(data.len(), 4 * 1001);
    assert_eq!(data.y.iter().copied().fold(f64::MIN, f64::max), -20.0);

    let state = bench.state();
    assert_eq!(state.center_hz, 1.5e9);
    assert_eq!(state.span_hz, 10.0e6);
    assert!(state.continuous);
}

#[tokio::test]
async fn test_pa_characterization_against_amplifier_model() {
    let bench = bench_with_tone(1.5e9, 5.0);
    bench.state().dut = Some(AmplifierModel::default());
    let (sa, sg) = sessions(&bench);
    let plan = ScanPlan::from_values(vec![1500.0]).unwrap();
    let pa = PaCharacterization::new(sa, sg, plan, PaSettings::default());

    let (handle, rx) = ScanWorker::new(pa).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed, "{:?}", outcome.error);
    let records = outcome.procedure.records();
    assert_eq!(records.len(), 1);
    let r = records[0];
    assert_eq!(r.freq_mhz, 1500.0);
    assert!((r.gain_db - 20.0).abs() < 0.3, "gain {}", r.gain_db);
    assert!(r.op1db_dbm > 22.5 && r.op1db_dbm < 25.0, "OP1dB {}", r.op1db_dbm);
    assert!((r.oip3_dbm - 40.0).abs() < 0.05, "OIP3 {}", r.oip3_dbm);
    assert!((r.oip5_dbm - 32.0).abs() < 0.05, "OIP5 {}", r.oip5_dbm);

    let metric_names: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Metric { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    for name in ["Gain", "Pout", "OP1dB", "OIP3", "OIP5"] {
        assert!(metric_names.contains(&name), "missing metric {}", name);
    }
    assert!(!bench.state().sg_mod_on);
}

#[tokio::test]
async fn test_pa_characterization_skips_frequency_with_malformed_reading() {
    let bench = bench_with_tone(1.5e9, 5.0);
    bench.state().dut = Some(AmplifierModel::default());
    let (_, sg) = sessions(&bench);
    let sa = {
        let bench = bench.clone();
        let mut marker_reads = 0;
        MockTransport::new("sim://sa", move |cmd: &str| {
            if cmd == "CALCulate:MARKer:Y?" {
                marker_reads += 1;
                if marker_reads == 3 {
                    return MockReply::line("9.91E37x");
                }
            }
            bench.handle(SimRole::Analyzer, cmd)
        })
    };
    let sa = ScpiSession::new("SA", Box::new(sa));
    let plan = ScanPlan::from_values(vec![1500.0, 1600.0]).unwrap();
    let pa = PaCharacterization::new(sa, sg, plan, PaSettings::default());

    let (handle, rx) = ScanWorker::new(pa).spawn();
    let outcome = handle.join().await.unwrap();
    let events = drain(rx).await;

    assert_eq!(outcome.state, ScanState::Completed, "{:?}", outcome.error);
    let records = outcome.procedure.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].freq_mhz, 1600.0);
    assert!((records[0].gain_db - 20.0).abs() < 0.3, "gain {}", records[0].gain_db);
    assert_eq!(logs_with(&events, "1500 MHz skipped").len(), 1);
    assert_eq!(
        events.iter().rev().find(|e| matches!(e, ScanEvent::Progress(_))),
        Some(&ScanEvent::Progress(100))
    );
}
