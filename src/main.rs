use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rf_daq::adapters::{
    AmplifierModel, BenchState, Connector, SimConnector, SimRole, SimulatedBench, TcpConnector,
};
use rf_daq::config::{ScanRange, Settings};
use rf_daq::error_recovery::connect_with_retry;
use rf_daq::input::FieldGuard;
use rf_daq::params::ParamStore;
use rf_daq::scan::{
    HiResSnapshot, PaCharacterization, PeakSearch, ScanEvent, ScanOutcome, ScanProcedure,
    ScanState, ScanWorker, SpectrumSweep,
};
use rf_daq::scpi::ScpiSession;
use rf_daq::storage::{default_output_path, CsvWriter};
use rf_daq::widgets::{Binding, BindingSet, MemoryWidget, WidgetKind};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about = "RF bench measurements over SCPI")]
struct Args {
    /// Settings file (TOML or YAML)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Talk to a simulated analyzer / generator bench instead of hardware
    #[arg(long, default_value_t = false)]
    simulate: bool,
    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the identity of both instruments
    Idn,
    /// Locate a CW signal by zooming in on the analyzer's peak
    FindCw,
    /// Step the generator and record the received peak at each frequency
    Sweep {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Stitch a wide high-resolution trace around the current center
    Hires,
    /// Gain, OP1dB, OIP3 and OIP5 against frequency
    Pa {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Validate field values and store them in the parameter file
    SaveParams {
        /// Analyzer IP address
        #[arg(long)]
        sa_ip: Option<String>,
        /// Generator IP address
        #[arg(long)]
        sg_ip: Option<String>,
        /// Sweep start (MHz)
        #[arg(long)]
        f_start: Option<String>,
        /// Sweep stop (MHz)
        #[arg(long)]
        f_stop: Option<String>,
        /// Sweep step (MHz)
        #[arg(long)]
        f_step: Option<String>,
    },
}

#[derive(clap::Args)]
struct RangeArgs {
    /// First frequency (MHz)
    #[arg(long)]
    start: Option<f64>,
    /// Last frequency (MHz)
    #[arg(long)]
    stop: Option<f64>,
    /// Step (MHz)
    #[arg(long)]
    step: Option<f64>,
}

impl RangeArgs {
    fn apply(&self, base: &ScanRange) -> ScanRange {
        ScanRange {
            start_mhz: self.start.unwrap_or(base.start_mhz),
            stop_mhz: self.stop.unwrap_or(base.stop_mhz),
            step_mhz: self.step.unwrap_or(base.step_mhz),
        }
    }
}

/// Field names shared by the parameter file and the bindings.
const SA_IP: &str = "sa_ip";
const SG_IP: &str = "sg_ip";
const F_START: &str = "f_start";
const F_STOP: &str = "f_stop";
const F_STEP: &str = "f_step";

fn simulated_bench() -> SimulatedBench {
    let mut state = BenchState::default();
    state.sg_freq_hz = 1_234.567_8e6;
    state.sg_power_dbm = 5.0;
    state.sg_output_on = true;
    state.center_hz = state.sg_freq_hz;
    state.dut = Some(AmplifierModel::default());
    SimulatedBench::new(state)
}

fn connector(args: &Args, settings: &Settings) -> Box<dyn Connector> {
    if args.simulate {
        info!("Using the simulated bench");
        Box::new(
            SimConnector::new(simulated_bench())
                .with_instrument(settings.analyzer.address.clone(), SimRole::Analyzer)
                .with_instrument(settings.generator.address.clone(), SimRole::Generator),
        )
    } else {
        Box::new(TcpConnector)
    }
}

/// Last used addresses from the parameter file take the place of the
/// configured ones when they are valid.
fn apply_saved_addresses(settings: &mut Settings) -> anyhow::Result<()> {
    let Some(params) = ParamStore::load(&settings.application.params_file)? else {
        return Ok(());
    };
    for (key, instrument) in [(SA_IP, &mut settings.analyzer), (SG_IP, &mut settings.generator)] {
        if let Some(ip) = params.get_str(key) {
            instrument.address = FieldGuard::check_ip(key, ip, &instrument.address).value;
        }
    }
    Ok(())
}

async fn connect(
    connector: &dyn Connector,
    settings: &Settings,
) -> anyhow::Result<(ScpiSession, ScpiSession)> {
    let policy = &settings.connection.retry;
    let timeout = settings.connection.timeout;
    let (analyzer, generator) = (&settings.analyzer, &settings.generator);
    let sa = connect_with_retry(connector, &analyzer.address, &analyzer.name, policy, timeout).await;
    let sg = connect_with_retry(connector, &generator.address, &generator.name, policy, timeout).await;
    match (sa, sg) {
        (Some(sa), Some(sg)) => Ok((sa, sg)),
        (sa, _) => bail!(
            "could not connect to the {}",
            if sa.is_none() { "analyzer" } else { "generator" }
        ),
    }
}

/// Run `procedure` to completion, printing its events. Ctrl-C requests a stop.
async fn run_scan<P: ScanProcedure>(procedure: P) -> anyhow::Result<ScanOutcome<P>> {
    let (handle, mut events) = ScanWorker::new(procedure).spawn();

    let stop = handle.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop requested");
            stop.request();
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Progress(p) => println!("[{:>3}%]", p),
            ScanEvent::Log(message) => println!("{}", message),
            ScanEvent::Metric { name, value } => println!("  {:<6} {:>9.2}", name, value),
            ScanEvent::Data(series) => info!(
                "{} points{}",
                series.len(),
                series
                    .label
                    .as_deref()
                    .map(|l| format!(" ({})", l))
                    .unwrap_or_default()
            ),
        }
    }

    let outcome = handle.join().await?;
    if let Some(e) = &outcome.error {
        warn!("Scan ended with error: {}", e);
    }
    Ok(outcome)
}

async fn close_all(sessions: impl IntoIterator<Item = ScpiSession>) {
    for mut session in sessions {
        if let Err(e) = session.close().await {
            warn!("{}: close failed: {}", session.name(), e);
        }
    }
}

fn save_series<P: ScanProcedure>(
    settings: &Settings,
    prefix: &str,
    outcome: &ScanOutcome<P>,
) -> anyhow::Result<()> {
    let path = default_output_path(&settings.application.output_dir, prefix);
    CsvWriter::write_series(&path, &outcome.procedure.results())
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Saved {}", path.display());
    Ok(())
}

fn save_params(
    settings: &Settings,
    fields: [(&'static str, Option<String>); 5],
) -> anyhow::Result<()> {
    let path = &settings.application.params_file;
    let mut params = ParamStore::load(path)?.unwrap_or_default();

    let mut bindings = BindingSet::new();
    let text = |initial: &str| MemoryWidget::new(WidgetKind::TextField, initial.to_string());
    let number = |initial: f64| MemoryWidget::new(WidgetKind::Slider, initial);
    let range = &settings.sweep_range;
    for (name, widget) in [
        (SA_IP, text(&settings.analyzer.address)),
        (SG_IP, text(&settings.generator.address)),
        (F_START, number(range.start_mhz)),
        (F_STOP, number(range.stop_mhz)),
        (F_STEP, number(range.step_mhz)),
    ] {
        bindings.insert(
            name,
            Binding::with_callback(widget, move |v| info!("{} = {}", name, v)),
        );
    }
    let missing = bindings.apply_params(&params)?;
    if !missing.is_empty() {
        info!("No saved value for {}", missing.join(", "));
    }

    let limits = &settings.limits;
    for (name, input) in fields {
        let (Some(input), Some(binding)) = (input, bindings.get_mut(name)) else {
            continue;
        };
        let current = binding.get()?;
        if name == SA_IP || name == SG_IP {
            let checked = FieldGuard::check_ip(name, &input, &current.to_string());
            binding.set(checked.value, true)?;
        } else {
            let last = current.as_f64().unwrap_or_default();
            let freq_range = limits.freq_min_mhz..=limits.freq_max_mhz;
            let checked = FieldGuard::check_f64(name, &input, last, freq_range);
            binding.set(checked.value, true)?;
        }
    }

    bindings.collect_params(&mut params)?;
    params.save(path)?;
    println!("Saved {} parameters to {}", params.len(), path.display());
    Ok(())
}

async fn measure(
    command: &Command,
    settings: &Settings,
    mut sa: ScpiSession,
    mut sg: ScpiSession,
) -> anyhow::Result<ScanState> {
    let state = match command {
        Command::Idn => {
            for session in [&mut sa, &mut sg] {
                let identity = session.identify().await?;
                println!("{}: {}", session.name(), identity);
            }
            close_all([sa, sg]).await;
            ScanState::Completed
        }
        // Handled without connecting.
        Command::SaveParams { .. } => {
            close_all([sa, sg]).await;
            ScanState::Idle
        }
        Command::FindCw => {
            let search = PeakSearch::new(sa, settings.peak_search.clone())?;
            let outcome = run_scan(search).await?;
            if let Some(peak) = outcome.procedure.peak() {
                println!("Peak: {:.6} MHz, {:.2} dBm", peak.freq_mhz(), peak.power_dbm);
            }
            let state = outcome.state;
            close_all([outcome.procedure.into_session(), sg]).await;
            state
        }
        Command::Sweep { range } => {
            let plan = range.apply(&settings.sweep_range).plan()?;
            let sweep = SpectrumSweep::new(sa, sg, plan, settings.sweep.clone());
            let outcome = run_scan(sweep).await?;
            save_series(settings, "sweep", &outcome)?;
            let state = outcome.state;
            let (sa, sg) = outcome.procedure.into_sessions();
            close_all([sa, sg]).await;
            state
        }
        Command::Hires => {
            let snapshot = HiResSnapshot::new(sa, settings.hires.clone());
            let outcome = run_scan(snapshot).await?;
            save_series(settings, "hires", &outcome)?;
            let state = outcome.state;
            close_all([outcome.procedure.into_session(), sg]).await;
            state
        }
        Command::Pa { range } => {
            let plan = range.apply(&settings.pa_range).plan()?;
            let pa = PaCharacterization::new(sa, sg, plan, settings.pa.clone());
            let outcome = run_scan(pa).await?;
            let path = default_output_path(&settings.application.output_dir, "pa");
            CsvWriter::write_pa(&path, outcome.procedure.records())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Saved {}", path.display());
            let state = outcome.state;
            let (sa, sg) = outcome.procedure.into_sessions();
            close_all([sa, sg]).await;
            state
        }
    };
    Ok(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_or_default(args.config.as_deref())
        .context("loading settings")?;
    if let Some(level) = &args.log_level {
        settings.application.log_level = level.clone();
    }
    rf_daq::logging::init(&settings.application.log_level);

    let state = match &args.command {
        Command::SaveParams { sa_ip, sg_ip, f_start, f_stop, f_step } => {
            return save_params(
                &settings,
                [
                    (SA_IP, sa_ip.clone()),
                    (SG_IP, sg_ip.clone()),
                    (F_START, f_start.clone()),
                    (F_STOP, f_stop.clone()),
                    (F_STEP, f_step.clone()),
                ],
            );
        }
        command => {
            apply_saved_addresses(&mut settings)?;
            let connector = connector(&args, &settings);
            let (sa, sg) = connect(connector.as_ref(), &settings).await?;
            measure(command, &settings, sa, sg).await?
        }
    };

    info!("Done: {}", state);
    if state == ScanState::Failed {
        bail!("scan failed");
    }
    Ok(())
}
