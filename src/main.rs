use anyhow::{anyhow, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use phytest::clock::{HostClock, MsClock, SimClock};
use phytest::config::TestParameters;
use phytest::controller::{TestController, TestMode};
use phytest::report::LogReporter;
use phytest::sim::{SimImpairments, SimRadio};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Test mode to run
    #[arg(value_enum)]
    mode: TestMode,

    /// JSON file with test parameters; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Route data through the MAC (acks, retries)
    #[arg(long, default_value_t = false)]
    mac: bool,

    /// Stop after this many milliseconds of (virtual) time
    #[arg(short, long, default_value_t = 60_000)]
    duration_ms: u64,

    /// Interval of the simulated peer's packets
    #[arg(long, default_value_t = 100)]
    peer_period_ms: u64,

    /// Probability of a peer packet being lost
    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,

    /// Probability of a peer packet arriving with a CRC error
    #[arg(long, default_value_t = 0.0)]
    error_rate: f64,

    /// Probability of a MAC data request not being acknowledged
    #[arg(long, default_value_t = 0.0)]
    no_ack_rate: f64,

    /// Probability of a MAC frame being delivered twice
    #[arg(long, default_value_t = 0.0)]
    retransmit_rate: f64,

    /// Probability of an LO lock request failing
    #[arg(long, default_value_t = 0.0)]
    lo_fail_rate: f64,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Pace the loop by the wall clock instead of running virtual time flat out
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Print the final results as JSON on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl Args {
    fn impairments(&self) -> Result<SimImpairments> {
        let rates = [
            ("loss-rate", self.loss_rate),
            ("error-rate", self.error_rate),
            ("no-ack-rate", self.no_ack_rate),
            ("retransmit-rate", self.retransmit_rate),
            ("lo-fail-rate", self.lo_fail_rate),
        ];
        if let Some((name, rate)) = rates.iter().find(|(_, r)| !(0.0..=1.0).contains(r)) {
            return Err(anyhow!("--{} {} outside 0.0..=1.0", name, rate));
        }
        Ok(SimImpairments {
            loss_rate: self.loss_rate,
            error_rate: self.error_rate,
            no_ack_rate: self.no_ack_rate,
            retransmit_rate: self.retransmit_rate,
            lo_fail_rate: self.lo_fail_rate,
        })
    }
}

fn load_parameters(args: &Args) -> Result<TestParameters> {
    let mut params = match &args.config {
        Some(path) => {
            info!("Loading test parameters from {}", path.display());
            TestParameters::from_json_file(path)?
        }
        None => TestParameters::default(),
    };
    if args.mac {
        params.mac_enabled = true;
    }
    params.validate()?;
    Ok(params)
}

/// Run one test against the simulated radio until it ends, the time is up or Ctrl+C.
fn run<K, F>(args: &Args, params: TestParameters, clock: K, running: &AtomicBool, tick: F) -> Result<()>
where
    K: MsClock + Clone,
    F: Fn(),
{
    let radio = SimRadio::new(clock.clone(), args.seed)
        .with_peer_period(args.peer_period_ms)
        .with_peer_packet_length(params.packet_length)
        .with_impairments(args.impairments()?);

    let mac_enabled = params.mac_enabled;
    let mut controller = TestController::with_parameters(radio, clock.clone(), LogReporter, params);
    controller.configure_mac(mac_enabled);
    controller.report_parameters();

    controller.request_mode(args.mode as u8)?;

    let start = clock.now_ms();
    while running.load(Ordering::SeqCst) && controller.is_running() {
        if clock.elapsed_since(start) >= args.duration_ms {
            info!("Run time of {} ms reached", args.duration_ms);
            break;
        }

        if let Err(e) = controller.process_loop_iteration() {
            warn!("Error in loop: {}", e);
        }

        tick();
    }

    if controller.is_running() {
        controller.deinitialise();
    }

    let counters = controller.transport().counters();
    info!(
        "Radio: {} test packets, {} data requests, {} lock requests, {} peer packets",
        counters.test_packets_sent, counters.data_requests, counters.lock_requests, counters.peer_packets
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(controller.results())?);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let params = load_parameters(&args)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Stopping test...");
        r.store(false, Ordering::SeqCst);
    })?;

    if args.realtime {
        run(&args, params, HostClock::new(), &running, || {
            thread::sleep(Duration::from_millis(1))
        })?;
    } else {
        let clock = SimClock::new();
        let tick_clock = clock.clone();
        run(&args, params, clock, &running, move || tick_clock.advance(1))?;
    }

    info!("Exiting.");
    Ok(())
}
