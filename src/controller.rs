//! Test mode controller - owns the active test mode and the run state
//!
//! The controller is polled: `process_loop_iteration` takes at most one pending chip
//! indication and then runs `handler`, which advances the engine of the active mode.
//! Nothing in here blocks; every wait is an elapsed-time comparison against the clock.

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;

use crate::chip::{Indication, TdmeAttribute, TdmeTestMode};
use crate::clock::MsClock;
use crate::config::TestParameters;
use crate::lo_sweep::LoSweep;
use crate::report::{ReceiveSummary, Report, ReportSink};
use crate::results::TestResults;
use crate::scheduler::ReportScheduler;
use crate::statistics::Statistics;
use crate::traits::ChipTransport;

// ============================================================================
// TEST MODES
// ============================================================================

/// Test modes selectable by the host, with their wire values
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    #[default]
    Off = 0,
    /// Periodic packet transmission
    TxPkt = 1,
    /// Continuous carrier
    TxCont = 2,
    /// Packet error rate measurement
    RxPer = 3,
    /// Packet sniffer
    RxPsn = 4,
    /// Energy sniffer
    RxEdsn = 5,
    /// LO closed loop
    Lo1 = 6,
    /// LO open loop
    Lo2 = 7,
    /// LO locking sweep
    Lo3 = 8,
}

impl TestMode {
    /// Test mode armed on the transceiver for this host mode
    pub fn tdme_mode(self) -> TdmeTestMode {
        match self {
            TestMode::Off => TdmeTestMode::Off,
            TestMode::TxPkt | TestMode::TxCont => TdmeTestMode::Tx,
            TestMode::RxPer | TestMode::RxPsn => TdmeTestMode::Rx,
            TestMode::RxEdsn => TdmeTestMode::Ed,
            TestMode::Lo1 => TdmeTestMode::Lo1,
            TestMode::Lo2 => TdmeTestMode::Lo2,
            TestMode::Lo3 => TdmeTestMode::Lo3,
        }
    }

    /// Modes that keep the transmitter on continuously
    pub fn tx_continuous(self) -> bool {
        matches!(self, TestMode::TxCont | TestMode::Lo1 | TestMode::Lo2)
    }

    /// Modes whose data path goes through the MAC when MAC-assisted testing is on
    pub fn uses_mac(self) -> bool {
        matches!(self, TestMode::TxPkt | TestMode::RxPer | TestMode::RxPsn)
    }
}

impl TryFrom<u8> for TestMode {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => TestMode::Off,
            1 => TestMode::TxPkt,
            2 => TestMode::TxCont,
            3 => TestMode::RxPer,
            4 => TestMode::RxPsn,
            5 => TestMode::RxEdsn,
            6 => TestMode::Lo1,
            7 => TestMode::Lo2,
            8 => TestMode::Lo3,
            other => return Err(anyhow!("Unknown test mode {}", other)),
        })
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestMode::Off => "Normal Mode",
            TestMode::TxPkt => "Tx (Packets)",
            TestMode::TxCont => "Tx (Continuous)",
            TestMode::RxPer => "Rx (PER Test)",
            TestMode::RxPsn => "Rx (Packet Sniffer)",
            TestMode::RxEdsn => "Rx (Energy Sniffer)",
            TestMode::Lo1 => "LO1 (Closed Loop)",
            TestMode::Lo2 => "LO2 (Open Loop)",
            TestMode::Lo3 => "LO3 (Locking Test)",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SESSION STATE
// ============================================================================

/// Everything one test run reads and writes.
#[derive(Debug, Clone, Default)]
pub struct TestSession {
    pub mode: TestMode,
    pub params: TestParameters,
    pub results: TestResults,

    /// Set by an engine once its first-call setup is done
    pub(crate) initialised: bool,
    /// Reference point for cadence gates and missed packet detection
    pub(crate) start_ms: u64,
    pub(crate) scheduler: ReportScheduler,
    pub(crate) stats: Statistics,
    /// RX_PER: the previous slot was declared missed
    pub(crate) missed_last: bool,
    pub(crate) lo_sweep: LoSweep,
    /// MAC receive: DSN of the last data indication
    pub(crate) last_dsn: Option<u8>,
    /// The MAC endpoint was set up when this run was armed
    pub(crate) mac_active: bool,
}

impl TestSession {
    /// Reset all per-run state. Parameters are kept.
    fn reset_run(&mut self) {
        self.initialised = false;
        self.results = TestResults::default();
        self.scheduler.reset();
        self.stats.init();
        self.missed_last = false;
        self.lo_sweep = LoSweep::default();
        self.last_dsn = None;
        self.mac_active = false;
    }

    pub(crate) fn receive_summary(&self) -> ReceiveSummary {
        ReceiveSummary {
            results: self.results,
            packet_period_ms: self.params.packet_period_ms,
            rx_ffsync: self.params.rx_ffsync,
        }
    }

    /// Per-packet reports are only worth printing at slow rates, or when sniffing
    pub(crate) fn reports_each_rx_packet(&self) -> bool {
        self.params.packet_period_ms >= 500 || self.mode == TestMode::RxPsn
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct TestController<T, K, R>
where
    T: ChipTransport,
    K: MsClock,
    R: ReportSink,
{
    pub(crate) transport: T,
    pub(crate) clock: K,
    pub(crate) sink: R,
    pub(crate) session: TestSession,
}

impl<T, K, R> TestController<T, K, R>
where
    T: ChipTransport,
    K: MsClock,
    R: ReportSink,
{
    pub fn new(transport: T, clock: K, sink: R) -> Self {
        TestController {
            transport,
            clock,
            sink,
            session: TestSession::default(),
        }
    }

    pub fn with_parameters(transport: T, clock: K, sink: R, params: TestParameters) -> Self {
        let mut controller = Self::new(transport, clock, sink);
        controller.session.params = params;
        controller
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn session(&self) -> &TestSession {
        &self.session
    }

    pub fn mode(&self) -> TestMode {
        self.session.mode
    }

    pub fn results(&self) -> &TestResults {
        &self.session.results
    }

    pub fn parameters(&self) -> &TestParameters {
        &self.session.params
    }

    /// Parameters may be changed between runs; a running engine reads them live.
    pub fn parameters_mut(&mut self) -> &mut TestParameters {
        &mut self.session.params
    }

    pub fn is_running(&self) -> bool {
        self.session.results.test_running
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    // ========================================================================
    // HOST COMMANDS
    // ========================================================================

    /// Mode OFF and all parameters back to their defaults.
    pub fn reset(&mut self) {
        self.session.mode = TestMode::Off;
        self.session.params = TestParameters::default();
        debug!("PHY test parameters reset to defaults");
    }

    pub fn configure_mac(&mut self, enabled: bool) {
        self.session.params.mac_enabled = enabled;
        if enabled {
            info!("PHYTest configured to MAC Usage");
        } else {
            info!("PHYTest configured to PHY only");
        }
    }

    pub fn report_parameters(&mut self) {
        self.sink.report(Report::Parameters(self.session.params.clone()));
    }

    /// Entry point for a raw mode request from the host.
    ///
    /// Unknown values force mode OFF. A failed arm takes the exit path.
    pub fn request_mode(&mut self, raw: u8) -> Result<()> {
        let mode = match TestMode::try_from(raw) {
            Ok(mode) => mode,
            Err(e) => {
                self.exit(&e.to_string());
                return Err(e);
            }
        };

        if mode == TestMode::Off {
            self.deinitialise();
            return Ok(());
        }

        if let Err(e) = self.initialise(mode) {
            self.exit("Error Initialising PHYTest");
            return Err(e);
        }
        Ok(())
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Configure the transceiver and arm `mode`.
    ///
    /// A run still in progress is finished first. Any failing chip command aborts the
    /// sequence and leaves the mode at OFF.
    pub fn initialise(&mut self, mode: TestMode) -> Result<()> {
        // A mode change always passes through OFF
        if self.session.results.test_running {
            self.deinitialise();
        }

        self.session.mode = mode;
        if let Err(e) = self.arm() {
            self.session.mode = TestMode::Off;
            self.session.results.test_running = false;
            error!("Initialising {} failed: {:#}", mode, e);
            return Err(e);
        }
        Ok(())
    }

    fn arm(&mut self) -> Result<()> {
        let mode = self.session.mode;
        let tx_continuous = mode.tx_continuous();

        for attribute in TdmeAttribute::ARM_ORDER {
            let value = self.session.params.tdme_config(attribute, tx_continuous);
            debug!("TDME-SET {:?} {:02X?}", attribute, value);
            self.transport
                .tdme_set(attribute, &value)
                .with_context(|| format!("TDME-SET {:?} failed", attribute))?;
        }

        self.session.reset_run();
        self.sink.report(Report::TestMode(mode));

        self.transport
            .tdme_testmode(mode.tdme_mode())
            .context("TDME-TESTMODE failed")?;

        if self.session.params.mac_enabled {
            match mode {
                TestMode::TxPkt => self.mac_tx_initialise()?,
                TestMode::RxPer | TestMode::RxPsn => self.mac_rx_initialise()?,
                _ => {}
            }
            self.session.mac_active = mode.uses_mac();
        }

        self.session.start_ms = self.clock.now_ms();
        self.session.results.test_running = true;
        info!("Test started: {} on channel {}", mode, self.session.params.channel);
        Ok(())
    }

    /// Advance the engine of the active mode by one step.
    ///
    /// TX_CONT, LO_1 and LO_2 only need arming and have nothing to do here.
    pub fn handler(&mut self) {
        if !self.session.results.test_running {
            return;
        }

        let outcome = match self.session.mode {
            TestMode::TxPkt => self.transmit_packet().context("Transmit returned error"),
            TestMode::RxPer => self.receive_packet_per(),
            TestMode::RxPsn => {
                self.receive_packet_psn();
                Ok(())
            }
            TestMode::RxEdsn => {
                self.receive_ed();
                Ok(())
            }
            TestMode::Lo3 => self.lo_locking().context("LO locking returned error"),
            TestMode::Off | TestMode::TxCont | TestMode::Lo1 | TestMode::Lo2 => Ok(()),
        };

        if let Err(e) = outcome {
            self.exit(&format!("{:#}", e));
        }
    }

    /// Finish the run: final reports, mode OFF, disarm the chip and tear down the MAC.
    /// Cleanup failures are logged and otherwise ignored.
    pub fn deinitialise(&mut self) {
        let mode = self.session.mode;
        match mode {
            TestMode::TxPkt => self.report_transmit_analysis(),
            TestMode::RxPer | TestMode::RxPsn => {
                self.session.stats.finalize(&mut self.session.results);
                let summary = self.session.receive_summary();
                self.sink.report(Report::TestResult(summary));
            }
            _ => {}
        }

        let mac_active = self.session.mac_active;
        self.session.mac_active = false;

        self.session.initialised = false;
        self.session.results.test_running = false;
        self.session.mode = TestMode::Off;

        self.sink.report(Report::TestMode(TestMode::Off));

        if let Err(e) = self.transport.tdme_testmode(TdmeTestMode::Off) {
            warn!("Could not exit Testmode: {:#}", e);
        }

        if mac_active {
            if let Err(e) = self.mac_deinitialise() {
                warn!("Could not deinitialise MAC Layer: {:#}", e);
            }
        }

        info!("Test stopped after {} packets", self.session.results.packet_count);
    }

    /// Abort: force mode OFF and report why. The chip is left as it is.
    pub fn exit(&mut self, reason: &str) {
        self.session.mode = TestMode::Off;
        self.session.results.test_running = false;
        error!("PHY Test Exit: {}", reason);
        self.sink.report(Report::Exit(reason.to_string()));
    }

    // ========================================================================
    // INDICATIONS
    // ========================================================================

    /// Route an indication to the engine of the active mode. Anything the mode
    /// does not expect is dropped.
    pub fn handle_indication(&mut self, indication: Indication) {
        let mac = self.session.params.mac_enabled;
        match (self.session.mode, indication) {
            (TestMode::RxPer | TestMode::RxPsn, Indication::RxPacket(ind)) if !mac => {
                self.handle_rx_packet(ind)
            }
            (TestMode::RxPer | TestMode::RxPsn, Indication::Data(ind)) if mac => {
                self.handle_data_indication(ind)
            }
            (TestMode::TxPkt, Indication::DataConfirm(confirm)) if mac => {
                self.handle_data_confirm(confirm)
            }
            (TestMode::RxEdsn, Indication::EnergyDetected(ind)) => self.handle_ed_indication(ind),
            (mode, other) => debug!("Ignoring {:?} in mode {:?}", other, mode),
        }
    }

    /// One pass of the cooperative loop.
    pub fn process_loop_iteration(&mut self) -> Result<()> {
        if let Some(indication) = self.transport.poll_indication()? {
            self.handle_indication(indication);
        }
        self.handler();
        Ok(())
    }

    /// Milliseconds since the engine's reference point
    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed_since(self.session.start_ms)
    }

    pub(crate) fn restart_timer(&mut self) {
        self.session.start_ms = self.clock.now_ms();
    }
}

// ============================================================================
// TESTS
// ============================================================================
