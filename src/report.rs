//! Human-readable test reports.
//!
//! Every report is a typed value; `Display` renders the line-oriented text that test
//! scripts scrape. Where the text goes is decided by a [`ReportSink`].

use log::info;
use std::fmt;

use crate::chip::{EdIndication, LoLockConfirm, RxPacketIndication, TdmeStatus};
use crate::config::TestParameters;
use crate::controller::TestMode;
use crate::results::TestResults;

#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Mode banner, emitted on every arm and disarm
    TestMode(TestMode),
    Parameters(TestParameters),
    PacketTransmitted {
        status: TdmeStatus,
        sequence_number: u8,
        data: Vec<u8>,
    },
    TransmitAnalysis {
        packet_count: u32,
        /// (no-acks, channel access failures) for MAC-assisted runs
        mac_failures: Option<(u32, u32)>,
    },
    PacketReceived(RxPacketIndication),
    /// Interim receive summary
    ReceiveAnalysis(ReceiveSummary),
    /// End of test receive summary
    TestResult(ReceiveSummary),
    EnergyDetected {
        indication: EdIndication,
        count: u32,
    },
    LoLocking {
        confirm: LoLockConfirm,
        ntest: u8,
    },
    Exit(String),
}

/// Snapshot of the run state plus the parameters that shape the receive summaries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiveSummary {
    pub results: TestResults,
    pub packet_period_ms: u16,
    pub rx_ffsync: bool,
}

/// Destination for reports.
pub trait ReportSink {
    fn report(&mut self, report: Report);
}

/// Writes every report line through the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ReportSink for LogReporter {
    fn report(&mut self, report: Report) {
        for line in report.to_string().lines() {
            info!("{}", line);
        }
    }
}

impl ReportSink for Vec<Report> {
    fn report(&mut self, report: Report) {
        self.push(report);
    }
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    fn report(&mut self, report: Report) {
        (**self).report(report);
    }
}

/// Hex dump of a packet without its two FCS bytes
fn write_payload(f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result {
    let end = data.len().saturating_sub(2);
    for byte in &data[..end] {
        write!(f, " {:02X}", byte)?;
    }
    Ok(())
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::TestMode(mode) => write!(f, "PHY Testmode initialised for {}", mode),

            Report::Parameters(p) => {
                writeln!(f, "PHY Test Parameter Set:")?;
                writeln!(f, "PACKETPERIOD   = {} ms", p.packet_period_ms)?;
                writeln!(f, "PACKETLENGTH   = {} Bytes", p.packet_length)?;
                writeln!(f, "NUMBEROFPKTS   = {}", p.number_of_packets)?;
                writeln!(f, "PACKETDATATYPE = {}", p.payload)?;
                writeln!(f, "CHANNEL        = {} ({:02X})", p.channel, p.channel)?;
                writeln!(f, "TXPOWER        = IB: {}; PB: {}; BOOST: {}",
                    p.tx_power.ib, p.tx_power.pb, p.tx_power.boost)?;
                writeln!(f, "EDTHRESHOLD    = {}", p.ed_threshold)?;
                writeln!(f, "RX_FFSYNC      = {}", p.rx_ffsync as u8)?;
                writeln!(f, "LO_1_RXTXB     = {}", p.lo.lo1_rx_txb as u8)?;
                writeln!(f, "LO_2_FDAC      = {} ({:02X})", p.lo.lo2_fdac, p.lo.lo2_fdac)?;
                writeln!(f, "LO_3_LOCKS     = {}", p.lo.lo3_locks)?;
                writeln!(f, "LO_3_PERIOD    = {}", p.lo.lo3_period_ms)?;
                writeln!(f, "ATM            = {} ({:02X})", p.atm, p.atm)?;
                write!(f, "MACENABLED     = {}", p.mac_enabled as u8)
            }

            Report::PacketTransmitted { status, sequence_number, data } => {
                if *status == TdmeStatus::LoError {
                    return write!(f, "Tx: LO Error");
                }
                write!(f, "Tx: SN={:3} PL={:3}:", sequence_number, data.len())?;
                write_payload(f, data)
            }

            Report::TransmitAnalysis { packet_count, mac_failures } => {
                write!(f, "Tx: {} Packets sent", packet_count)?;
                if let Some((no_acks, cafs)) = mac_failures {
                    write!(f, "\n{} No-Acks; {} Channel Access Failures", no_acks, cafs)?;
                }
                Ok(())
            }

            Report::PacketReceived(ind) => {
                if ind.status == TdmeStatus::LoError {
                    return write!(f, "Rx: LO Error");
                }
                write!(f, "Rx: PL={:3}:", ind.data.len())?;
                write_payload(f, &ind.data)?;
                match ind.status {
                    TdmeStatus::FcsError => write!(f, "; CRCErr")?,
                    TdmeStatus::ShrError => write!(f, "; SHRErr")?,
                    TdmeStatus::PhrError => write!(f, "; PHRErr")?,
                    _ => {}
                }
                write!(f, "; ED: {}; CS: {}; FO: {}", ind.ed_value, ind.cs_value, ind.fo_value as i8)
            }

            Report::ReceiveAnalysis(s) => {
                let r = &s.results;
                writeln!(f, "Rx: {} Packets received, {} Errors", r.packet_count, r.error_total())?;
                if s.packet_period_ms != 0 {
                    if s.rx_ffsync {
                        writeln!(f, "Rx Error  Analysis: CRC: {}; PHR: {}; SHR: {}; PRE: {}; Missed: {}",
                            r.crc_errors, r.phr_errors, r.shr_errors, r.preamble_errors, r.missed)?;
                    } else {
                        writeln!(f, "Rx Error  Analysis: CRC: {}; Missed: {}", r.crc_errors, r.missed)?;
                    }
                }
                write!(f, "Rx Signal Analysis: ED: {}; CS: {}; FO: {}", r.ed_avg, r.cs_avg, r.fo_avg)
            }

            Report::TestResult(s) => {
                let r = &s.results;
                writeln!(f, "Test Result: {} Packets received, {} Errors", r.packet_count, r.error_total())?;
                if s.rx_ffsync {
                    writeln!(f, "Error Analysis: CRC: {}; PHR: {}; SHR: {}; PRE: {}; Missed: {}",
                        r.crc_errors, r.phr_errors, r.shr_errors, r.preamble_errors, r.missed)?;
                } else {
                    writeln!(f, "Error Analysis: CRC: {}; Missed: {}", r.crc_errors, r.missed)?;
                }
                writeln!(f, "Rx Overall Averages: ED: {}; CS: {}; FO: {}",
                    r.ed_avg_total, r.cs_avg_total, r.fo_avg_total)?;
                writeln!(f, "Rx Min/Max Analysis: ED Max: {}; ED Min: {}; CS Max: {}; CS Min: {}",
                    r.ed_max, r.ed_min, r.cs_max, r.cs_min)?;
                if s.rx_ffsync {
                    writeln!(f, "Rx Missed Pkt Analysis: SHR: {}; PHR: {}", r.shr_errors, r.phr_errors)?;
                }
                write!(f, "Test completed")
            }

            Report::EnergyDetected { indication, count } => write!(
                f,
                "ED above {:3}: ED={:3}; CS={:3}; THigh={:5} us; N={}",
                indication.threshold,
                indication.ed_value,
                indication.cs_value,
                indication.time_above_threshold_us,
                count
            ),

            Report::LoLocking { confirm, ntest } => {
                write!(f, "{} Ch={:3} N={:3} FDAC={:3} AMP={:3}",
                    if confirm.rx_txb { "Rx" } else { "Tx" },
                    confirm.channel, ntest, confirm.fdac, confirm.amp)?;
                if !confirm.rx_txb {
                    write!(f, " TXCAL={:3}", confirm.txcal)?;
                }
                if confirm.status == TdmeStatus::LoError {
                    write!(f, " LOCK FAILURE")?;
                }
                Ok(())
            }

            Report::Exit(msg) => write!(f, "PHY Test Exit: {}.", msg),
        }
    }
}
