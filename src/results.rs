use serde::{Deserialize, Serialize};

/// Mutable state of one test run.
///
/// Reset at the start of every run; mutated only by the engine owning the active mode.
/// In MAC-assisted transmit runs the SHR and PHR counters tally no-acks and
/// channel access failures.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestResults {
    /// Wraps at 16 bits; the low byte goes on air
    pub sequence_number: u16,
    pub packet_count: u32,
    /// Edge flag raised by an indication, cleared by the polled engine
    pub packet_received: bool,
    pub test_running: bool,

    // ========================================================================
    // Error counters
    // ========================================================================
    pub lo_errors: u32,
    pub crc_errors: u32,
    pub phr_errors: u32,
    pub shr_errors: u32,
    pub preamble_errors: u32,
    pub missed: u32,

    // ========================================================================
    // Signal statistics
    // ========================================================================
    /// Averages between interim reports
    pub fo_avg: i32,
    pub ed_avg: u32,
    pub cs_avg: u32,
    /// Averages over the whole run, valid after the final rollup
    pub fo_avg_total: i32,
    pub ed_avg_total: u32,
    pub cs_avg_total: u32,
    pub ed_max: u8,
    pub ed_min: u8,
    pub cs_max: u8,
    pub cs_min: u8,
}

impl Default for TestResults {
    fn default() -> Self {
        TestResults {
            sequence_number: 0,
            packet_count: 0,
            packet_received: false,
            test_running: false,

            lo_errors: 0,
            crc_errors: 0,
            phr_errors: 0,
            shr_errors: 0,
            preamble_errors: 0,
            missed: 0,

            fo_avg: 0,
            ed_avg: 0,
            cs_avg: 0,
            fo_avg_total: 0,
            ed_avg_total: 0,
            cs_avg_total: 0,
            ed_max: 0,
            ed_min: u8::MAX,
            cs_max: 0,
            cs_min: u8::MAX,
        }
    }
}

impl TestResults {
    /// Errors counted against the packet error rate
    pub fn error_total(&self) -> u32 {
        self.crc_errors + self.missed
    }
}
