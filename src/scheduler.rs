/// Decides when an interim report is due.
///
/// Every processed packet is one tick; the number of ticks between reports is chosen
/// from the packet period so that summaries arrive roughly every 5 to 12 seconds.
#[derive(Debug, Default, Clone)]
pub struct ReportScheduler {
    ticks: u16,
}

impl ReportScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.ticks = 0;
    }

    /// Ticks between reports for a given packet period.
    pub fn interval(packet_period_ms: u16) -> u16 {
        match packet_period_ms {
            1000.. => 5,
            250.. => 20,
            100.. => 50,
            50.. => 100,
            25.. => 200,
            _ => 500,
        }
    }

    /// Count one tick. Returns true (and restarts counting) when a report is due.
    pub fn tick(&mut self, packet_period_ms: u16) -> bool {
        self.ticks = self.ticks.saturating_add(1);
        if self.ticks >= Self::interval(packet_period_ms) {
            self.ticks = 0;
            true
        } else {
            false
        }
    }
}
