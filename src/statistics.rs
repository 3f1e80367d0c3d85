use log::debug;

use crate::results::TestResults;

/// Running ED/CS/FO sums feeding the interim and final averages in [`TestResults`].
#[derive(Debug, Default, Clone)]
pub struct Statistics {
    acc_fo: i32,
    acc_ed: u32,
    acc_cs: u32,
    /// Samples since the last interim report
    count_interim: u32,
    /// Samples over the whole run
    count_total: u32,
    // Cumulative sums of everything already rolled up by `report`
    total_fo: i32,
    total_ed: u32,
    total_cs: u32,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero all accumulators.
    pub fn init(&mut self) {
        *self = Self::default();
    }

    /// Add one received packet's values. `fo` is the raw two's complement offset.
    pub fn accumulate(&mut self, results: &mut TestResults, ed: u8, cs: u8, fo: u8) {
        // Sums wrap like the chip's 32-bit accumulators on very long runs
        self.acc_fo = self.acc_fo.wrapping_add(fo as i8 as i32);
        self.acc_ed = self.acc_ed.wrapping_add(ed as u32);
        self.acc_cs = self.acc_cs.wrapping_add(cs as u32);
        self.count_interim = self.count_interim.wrapping_add(1);
        self.count_total = self.count_total.wrapping_add(1);

        results.ed_max = results.ed_max.max(ed);
        results.ed_min = results.ed_min.min(ed);
        results.cs_max = results.cs_max.max(cs);
        results.cs_min = results.cs_min.min(cs);
    }

    /// Compute interim averages and fold the interim sums into the cumulative sums.
    pub fn report(&mut self, results: &mut TestResults) {
        if self.count_interim != 0 {
            results.fo_avg = divs32round(self.acc_fo, self.count_interim as i32);
            results.ed_avg = divu32round(self.acc_ed, self.count_interim);
            results.cs_avg = divu32round(self.acc_cs, self.count_interim);
        } else {
            results.fo_avg = 0;
            results.ed_avg = 0;
            results.cs_avg = 0;
        }
        debug!("Stats: interim n={} ED={} CS={} FO={}",
            self.count_interim, results.ed_avg, results.cs_avg, results.fo_avg);

        self.total_fo = self.total_fo.wrapping_add(self.acc_fo);
        self.total_ed = self.total_ed.wrapping_add(self.acc_ed);
        self.total_cs = self.total_cs.wrapping_add(self.acc_cs);
        self.acc_fo = 0;
        self.acc_ed = 0;
        self.acc_cs = 0;
        self.count_interim = 0;
    }

    /// Fold what is left and compute the run averages.
    /// A run without samples reports zero minima instead of the 255 sentinel.
    pub fn finalize(&mut self, results: &mut TestResults) {
        self.total_fo = self.total_fo.wrapping_add(self.acc_fo);
        self.total_ed = self.total_ed.wrapping_add(self.acc_ed);
        self.total_cs = self.total_cs.wrapping_add(self.acc_cs);
        self.acc_fo = 0;
        self.acc_ed = 0;
        self.acc_cs = 0;
        self.count_interim = 0;

        if self.count_total != 0 {
            results.fo_avg_total = divs32round(self.total_fo, self.count_total as i32);
            results.ed_avg_total = divu32round(self.total_ed, self.count_total);
            results.cs_avg_total = divu32round(self.total_cs, self.count_total);
        } else {
            results.fo_avg_total = 0;
            results.ed_avg_total = 0;
            results.cs_avg_total = 0;
            results.ed_min = 0;
            results.cs_min = 0;
        }
        debug!("Stats: final n={} ED={} CS={} FO={}",
            self.count_total, results.ed_avg_total, results.cs_avg_total, results.fo_avg_total);
    }

    pub fn sample_count(&self) -> u32 {
        self.count_total
    }
}

/// Unsigned division rounding to nearest, halves rounded up. Returns 0 for a zero divisor.
pub fn divu32round(va: u32, vb: u32) -> u32 {
    if vb == 0 {
        return 0;
    }
    let quotient = va / vb;
    let remainder = va % vb;
    if remainder >= vb - remainder {
        quotient + 1
    } else {
        quotient
    }
}

/// Signed division rounding to nearest, halves rounded away from zero.
/// Returns 0 for a zero divisor.
pub fn divs32round(va: i32, vb: i32) -> i32 {
    if vb == 0 {
        return 0;
    }
    let (n, d) = (va as i64, vb as i64);
    let mut quotient = n / d;
    let remainder = (n % d).abs();
    if remainder * 2 >= d.abs() {
        quotient += if (n < 0) == (d < 0) { 1 } else { -1 };
    }
    quotient as i32
}
