use serde::{Deserialize, Serialize};

/// Running sum, mean and variance of a stream of values (Welford).
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    n_vals: usize,
    sum: f64,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;
        self.sum += val;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn n_vals(&self) -> usize {
        self.n_vals
    }

    /// Mean and sample standard deviation over `n_total` values, counting
    /// the ones never added as zeros. `NaN` where too few values exist.
    pub fn report_over(&self, n_total: usize) -> AccumulatorReport {
        let n_vals = self.n_vals as f64;
        let n_zeros = n_total.saturating_sub(self.n_vals) as f64;
        let n = n_vals + n_zeros;

        let mean = if n > 0.0 { self.sum / n } else { f64::NAN };

        let diff_2_sum = if n > 0.0 {
            self.diff_2_sum + self.mean * self.mean * n_vals * n_zeros / n
        } else {
            0.0
        };
        let std_dev = if n > 1.0 {
            (diff_2_sum / (n - 1.0)).sqrt()
        } else {
            f64::NAN
        };

        AccumulatorReport { mean, std_dev }
    }
}
