//! Key metrics for a selected time period (the dashboard's timeline view).
//!
//! There is no historical store behind these numbers: each figure is a
//! configured yearly base scaled to the period length, plus uniform noise.

use std::sync::Mutex;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use time::Date;

use crate::config::SummaryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Range { start: Date, end: Date },
    Day(Date),
}

impl Period {
    /// Fraction of a year the period represents; a single day counts as 1.
    pub fn multiplier(&self) -> f64 {
        match self {
            Period::Range { start, end } => (*end - *start).whole_days() as f64 / 365.0,
            Period::Day(_) => 1.0,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SummaryError {
    #[error("period end {end} is before its start {start}")]
    EndBeforeStart { start: Date, end: Date },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SummaryValue {
    pub value: i64,
    pub delta: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodSummary {
    pub energy_kwh: SummaryValue,
    pub co2_kg: SummaryValue,
    pub cost_eur: SummaryValue,
}

pub struct PeriodSummarizer {
    config: SummaryConfig,
    rng: Mutex<StdRng>,
}

impl PeriodSummarizer {
    pub fn new(config: SummaryConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn summarize(&self, period: Period) -> Result<PeriodSummary, SummaryError> {
        if let Period::Range { start, end } = period {
            if end < start {
                return Err(SummaryError::EndBeforeStart { start, end });
            }
        }

        let m = period.multiplier();
        Ok(PeriodSummary {
            energy_kwh: self.value(self.config.energy_kwh, m),
            co2_kg: self.value(self.config.co2_kg, m),
            cost_eur: self.value(self.config.cost_eur, m),
        })
    }

    fn value(&self, base: f64, multiplier: f64) -> SummaryValue {
        let jitter = (base * self.config.jitter_ratio).abs();
        let noise = if jitter > 0.0 {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(-jitter..=jitter)
        } else {
            0.0
        };

        let value = (base * multiplier + noise).round_ties_even();
        SummaryValue {
            value: value as i64,
            delta: (value * self.config.delta_ratio).round_ties_even() as i64,
        }
    }
}
