use std::fmt;

use serde::{Deserialize, Serialize};

pub mod window;

pub use window::AverageWindow;

/// Number of samples kept by each rolling statistics window.
pub const STATISTICS_WINDOW_SIZE: usize = 64;

/// Scalar value carried by a [`Statistic`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatValue {
    U64(u64),
    F64(f64),
    Text(String),
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U64(value) => write!(f, "{value}"),
            Self::F64(value) => write!(f, "{value:.2}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Named sample emitted once per statistics pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    /// Stage that produced the sample.
    pub owner: String,
    pub name: &'static str,
    pub value: StatValue,
}

impl Statistic {
    pub fn u64(owner: &str, name: &'static str, value: u64) -> Self {
        Self {
            owner: owner.to_owned(),
            name,
            value: StatValue::U64(value),
        }
    }

    pub fn f64(owner: &str, name: &'static str, value: f64) -> Self {
        Self {
            owner: owner.to_owned(),
            name,
            value: StatValue::F64(value),
        }
    }
}

/// Receiver for statistics samples. Purely observational.
pub trait StatisticsSink {
    fn record(&mut self, statistic: Statistic);
}

impl StatisticsSink for Vec<Statistic> {
    fn record(&mut self, statistic: Statistic) {
        self.push(statistic);
    }
}
