//! Dense and sparse metric records and their accumulation rules.
//!
//! A dense record lives in a fixed slot of every node (inclusive time plus one
//! slot per strictly-synchronous metric) and accumulates enter/exit deltas.
//! A sparse record is created on demand, keyed by metric, and accumulates
//! triggered values under one of three `TriggerScheme`s.

use std::fmt::Debug;

use crate::definitions::MetricHandle;
use crate::error::Error;

/// Running statistics of one enter/exit-paired metric on one node.
///
/// Sums use wrapping arithmetic: a suspended untied task carries its
/// already-accounted time as the two's complement `-intermediate_sum`, which
/// the next exit cancels out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DenseMetric {
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub squares: u64,
    pub start_value: u64,
    pub intermediate_sum: u64,
}

/// An exit value smaller than the matching enter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decrease {
    pub start: u64,
    pub end: u64,
}

impl Default for DenseMetric {
    fn default() -> Self {
        Self {
            sum: 0,
            min: u64::MAX,
            max: 0,
            squares: 0,
            start_value: 0,
            intermediate_sum: 0,
        }
    }
}

impl DenseMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, value: u64) {
        self.start_value = value;
    }

    /// Close one interval ending at `end_value`.
    pub fn update(&mut self, end_value: u64) -> Result<(), Decrease> {
        let delta = end_value.checked_sub(self.start_value).ok_or(Decrease {
            start: self.start_value,
            end: end_value,
        })?;
        let diff = delta.wrapping_add(self.intermediate_sum);
        self.intermediate_sum = 0;
        self.sum = self.sum.wrapping_add(diff);
        self.min = self.min.min(diff);
        self.max = self.max.max(diff);
        self.squares = self.squares.wrapping_add(diff.wrapping_mul(diff));
        Ok(())
    }

    /// Fold `other` into `self`. Order of merges does not matter.
    pub fn merge(&mut self, other: &DenseMetric) {
        self.sum = self.sum.wrapping_add(other.sum);
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.squares = self.squares.wrapping_add(other.squares);
        self.intermediate_sum = self.intermediate_sum.wrapping_add(other.intermediate_sum);
    }

    /// Overwrite the statistics, keeping the running start value.
    pub fn copy_from(&mut self, other: &DenseMetric) {
        self.sum = other.sum;
        self.min = other.min;
        self.max = other.max;
        self.squares = other.squares;
        self.intermediate_sum = other.intermediate_sum;
    }

    pub fn subtract(&mut self, other: &DenseMetric) {
        self.sum = self.sum.wrapping_sub(other.sum);
        self.squares = self.squares.wrapping_sub(other.squares);
    }

    /// Suspend an untied task: the interval is accounted right away and also
    /// remembered so the continuation can cancel it again.
    pub fn suspend_untied(&mut self, end_value: u64) {
        let delta = end_value.wrapping_sub(self.start_value);
        self.sum = self.sum.wrapping_add(delta);
        self.intermediate_sum = self.intermediate_sum.wrapping_add(delta);
    }

    /// Suspend a tied task: the interval waits in `intermediate_sum` until the
    /// matching exit.
    pub fn suspend_tied(&mut self, end_value: u64) {
        let delta = end_value.wrapping_sub(self.start_value);
        self.intermediate_sum = self.intermediate_sum.wrapping_add(delta);
    }

    /// State of the continuation copy of an untied task path.
    pub fn continuation(&self) -> DenseMetric {
        DenseMetric {
            sum: 0u64.wrapping_sub(self.intermediate_sum),
            ..*self
        }
    }
}

/// How a triggered value is folded into a sparse record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerScheme {
    /// Every value is an independent sample.
    AsIs,
    /// Provisional start value; a matching `EndValue` completes the sample.
    BeginValue,
    /// Completes a sample as `value - start`.
    EndValue,
}

/// One sample of a synchronous sparse metric. The metric's definition
/// decides which record list it lands in; the variant only says how the
/// caller measured it.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(u64),
    Double(f64),
}

impl MetricValue {
    pub fn as_u64(self) -> u64 {
        match self {
            MetricValue::Int(v) => v,
            MetricValue::Double(v) => v as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Int(v) => v as f64,
            MetricValue::Double(v) => v,
        }
    }
}

/// Value domain of a sparse record.
pub trait SparseValue: Copy + PartialOrd + PartialEq + Debug + Default {
    const MAX: Self;

    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn square(self) -> Self;
}

impl SparseValue for u64 {
    const MAX: Self = u64::MAX;

    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
    fn sub(self, other: Self) -> Self {
        self.wrapping_sub(other)
    }
    fn square(self) -> Self {
        self.wrapping_mul(self)
    }
}

impl SparseValue for f64 {
    const MAX: Self = f64::MAX;

    fn add(self, other: Self) -> Self {
        self + other
    }
    fn sub(self, other: Self) -> Self {
        self - other
    }
    fn square(self) -> Self {
        self * self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SparseRecord<V> {
    pub metric: MetricHandle,
    pub start_value_set: bool,
    pub start_value: V,
    pub count: u64,
    pub sum: V,
    pub min: V,
    pub max: V,
    pub squares: V,
}

impl<V: SparseValue> SparseRecord<V> {
    pub fn create(metric: MetricHandle, value: V, scheme: TriggerScheme) -> Result<Self, Error> {
        match scheme {
            TriggerScheme::BeginValue => Ok(Self {
                metric,
                start_value_set: true,
                start_value: value,
                count: 0,
                sum: V::default(),
                min: V::MAX,
                max: V::default(),
                squares: V::default(),
            }),
            TriggerScheme::EndValue => Err(Error::SparseEndWithoutBegin(metric)),
            TriggerScheme::AsIs => Ok(Self {
                metric,
                start_value_set: false,
                start_value: V::default(),
                count: 1,
                sum: value,
                min: value,
                max: value,
                squares: value.square(),
            }),
        }
    }

    pub fn update(&mut self, value: V, scheme: TriggerScheme) -> Result<(), Error> {
        let value = match scheme {
            TriggerScheme::BeginValue => {
                if self.start_value_set {
                    return Err(Error::SparseBeginTwice(self.metric));
                }
                self.start_value_set = true;
                self.start_value = value;
                return Ok(());
            }
            TriggerScheme::EndValue => {
                if !self.start_value_set {
                    return Err(Error::SparseEndWithoutBegin(self.metric));
                }
                if value < self.start_value {
                    return Err(Error::SparseNotMonotonic(self.metric));
                }
                self.start_value_set = false;
                value.sub(self.start_value)
            }
            TriggerScheme::AsIs => {
                if self.start_value_set || self.start_value != V::default() {
                    return Err(Error::SparseSchemeMixed(self.metric));
                }
                value
            }
        };
        self.count += 1;
        self.sum = self.sum.add(value);
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.squares = self.squares.add(value.square());
        Ok(())
    }

    pub fn merge(&mut self, other: &SparseRecord<V>) {
        self.count += other.count;
        self.sum = self.sum.add(other.sum);
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        self.squares = self.squares.add(other.squares);
    }
}
