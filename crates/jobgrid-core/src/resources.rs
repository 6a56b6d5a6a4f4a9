//! Typed resource quantities and their conversion from human strings.
//!
//! Users write capacities and requirements as strings (`"500m"` CPU,
//! `"2Gi"` memory). [`convert`] normalizes them into a
//! [`ResourceUsageData`]: lower-case, strip whitespace, then read the
//! binary suffixes `Ki/Mi/Gi` as `kb/mb/gb`. Byte units are powers of
//! 1024. Conversion is all-or-nothing.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while converting resource strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("invalid resource quantity for {field}: {value:?}")]
    InvalidResourceQuantity { field: &'static str, value: String },
}

pub type ResourceResult<T> = Result<T, ResourceError>;

/// User-facing resource quantities, as written in config and job files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsageConfig {
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    #[serde(default = "zero_quantity")]
    pub gpu: String,
}

fn zero_quantity() -> String {
    "0".to_string()
}

impl Default for ResourceUsageConfig {
    fn default() -> Self {
        Self {
            cpu: zero_quantity(),
            memory: zero_quantity(),
            disk: zero_quantity(),
            gpu: zero_quantity(),
        }
    }
}

impl ResourceUsageConfig {
    pub fn new(cpu: &str, memory: &str, disk: &str) -> Self {
        Self {
            cpu: cpu.to_string(),
            memory: memory.to_string(),
            disk: disk.to_string(),
            gpu: zero_quantity(),
        }
    }

    pub fn with_gpu(mut self, gpu: &str) -> Self {
        self.gpu = gpu.to_string();
        self
    }
}

/// Canonical numeric resource quantities.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsageData {
    /// Fractional cores.
    pub cpu: f64,
    /// Bytes.
    pub memory: u64,
    /// Bytes.
    pub disk: u64,
    /// Device count.
    pub gpu: u64,
}

impl ResourceUsageData {
    pub fn is_zero(&self) -> bool {
        self.cpu == 0.0 && self.memory == 0 && self.disk == 0 && self.gpu == 0
    }

    pub fn add(&self, other: &ResourceUsageData) -> ResourceUsageData {
        ResourceUsageData {
            cpu: self.cpu + other.cpu,
            memory: self.memory.saturating_add(other.memory),
            disk: self.disk.saturating_add(other.disk),
            gpu: self.gpu.saturating_add(other.gpu),
        }
    }

    /// Per-dimension subtraction, floored at zero.
    pub fn saturating_sub(&self, other: &ResourceUsageData) -> ResourceUsageData {
        ResourceUsageData {
            cpu: (self.cpu - other.cpu).max(0.0),
            memory: self.memory.saturating_sub(other.memory),
            disk: self.disk.saturating_sub(other.disk),
            gpu: self.gpu.saturating_sub(other.gpu),
        }
    }
}

impl fmt::Display for ResourceUsageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} memory={} disk={} gpu={}",
            self.cpu, self.memory, self.disk, self.gpu
        )
    }
}

/// Every dimension of `required` must fit within `available`.
pub fn fits(required: &ResourceUsageData, available: &ResourceUsageData) -> bool {
    required.cpu <= available.cpu
        && required.memory <= available.memory
        && required.disk <= available.disk
        && required.gpu <= available.gpu
}

/// Convert user-supplied quantities into canonical numbers.
///
/// Fails on the first field that does not parse; no field is ever
/// defaulted to zero.
pub fn convert(config: &ResourceUsageConfig) -> ResourceResult<ResourceUsageData> {
    let cpu = parse_cpu(&config.cpu).ok_or_else(|| invalid("cpu", &config.cpu))?;
    let memory = parse_bytes(&config.memory).ok_or_else(|| invalid("memory", &config.memory))?;
    let disk = parse_bytes(&config.disk).ok_or_else(|| invalid("disk", &config.disk))?;
    let gpu = parse_count(&config.gpu).ok_or_else(|| invalid("gpu", &config.gpu))?;

    Ok(ResourceUsageData {
        cpu,
        memory,
        disk,
        gpu,
    })
}

fn invalid(field: &'static str, value: &str) -> ResourceError {
    ResourceError::InvalidResourceQuantity {
        field,
        value: value.to_string(),
    }
}

/// Lower-case, drop whitespace, and read `i` in binary suffixes as `b`.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .map(|c| if c == 'i' { 'b' } else { c })
        .collect()
}

/// Split `"1.5gb"` into `("1.5", "gb")`.
fn split_number(s: &str) -> (&str, &str) {
    let idx = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    s.split_at(idx)
}

fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    let value = s.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Parse a CPU quantity: `"2"`, `"0.5"` or millicores like `"500m"`.
fn parse_cpu(s: &str) -> Option<f64> {
    let normalized = normalize(s);
    let (number, suffix) = split_number(&normalized);
    let value = parse_number(number)?;
    match suffix {
        "" => Some(value),
        "m" => Some(value / 1000.0),
        _ => None,
    }
}

/// Parse a byte quantity: `"512"`, `"10kb"`, `"1Gi"`, `"1.5 GB"`.
fn parse_bytes(s: &str) -> Option<u64> {
    let normalized = normalize(s);
    let (number, suffix) = split_number(&normalized);
    let value = parse_number(number)?;
    let multiplier: u64 = match suffix {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        "t" | "tb" => 1 << 40,
        "p" | "pb" => 1 << 50,
        _ => return None,
    };
    let bytes = (value * multiplier as f64).round();
    (bytes < u64::MAX as f64).then_some(bytes as u64)
}

/// Parse a plain device count.
fn parse_count(s: &str) -> Option<u64> {
    normalize(s).parse::<u64>().ok()
}
