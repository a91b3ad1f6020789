#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for strand
//!
//! This crate provides the plain data types shared by the configuration,
//! concurrency and propagation crates.

pub mod pool;

// Re-export commonly used types
pub use pool::{ThreadPoolKey, ThreadPoolSizing};

use serde::{Deserialize, Serialize};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

// Implement clap::ValueEnum for LogFormat
impl clap::ValueEnum for LogFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Plain, Self::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Plain => clap::builder::PossibleValue::new("plain"),
            Self::Json => clap::builder::PossibleValue::new("json"),
        })
    }
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Plain
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
        }
    }
}
