#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod generation;
pub mod lead;
pub mod ledger;
pub mod logging;
pub mod payment;
pub mod pipeline;
pub mod plan;
pub mod project;
pub mod render;

pub use error::{Error, Result};
