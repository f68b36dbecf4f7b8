#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod archive;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod paths;
pub mod provision;
pub mod util;
pub mod workflow;
