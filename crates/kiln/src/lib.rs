//! kiln: bundles a Python application into a standalone directory
//!
//! The pipeline runs strictly forward:
//! [`manifest`] -> [`analyzer`] -> [`native`] -> [`assembler`] -> [`launcher`],
//! driven by [`orchestrator::Pipeline`].

pub mod analyzer;
pub mod assembler;
pub mod config;
pub mod dirs;
pub mod error;
pub mod exclusion;
pub mod launcher;
pub mod manifest;
pub mod module_graph;
pub mod native;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod stdlib_detection;
pub mod types;
pub mod visitors;
