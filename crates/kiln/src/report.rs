//! Human-readable rendering of build results

use std::{error::Error as _, fmt::Write as _};

use crate::{
    analyzer::Analysis,
    error::{BuildError, StageWarning},
    orchestrator::BuildOutput,
};

pub fn render_warnings(warnings: &[StageWarning]) -> String {
    let mut out = String::new();
    for warning in warnings {
        let _ = writeln!(out, "warning: {warning}");
    }
    if !warnings.is_empty() {
        let _ = writeln!(out, "{} warning(s)", warnings.len());
    }
    out
}

/// The failing stage, the error and its causes
pub fn render_error(error: &BuildError) -> String {
    let mut out = format!("error: [{}] {error}\n", error.stage());
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = writeln!(out, "  caused by: {cause}");
        source = cause.source();
    }
    out
}

/// Retained modules with kind, discovery reasons and origin
pub fn render_analysis(analysis: &Analysis) -> String {
    let width = analysis
        .modules
        .iter()
        .map(|module| module.name.len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for module in analysis.modules.iter() {
        let reasons = module
            .discovered_via
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let marker = if module.name == analysis.modules.entry { "*" } else { " " };
        let _ = write!(
            out,
            "{marker} {:width$}  {:9}  {reasons}  {}",
            module.name, module.kind.to_string(), module.origin
        );
        if let Some(reason) = &module.statically_opaque {
            let _ = write!(out, "  [opaque: {reason}]");
        }
        out.push('\n');
    }
    for name in &analysis.excluded {
        let _ = writeln!(out, "- {name}  (excluded)");
    }
    let _ = writeln!(
        out,
        "{} module(s) retained, {} excluded",
        analysis.modules.len(),
        analysis.excluded.len()
    );
    out
}

pub fn render_output(output: &BuildOutput) -> String {
    let summary = &output.summary;
    format!(
        "Built {}\n  launcher: {}\n  modules: {}  binaries: {}  data files: {}  hooks: {}  startup files: {}\n  archive sha256: {}\n",
        output.bundle_dir.display(),
        output.launcher.display(),
        summary.archived_modules,
        summary.binaries,
        summary.data_files,
        summary.hooks,
        summary.startup_files,
        summary.archive_digest
    )
}
