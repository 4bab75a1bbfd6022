//! Launcher script templates

use std::{fmt::Write as _, path::PathBuf};

use cow_utils::CowUtils;

use super::config::{LaunchConfig, bundled_interpreter, slash_path};
use crate::assembler::{GeneratedFile, INTERNAL_DIR};

/// Script flavour of the launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherKind {
    /// `/bin/sh` script named after the bundle
    Posix,
    /// `<name>.cmd` batch file
    WindowsCmd,
}

impl LauncherKind {
    pub const fn host() -> Self {
        if cfg!(windows) { Self::WindowsCmd } else { Self::Posix }
    }

    pub fn file_name(self, name: &str) -> String {
        match self {
            Self::Posix => name.to_owned(),
            Self::WindowsCmd => format!("{name}.cmd"),
        }
    }

    /// Where an interpreter on this platform looks for its standard library,
    /// relative to the directory above its executable
    pub fn stdlib_dir(self, python_minor: u8) -> String {
        match self {
            Self::Posix => format!("lib/python3.{python_minor}"),
            Self::WindowsCmd => "Lib".to_owned(),
        }
    }
}

pub fn render_launcher(config: &LaunchConfig, kind: LauncherKind) -> GeneratedFile {
    let contents = match kind {
        LauncherKind::Posix => render_posix(config),
        LauncherKind::WindowsCmd => render_cmd(config),
    };
    GeneratedFile {
        path: PathBuf::from(kind.file_name(&config.name)),
        contents: contents.into_bytes(),
        executable: kind == LauncherKind::Posix,
    }
}

fn render_posix(config: &LaunchConfig) -> String {
    let interpreter = bundled_interpreter(config).map_or_else(
        || "python3".to_owned(),
        |path| format!("\"$here/{}\"", slash_path(&path)),
    );
    let bin = format!("$here/{INTERNAL_DIR}/{}", config.bin_dir);

    let mut script = String::new();
    script.push_str("#!/bin/sh\n");
    let _ = writeln!(script, "# {} launcher, generated by kiln", config.name);
    script.push_str("here=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\n");
    let _ = writeln!(
        script,
        "LD_LIBRARY_PATH=\"{bin}${{LD_LIBRARY_PATH:+:$LD_LIBRARY_PATH}}\""
    );
    let _ = writeln!(
        script,
        "DYLD_LIBRARY_PATH=\"{bin}${{DYLD_LIBRARY_PATH:+:$DYLD_LIBRARY_PATH}}\""
    );
    script.push_str("export LD_LIBRARY_PATH DYLD_LIBRARY_PATH\n");
    let _ = writeln!(
        script,
        "exec {interpreter} -I -S \"$here/{INTERNAL_DIR}/bootstrap.py\" \"$@\""
    );
    script
}

fn render_cmd(config: &LaunchConfig) -> String {
    let interpreter = bundled_interpreter(config).map_or_else(
        || {
            if config.console {
                "python".to_owned()
            } else {
                "pythonw".to_owned()
            }
        },
        |path| format!("\"%HERE%{}\"", slash_path(&path).cow_replace('/', "\\")),
    );

    let mut script = String::new();
    script.push_str("@echo off\r\n");
    let _ = write!(script, "rem {} launcher, generated by kiln\r\n", config.name);
    script.push_str("setlocal\r\n");
    script.push_str("set \"HERE=%~dp0\"\r\n");
    let _ = write!(
        script,
        "set \"PATH=%HERE%{INTERNAL_DIR}\\{};%PATH%\"\r\n",
        config.bin_dir
    );
    let _ = write!(
        script,
        "{interpreter} -I -S \"%HERE%{INTERNAL_DIR}\\bootstrap.py\" %*\r\n"
    );
    script.push_str("exit /b %ERRORLEVEL%\r\n");
    script
}
