//! Script steps backed by the `esbuild` binary.
//!
//! Each step spawns one `esbuild` process per asset. Bundling reads the entry
//! from disk so relative imports resolve, the other steps pipe the current
//! text through stdin.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};

use crate::error::TransformError;
use crate::output::{Asset, AssetData};
use crate::transform::Transform;

const ESBUILD: &str = "esbuild";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Bundle { sourcemap: bool },
    Transpile,
    Minify,
}

/// A single `esbuild` invocation applied to every asset.
#[derive(Debug, Clone)]
pub struct Esbuild {
    program: String,
    mode: Mode,
    target: Option<String>,
}

impl Esbuild {
    fn with_mode(mode: Mode) -> Self {
        Self {
            program: ESBUILD.into(),
            mode,
            target: None,
        }
    }

    /// Resolve imports starting at each asset's entry file and emit a single
    /// self-contained script.
    pub fn bundle() -> Self {
        Self::with_mode(Mode::Bundle { sourcemap: false })
    }

    /// Like [`Esbuild::bundle`], with an inline source map.
    pub fn bundle_with_sourcemap() -> Self {
        Self::with_mode(Mode::Bundle { sourcemap: true })
    }

    /// Lower syntax to the given target, e.g. `es2015`.
    pub fn transpile(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::with_mode(Mode::Transpile)
        }
    }

    pub fn minify() -> Self {
        Self::with_mode(Mode::Minify)
    }

    /// Use a different executable.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, asset: &Asset) -> Vec<String> {
        let mut args = Vec::new();

        match self.mode {
            Mode::Bundle { sourcemap } => {
                args.push(asset.origin().to_string());
                args.push("--bundle".into());
                args.push("--format=iife".into());
                if sourcemap {
                    args.push("--sourcemap=inline".into());
                }
            }
            Mode::Transpile => {
                args.push("--loader=js".into());
                if let Some(target) = &self.target {
                    args.push(format!("--target={target}"));
                }
            }
            Mode::Minify => {
                args.push("--loader=js".into());
                args.push("--minify".into());
            }
        }

        args.push("--log-level=warning".into());
        args
    }

    fn run(&self, asset: &Asset) -> anyhow::Result<String> {
        let stdin = match self.mode {
            Mode::Bundle { .. } => None,
            _ => Some(asset.as_text().ok_or_else(|| anyhow!("not a text file"))?),
        };

        let mut child = Command::new(&self.program)
            .args(self.args(asset))
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("couldn't start '{}'", self.program))?;

        if let Some(text) = stdin
            && let Some(mut pipe) = child.stdin.take()
            && let Err(e) = pipe.write_all(text.as_bytes())
        {
            drop(pipe);
            // reap the child, it may still be running
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow::Error::new(e).context("couldn't write to esbuild"));
        } // drop closes the pipe

        let output = child
            .wait_with_output()
            .context("couldn't read esbuild output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("esbuild exited with {}:\n{}", output.status, stderr.trim_end()));
        }

        String::from_utf8(output.stdout).context("esbuild produced invalid UTF-8")
    }
}

impl Transform for Esbuild {
    fn name(&self) -> &'static str {
        match self.mode {
            Mode::Bundle { .. } => "bundle",
            Mode::Transpile => "transpile",
            Mode::Minify => "minify",
        }
    }

    fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        for asset in &mut assets {
            let text = self
                .run(asset)
                .map_err(|e| TransformError::new(self.name(), e).on(asset.origin()))?;

            asset.data = AssetData::Utf8(text);
        }

        Ok(assets)
    }
}
