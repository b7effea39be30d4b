use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use crate::build::ChangeSet;
use crate::config::{HotloadConfig, RetryPolicy};

use super::{read_with_retry, BuildState, CompileResult, CompiledModule, Compiler, Diagnostic};

/// Builds the game crate with cargo as a dynamic library.
///
/// Cargo tracks fingerprints itself, so an incremental build is a plain
/// rebuild; the distinction only shapes the recorded `BuildState`.
pub struct CargoCompiler {
    manifest: PathBuf,
    target_dir: PathBuf,
    release: bool,
    retry: RetryPolicy,
    generation: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    package: Option<PackageSection>,
    lib: Option<LibSection>,
}

#[derive(Debug, Deserialize)]
struct PackageSection {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LibSection {
    name: Option<String>,
    #[serde(rename = "crate-type", default)]
    crate_type: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
enum CargoMessage {
    CompilerMessage {
        message: RustcMessage,
    },
    CompilerArtifact {
        target: ArtifactTarget,
        filenames: Vec<PathBuf>,
    },
    BuildFinished {
        success: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RustcMessage {
    message: String,
    level: String,
    #[serde(default)]
    spans: Vec<RustcSpan>,
}

#[derive(Debug, Deserialize)]
struct RustcSpan {
    file_name: PathBuf,
    line_start: u32,
    is_primary: bool,
}

#[derive(Debug, Deserialize)]
struct ArtifactTarget {
    name: String,
    kind: Vec<String>,
}

impl CargoCompiler {
    pub fn new(manifest: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            target_dir: target_dir.into(),
            release: false,
            retry: RetryPolicy::default(),
            generation: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &HotloadConfig) -> Self {
        Self::new(config.descriptor_path(), config.target_dir_path())
            .with_release(config.release)
            .with_retry(config.retry.clone())
    }

    pub fn with_release(mut self, release: bool) -> Self {
        self.release = release;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn manifest_dir(&self) -> &Path {
        self.manifest.parent().unwrap_or_else(|| Path::new("."))
    }

    fn failure(&self, message: impl Into<String>) -> CompileResult {
        CompileResult::Failure(vec![Diagnostic::new(&self.manifest, 0, message)])
    }

    /// Library target name, as cargo names the artifact
    fn library_name(&self) -> Result<String, Diagnostic> {
        let bytes = read_with_retry(&self.manifest, &self.retry)
            .map_err(|e| Diagnostic::new(&self.manifest, 0, format!("cannot read project descriptor: {}", e)))?;
        let text = String::from_utf8_lossy(&bytes);
        let manifest: Manifest = toml::from_str(&text)
            .map_err(|e| Diagnostic::new(&self.manifest, 0, format!("invalid project descriptor: {}", e)))?;

        if let Some(lib) = &manifest.lib {
            if !lib.crate_type.is_empty() && !lib.crate_type.iter().any(|t| t == "dylib" || t == "cdylib") {
                log::warn!(
                    "{} declares crate-type {:?}; no loadable library will be produced",
                    self.manifest.display(),
                    lib.crate_type
                );
            }
        }

        manifest
            .lib
            .and_then(|lib| lib.name)
            .or_else(|| manifest.package.map(|pkg| pkg.name))
            .map(|name| name.replace('-', "_"))
            .ok_or_else(|| Diagnostic::new(&self.manifest, 0, "project descriptor names no package"))
    }

    fn rustflags(references: &[PathBuf]) -> OsString {
        let mut flags = std::env::var_os("RUSTFLAGS").unwrap_or_default();
        for reference in references {
            if !flags.is_empty() {
                flags.push(" ");
            }
            flags.push("-L dependency=");
            flags.push(reference.as_os_str());
        }
        flags
    }

    fn run(&self, sources: BTreeSet<PathBuf>, references: &[PathBuf]) -> CompileResult {
        let library = match self.library_name() {
            Ok(name) => name,
            Err(diagnostic) => return CompileResult::Failure(vec![diagnostic]),
        };

        log::info!("Building '{}' ({} sources)", library, sources.len());

        let mut command = Command::new("cargo");
        command
            .args(["build", "--lib", "--message-format=json"])
            .arg("--manifest-path")
            .arg(&self.manifest)
            .arg("--target-dir")
            .arg(&self.target_dir)
            .env("RUSTFLAGS", Self::rustflags(references));
        if self.release {
            command.arg("--release");
        }

        let output = match command.output() {
            Ok(output) => output,
            Err(e) => return self.failure(format!("failed to run cargo: {}", e)),
        };

        let mut diagnostics = Vec::new();
        let mut artifact = None;
        let mut finished_ok = output.status.success();

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Ok(message) = serde_json::from_str::<CargoMessage>(line) else {
                continue;
            };

            match message {
                CargoMessage::CompilerMessage { message } if message.level.starts_with("error") => {
                    diagnostics.push(self.diagnostic(message));
                }
                CargoMessage::CompilerArtifact { target, filenames } if target.name.replace('-', "_") == library => {
                    if target.kind.iter().any(|k| k == "dylib" || k == "cdylib") {
                        artifact = filenames
                            .into_iter()
                            .find(|f| f.extension().and_then(|e| e.to_str()) == Some(std::env::consts::DLL_EXTENSION));
                    }
                }
                CargoMessage::BuildFinished { success } => finished_ok &= success,
                _ => {}
            }
        }

        if !finished_ok {
            if diagnostics.is_empty() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
                let message = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
                return self.failure(message);
            }
            return CompileResult::Failure(diagnostics);
        }

        let Some(path) = artifact else {
            return self.failure(format!(
                "'{}' produced no dynamic library; declare crate-type = [\"cdylib\"]",
                library
            ));
        };

        let image = match read_with_retry(&path, &self.retry) {
            Ok(image) => image,
            Err(e) => return self.failure(format!("cannot read {}: {}", path.display(), e)),
        };
        let symbols = std::fs::read(path.with_extension("pdb")).ok();

        let state = BuildState {
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            sources,
            references: references.to_vec(),
        };

        log::info!("Built '{}' generation {} ({} bytes)", library, state.generation, image.len());

        CompileResult::Success(
            CompiledModule {
                name: library,
                image,
                symbols,
            },
            state,
        )
    }

    fn diagnostic(&self, message: RustcMessage) -> Diagnostic {
        let span = message
            .spans
            .iter()
            .find(|s| s.is_primary)
            .or_else(|| message.spans.first());

        match span {
            Some(span) => Diagnostic::new(self.manifest_dir().join(&span.file_name), span.line_start, message.message),
            None => Diagnostic::new(&self.manifest, 0, message.message),
        }
    }
}

impl Compiler for CargoCompiler {
    fn build(&self, sources: &[PathBuf], references: &[PathBuf]) -> CompileResult {
        self.run(sources.iter().cloned().collect(), references)
    }

    fn incremental_build(&self, previous: &BuildState, changes: &ChangeSet, references: &[PathBuf]) -> CompileResult {
        if previous.references != references {
            log::info!("References changed, rebuilding from scratch");
        }
        self.run(previous.apply(changes), references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn compiler_for(manifest: &str) -> (TempDir, CargoCompiler) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("Cargo.toml");
        fs::write(&path, manifest).unwrap();
        let compiler = CargoCompiler::new(&path, temp_dir.path().join("target"));
        (temp_dir, compiler)
    }

    #[test]
    fn test_library_name_from_package() {
        let (_dir, compiler) = compiler_for("[package]\nname = \"my-game\"\nversion = \"0.1.0\"\n");
        assert_eq!(compiler.library_name().unwrap(), "my_game");
    }

    #[test]
    fn test_library_name_prefers_lib_section() {
        let (_dir, compiler) = compiler_for(
            "[package]\nname = \"my-game\"\n\n[lib]\nname = \"gameplay\"\ncrate-type = [\"cdylib\"]\n",
        );
        assert_eq!(compiler.library_name().unwrap(), "gameplay");
    }

    #[test]
    fn test_invalid_descriptor_is_a_diagnostic() {
        let (_dir, compiler) = compiler_for("[package\n");
        let diagnostic = compiler.library_name().unwrap_err();
        assert_eq!(diagnostic.line, 0);
        assert!(diagnostic.message.contains("invalid project descriptor"));
    }

    #[test]
    fn test_parse_compiler_messages() {
        let error = r#"{"reason":"compiler-message","package_id":"game 0.1.0","message":{"message":"mismatched types","level":"error","spans":[{"file_name":"src/lib.rs","line_start":7,"is_primary":true}]}}"#;
        let artifact = r#"{"reason":"compiler-artifact","target":{"name":"game","kind":["cdylib"]},"filenames":["/tmp/target/debug/libgame.so"]}"#;
        let other = r#"{"reason":"build-script-executed","package_id":"x"}"#;

        assert!(matches!(
            serde_json::from_str::<CargoMessage>(error).unwrap(),
            CargoMessage::CompilerMessage { .. }
        ));
        assert!(matches!(
            serde_json::from_str::<CargoMessage>(artifact).unwrap(),
            CargoMessage::CompilerArtifact { .. }
        ));
        assert!(matches!(serde_json::from_str::<CargoMessage>(other).unwrap(), CargoMessage::Other));
    }

    #[test]
    fn test_diagnostic_uses_primary_span() {
        let (dir, compiler) = compiler_for("[package]\nname = \"game\"\n");
        let message = RustcMessage {
            message: "cannot find value `x`".to_string(),
            level: "error".to_string(),
            spans: vec![
                RustcSpan {
                    file_name: PathBuf::from("src/util.rs"),
                    line_start: 2,
                    is_primary: false,
                },
                RustcSpan {
                    file_name: PathBuf::from("src/lib.rs"),
                    line_start: 9,
                    is_primary: true,
                },
            ],
        };

        let diagnostic = compiler.diagnostic(message);
        assert_eq!(diagnostic.file, dir.path().join("src/lib.rs"));
        assert_eq!(diagnostic.line, 9);
    }

    #[test]
    fn test_rustflags_include_references() {
        let flags = CargoCompiler::rustflags(&[PathBuf::from("/deps/a"), PathBuf::from("/deps/b")]);
        let flags = flags.to_string_lossy();
        assert!(flags.contains("-L dependency=/deps/a"));
        assert!(flags.contains("-L dependency=/deps/b"));
    }
}
