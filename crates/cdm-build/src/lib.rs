//! External toolchain invocation for contract builds.
//!
//! The native compiler is an external process (`cargo pvm-contract build`)
//! invoked exactly once per unit per build. The registry address and every
//! already-resolved dependency address are passed as `--inject NAME=ADDR`
//! constants, so the produced artifact carries its cross-contract call
//! targets without post-build patching; nothing flows through process-wide
//! environment state.
//!
//! Two entry points share one pass/fail contract:
//! - [`Builder::build`] blocks until the toolchain exits
//! - [`Builder::build_streaming`] additionally parses the toolchain's JSON
//!   message stream and reports per-crate compile progress
//!
//! A successful build leaves a [`PackageDescriptor`] side file next to the
//! artifact recording exactly what the build was made against; later runs
//! use it to skip unchanged units.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::debug;

use cdm_store::compute_cid;
use cdm_types::error::BuildError;
use cdm_types::unit::{artifact_path, descriptor_path, ContractUnit, PackageDescriptor};
use cdm_types::{Address, REGISTRY_INJECT_NAME};

type Blake2b256 = Blake2b<U32>;

/// Compile progress reported while streaming toolchain output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProgress {
    /// Crates compiled so far in this invocation.
    pub compiled: usize,
    /// Total crates the toolchain planned, when it announced one.
    pub total: usize,
    /// Crate currently being compiled.
    pub current_crate: String,
}

/// Result of one successful toolchain invocation.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub crate_name: String,
    /// Produced binary artifact.
    pub artifact: PathBuf,
    /// Descriptor side file written for this build.
    pub descriptor: PackageDescriptor,
    pub duration: Duration,
    pub stdout: String,
}

/// Driver for the external contract build toolchain.
#[derive(Debug, Clone)]
pub struct Builder {
    root: PathBuf,
    program: String,
}

impl Builder {
    /// Builder for a workspace root, using the standard `cargo` driver.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            program: "cargo".to_string(),
        }
    }

    /// Substitute the toolchain program (tests use a stub script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn args(&self, unit: &ContractUnit, registry: Address, deps: &BTreeMap<String, Address>) -> Vec<String> {
        let manifest = self.root.join("Cargo.toml");
        let mut args = vec![
            "pvm-contract".to_string(),
            "build".to_string(),
            "--manifest-path".to_string(),
            manifest.display().to_string(),
            "-p".to_string(),
            unit.name.clone(),
            "--inject".to_string(),
            format!("{REGISTRY_INJECT_NAME}={registry}"),
        ];
        for (name, addr) in deps {
            args.push("--inject".to_string());
            // injected constant names are identifiers: crate-name dashes
            // become underscores, matching the generated reference modules
            args.push(format!("{}={}", name.replace('-', "_"), addr));
        }
        args
    }

    /// Build one unit, blocking until the toolchain exits.
    ///
    /// Exactly one toolchain invocation per call. Non-zero exit is a
    /// [`BuildError::Failed`] carrying the captured diagnostic output; the
    /// caller decides what that failure halts.
    pub fn build(
        &self,
        unit: &ContractUnit,
        registry: Address,
        deps: &BTreeMap<String, Address>,
        target_hash: &str,
    ) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let args = self.args(unit, registry, deps);
        debug!(crate_name = %unit.name, program = %self.program, "invoking build toolchain");

        let output = std::process::Command::new(&self.program)
            .args(&args)
            .current_dir(&self.root)
            .output()
            .map_err(|source| BuildError::Spawn {
                toolchain: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(BuildError::Failed {
                crate_name: unit.name.clone(),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        self.finish(unit, registry, deps, target_hash, stdout, started.elapsed())
    }

    /// Build one unit, streaming toolchain progress through `on_progress`.
    ///
    /// Same pass/fail contract as [`Builder::build`]; the callback only
    /// adds observability. Rendered compiler diagnostics from the JSON
    /// stream are folded into the captured stderr on failure.
    pub async fn build_streaming(
        &self,
        unit: &ContractUnit,
        registry: Address,
        deps: &BTreeMap<String, Address>,
        target_hash: &str,
        on_progress: impl Fn(BuildProgress),
    ) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let mut args = self.args(unit, registry, deps);
        args.push("--message-format".to_string());
        args.push("json".to_string());
        debug!(crate_name = %unit.name, program = %self.program, "invoking build toolchain (streaming)");

        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BuildError::Spawn {
                toolchain: self.program.clone(),
                source,
            })?;

        let io_err = |source| BuildError::Io {
            crate_name: unit.name.clone(),
            source,
        };

        let child_stdout = child.stdout.take().expect("stdout piped");
        let mut child_stderr = child.stderr.take().expect("stderr piped");
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = child_stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut stdout = String::new();
        let mut diagnostics = String::new();
        let mut compiled = 0usize;
        let mut total = 0usize;
        let mut lines = BufReader::new(child_stdout).lines();
        while let Some(line) = lines.next_line().await.map_err(io_err)? {
            stdout.push_str(&line);
            stdout.push('\n');
            let Ok(msg) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                continue;
            };
            match msg.get("reason").and_then(|r| r.as_str()) {
                // announced by the toolchain before compilation starts
                Some("build-plan") => {
                    total = msg.get("total").and_then(|t| t.as_u64()).unwrap_or(0) as usize;
                }
                Some("compiler-artifact") => {
                    compiled += 1;
                    let current = msg
                        .get("target")
                        .and_then(|t| t.get("name"))
                        .and_then(|n| n.as_str())
                        .unwrap_or("unknown");
                    on_progress(BuildProgress {
                        compiled,
                        total,
                        current_crate: current.to_string(),
                    });
                }
                Some("compiler-message") => {
                    if let Some(rendered) = msg
                        .get("message")
                        .and_then(|m| m.get("rendered"))
                        .and_then(|r| r.as_str())
                    {
                        diagnostics.push_str(rendered);
                    }
                }
                _ => {}
            }
        }

        let status = child.wait().await.map_err(io_err)?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let full_stderr = if diagnostics.is_empty() {
                stderr
            } else {
                format!("{diagnostics}{stderr}")
            };
            return Err(BuildError::Failed {
                crate_name: unit.name.clone(),
                code: status.code(),
                stdout,
                stderr: full_stderr,
            });
        }

        self.finish(unit, registry, deps, target_hash, stdout, started.elapsed())
    }

    /// Verify the artifact and record the descriptor side file.
    fn finish(
        &self,
        unit: &ContractUnit,
        registry: Address,
        deps: &BTreeMap<String, Address>,
        target_hash: &str,
        stdout: String,
        duration: Duration,
    ) -> Result<BuildOutput, BuildError> {
        let artifact = artifact_path(&self.root, &unit.name);
        let bytes = std::fs::read(&artifact).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BuildError::MissingArtifact {
                    crate_name: unit.name.clone(),
                    path: artifact.clone(),
                }
            } else {
                BuildError::Io {
                    crate_name: unit.name.clone(),
                    source: e,
                }
            }
        })?;

        let mut dependency_addresses = deps.clone();
        dependency_addresses.insert(REGISTRY_INJECT_NAME.to_string(), registry);
        let descriptor = PackageDescriptor {
            package: unit.package.clone(),
            target_hash: target_hash.to_string(),
            source_hash: source_hash(&unit.dir).map_err(|source| BuildError::Io {
                crate_name: unit.name.clone(),
                source,
            })?,
            dependency_addresses,
            artifact_cid: compute_cid(&bytes),
            address: None,
            version: None,
        };
        descriptor
            .save(&descriptor_path(&self.root, &unit.name))
            .map_err(|source| BuildError::Io {
                crate_name: unit.name.clone(),
                source,
            })?;

        debug!(crate_name = %unit.name, artifact = %artifact.display(), "build finished");
        Ok(BuildOutput {
            crate_name: unit.name.clone(),
            artifact,
            descriptor,
            duration,
            stdout,
        })
    }
}

/// Deterministic hash over a unit's on-disk sources.
///
/// Walks the unit directory, hashing sorted relative paths together with
/// file contents; any edit to any file under the unit changes the hash.
/// This is the "unchanged since last build" signal for idempotent re-runs.
pub fn source_hash(dir: &Path) -> std::io::Result<String> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut hasher = Blake2b256::new();
    for rel in files {
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(dir.join(&rel))?);
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        // build output is derived state, not source
        if name == "target" {
            continue;
        }
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn unit(dir: &Path, name: &str, deps: &[&str]) -> ContractUnit {
        ContractUnit {
            name: name.to_string(),
            package: Some(format!("@example/{name}")),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            dir: dir.to_path_buf(),
            manifest_path: dir.join("Cargo.toml"),
            description: None,
            authors: vec![],
            homepage: None,
            repository: None,
            readme_path: None,
            descriptor: None,
        }
    }

    fn write_unit_sources(dir: &Path) {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("Cargo.toml"), "[package]\nname = \"counter\"\n").unwrap();
        fs::write(dir.join("src/lib.rs"), "#![no_std]\n").unwrap();
    }

    /// Stub toolchain: records its argv, emits a few JSON progress lines
    /// and fabricates the artifact the way the real driver would.
    #[cfg(unix)]
    fn write_stub(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }

    #[cfg(unix)]
    const OK_STUB: &str = r#"
root=""
name=""
prev=""
for arg in "$@"; do
  case "$prev" in
    --manifest-path) root=$(dirname "$arg");;
    -p) name="$arg";;
  esac
  prev="$arg"
done
printf '%s\n' "$@" > "$root/target/stub-args.txt" 2>/dev/null || { mkdir -p "$root/target"; printf '%s\n' "$@" > "$root/target/stub-args.txt"; }
echo '{"reason":"build-plan","total":2}'
echo '{"reason":"compiler-artifact","target":{"name":"pvm-runtime"}}'
echo "{\"reason\":\"compiler-artifact\",\"target\":{\"name\":\"$name\"}}"
printf 'pvm blob for %s' "$name" > "$root/target/$name.release.polkavm"
echo '[]' > "$root/target/$name.release.abi.json"
"#;

    #[cfg(unix)]
    #[test]
    fn build_invokes_toolchain_and_writes_descriptor() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("target")).unwrap();
        let unit_dir = root.join("contracts/counter");
        write_unit_sources(&unit_dir);
        let stub = root.join("toolchain.sh");
        write_stub(&stub, OK_STUB);

        let builder = Builder::new(root).with_program(stub.display().to_string());
        let registry = Address::parse("0x21fa63bfac2a77b1a6de8bd9a0c2c172a48bb5e3").unwrap();
        let out = builder
            .build(&unit(&unit_dir, "counter", &[]), registry, &BTreeMap::new(), "d2030e673464dda4")
            .unwrap();

        assert!(out.artifact.exists());
        assert_eq!(out.descriptor.target_hash, "d2030e673464dda4");
        assert_eq!(
            out.descriptor.dependency_addresses.get(REGISTRY_INJECT_NAME),
            Some(&registry)
        );
        // descriptor side file is on disk for the next detection pass
        let loaded = PackageDescriptor::load(&descriptor_path(root, "counter")).unwrap();
        assert_eq!(loaded, out.descriptor);

        // registry address went through argv, not the environment
        let argv = fs::read_to_string(root.join("target/stub-args.txt")).unwrap();
        assert!(argv.contains(&format!("contracts_registry={registry}")));
        assert!(argv.contains("pvm-contract"));
    }

    #[cfg(unix)]
    #[test]
    fn dependency_addresses_are_injected_with_identifier_names() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("target")).unwrap();
        let unit_dir = root.join("contracts/counter-writer");
        write_unit_sources(&unit_dir);
        let stub = root.join("toolchain.sh");
        write_stub(&stub, OK_STUB);

        let dep_addr = Address::parse("0x2c6fc00458f198f46ef072e1516b83cd56db7cf5").unwrap();
        let mut deps = BTreeMap::new();
        deps.insert("counter-v2".to_string(), dep_addr);

        let builder = Builder::new(root).with_program(stub.display().to_string());
        builder
            .build(
                &unit(&unit_dir, "counter-writer", &["counter-v2"]),
                Address::ZERO,
                &deps,
                "th",
            )
            .unwrap();

        let argv = fs::read_to_string(root.join("target/stub-args.txt")).unwrap();
        assert!(argv.contains(&format!("counter_v2={dep_addr}")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_build_reports_progress() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("target")).unwrap();
        let unit_dir = root.join("contracts/counter");
        write_unit_sources(&unit_dir);
        let stub = root.join("toolchain.sh");
        write_stub(&stub, OK_STUB);

        let progress = std::sync::Mutex::new(Vec::new());
        let builder = Builder::new(root).with_program(stub.display().to_string());
        builder
            .build_streaming(
                &unit(&unit_dir, "counter", &[]),
                Address::ZERO,
                &BTreeMap::new(),
                "th",
                |p| progress.lock().unwrap().push(p),
            )
            .await
            .unwrap();

        let progress = progress.into_inner().unwrap();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].compiled, 1);
        assert_eq!(progress[0].total, 2);
        assert_eq!(progress[1].current_crate, "counter");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_build_captures_diagnostics() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let unit_dir = root.join("contracts/counter");
        write_unit_sources(&unit_dir);
        let stub = root.join("toolchain.sh");
        write_stub(
            &stub,
            r#"
echo '{"reason":"compiler-message","message":{"rendered":"error[E0425]: cannot find value"}}'
echo 'build wrapper failed' >&2
exit 101
"#,
        );

        let builder = Builder::new(root).with_program(stub.display().to_string());
        let err = builder
            .build_streaming(
                &unit(&unit_dir, "counter", &[]),
                Address::ZERO,
                &BTreeMap::new(),
                "th",
                |_| {},
            )
            .await
            .unwrap_err();

        match err {
            BuildError::Failed { crate_name, code, stderr, .. } => {
                assert_eq!(crate_name, "counter");
                assert_eq!(code, Some(101));
                assert!(stderr.contains("E0425"));
                assert!(stderr.contains("build wrapper failed"));
            }
            other => panic!("expected Failed, got {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn success_without_artifact_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let unit_dir = root.join("contracts/counter");
        write_unit_sources(&unit_dir);
        let stub = root.join("toolchain.sh");
        write_stub(&stub, "exit 0\n");

        let builder = Builder::new(root).with_program(stub.display().to_string());
        let err = builder
            .build(&unit(&unit_dir, "counter", &[]), Address::ZERO, &BTreeMap::new(), "th")
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingArtifact { .. }));
    }

    #[test]
    fn missing_toolchain_is_a_spawn_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let unit_dir = tmp.path().join("contracts/counter");
        write_unit_sources(&unit_dir);
        let builder = Builder::new(tmp.path()).with_program("/nonexistent/toolchain");
        let err = builder
            .build(&unit(&unit_dir, "counter", &[]), Address::ZERO, &BTreeMap::new(), "th")
            .unwrap_err();
        assert!(matches!(err, BuildError::Spawn { .. }));
    }

    #[test]
    fn source_hash_tracks_edits() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("counter");
        write_unit_sources(&dir);

        let before = source_hash(&dir).unwrap();
        assert_eq!(before, source_hash(&dir).unwrap());

        fs::write(dir.join("src/lib.rs"), "#![no_std]\n// changed\n").unwrap();
        assert_ne!(before, source_hash(&dir).unwrap());
    }

    #[test]
    fn source_hash_sees_new_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("counter");
        write_unit_sources(&dir);
        let before = source_hash(&dir).unwrap();
        fs::write(dir.join("src/extra.rs"), "pub fn extra() {}\n").unwrap();
        assert_ne!(before, source_hash(&dir).unwrap());
    }
}
