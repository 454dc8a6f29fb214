//! Shared fixtures for integration tests.

use std::fs;
use std::path::{Path, PathBuf};

/// Stub toolchain driver standing in for `cargo pvm-contract build`.
///
/// Mirrors the real driver's observable behavior: reads the workspace root
/// from `--manifest-path` and the crate from `-p`, emits the JSON message
/// stream, and drops the artifact and ABI under `target/`. The artifact is
/// the contract's source bytes, so artifacts track source edits. A `.fail`
/// marker in a contract directory forces a non-zero exit.
const STUB_TOOLCHAIN: &str = r#"#!/bin/sh
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
mkdir -p "$root/target"
if [ -f "$root/contracts/$name/.fail" ]; then
  echo "error: forced failure for $name" >&2
  exit 1
fi
echo '{"reason":"build-plan","total":1}'
echo "{\"reason\":\"compiler-artifact\",\"target\":{\"name\":\"$name\"}}"
cat "$root/contracts/$name/src/lib.rs" > "$root/target/$name.release.polkavm"
printf '[{"type":"function","name":"get_count","inputs":[]}]' > "$root/target/$name.release.abi.json"
exit 0
"#;

#[cfg(unix)]
pub fn write_stub_toolchain(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("stub-toolchain.sh");
    fs::write(&path, STUB_TOOLCHAIN).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// Force the stub toolchain to fail for one contract.
#[allow(dead_code)]
pub fn mark_failing(root: &Path, name: &str) {
    fs::write(root.join("contracts").join(name).join(".fail"), b"").unwrap();
}

/// Append a line to a contract's source, changing its source hash.
#[allow(dead_code)]
pub fn edit_contract_source(root: &Path, name: &str) {
    let path = root.join("contracts").join(name).join("src/lib.rs");
    let mut source = fs::read_to_string(&path).unwrap();
    source.push_str("\n// tweaked\n");
    fs::write(&path, source).unwrap();
}
