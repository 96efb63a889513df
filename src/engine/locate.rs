//! Engine binary discovery
//!
//! Resolves the llama.cpp executable (and its server sibling) by probing an
//! explicit override, environment variables, then well-known install paths.
//! Nothing is cached: the environment or install may change between calls.

use crate::storage::expand_tilde;
use std::path::{Path, PathBuf};

/// Environment variables naming the CLI binary, checked in order.
pub const BINARY_ENV_KEYS: [&str; 2] = ["LLAMA_BIN", "LLAMA_CPP_BIN"];

/// Environment variables naming the server binary, checked in order.
pub const SERVER_ENV_KEYS: [&str; 1] = ["LLAMA_SERVER_BIN"];

const BINARY_CANDIDATES: [&str; 6] = [
    "/opt/homebrew/bin/llama-cli",
    "/usr/local/bin/llama-cli",
    "/opt/homebrew/bin/llama",
    "/usr/local/bin/llama",
    "/opt/homebrew/bin/main",
    "/usr/local/bin/main",
];

const SERVER_CANDIDATES: [&str; 2] = [
    "/opt/homebrew/bin/llama-server",
    "/usr/local/bin/llama-server",
];

/// Short instruction shown to the user when no binary can be found.
pub fn install_hint() -> &'static str {
    "Install llama.cpp (e.g. `brew install llama.cpp`), set LLAMA_BIN, or configure the binary path in settings."
}

/// Resolve the CLI binary.
///
/// Precedence: executable explicit override, then `LLAMA_BIN` /
/// `LLAMA_CPP_BIN`, then well-known install paths. A non-executable
/// override is ignored rather than reported.
pub fn resolve_binary(override_path: Option<&str>) -> Option<PathBuf> {
    resolve_binary_with(override_path, &|key| std::env::var(key).ok())
}

/// `resolve_binary` with an injectable environment lookup, for tests.
pub fn resolve_binary_with(
    override_path: Option<&str>,
    env: &impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    if let Some(found) = check_override(override_path) {
        return Some(found);
    }
    locate(env, &BINARY_ENV_KEYS, &BINARY_CANDIDATES)
}

/// Resolve the server binary.
///
/// Prefers an executable sibling of the resolved CLI binary whose file name
/// swaps the `cli` role for `server`, then falls back to the same
/// environment/candidate probing with server-specific names.
pub fn resolve_server_binary(override_path: Option<&str>) -> Option<PathBuf> {
    resolve_server_binary_with(override_path, &|key| std::env::var(key).ok())
}

/// `resolve_server_binary` with an injectable environment lookup.
pub fn resolve_server_binary_with(
    override_path: Option<&str>,
    env: &impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    if let Some(cli) = resolve_binary_with(override_path, env) {
        if let Some(sibling) = server_sibling(&cli) {
            return Some(sibling);
        }
    }
    locate(env, &SERVER_ENV_KEYS, &SERVER_CANDIDATES)
}

fn server_sibling(cli: &Path) -> Option<PathBuf> {
    let name = cli.file_name()?.to_str()?;
    if !name.contains("cli") {
        return None;
    }
    let sibling = cli.with_file_name(name.replace("cli", "server"));
    is_executable(&sibling).then_some(sibling)
}

fn check_override(override_path: Option<&str>) -> Option<PathBuf> {
    let trimmed = override_path?.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = expand_tilde(trimmed);
    is_executable(&path).then_some(path)
}

fn locate(
    env: &impl Fn(&str) -> Option<String>,
    env_keys: &[&str],
    candidates: &[&str],
) -> Option<PathBuf> {
    for key in env_keys {
        if let Some(value) = env(key) {
            let path = expand_tilde(value.trim());
            if is_executable(&path) {
                return Some(path);
            }
        }
    }
    candidates
        .iter()
        .map(|candidate| PathBuf::from(*candidate))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
