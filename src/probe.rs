//! Locating and version-probing the external tools the modules drive.
//!
//! A failed probe never aborts the process; it downgrades the owning module
//! to incapable, and the failure is only surfaced as a warning if the
//! operator later requests that capability.

use std::ffi::OsStr;
use std::path::PathBuf;

use crate::error::{LocalnetError, Result};
use crate::runner::CommandRunner;

/// A located external tool and the version text it reported.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub path: PathBuf,
    pub version: String,
}

/// Search `$PATH` for an executable.
pub fn locate(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    locate_in(binary, &path)
}

fn locate_in(binary: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Locate `binary` and check that it runs by asking for its version.
///
/// The returned version is the tool's combined output, trimmed; a tool that
/// produces no output at all fails the probe.
pub async fn probe(
    runner: &dyn CommandRunner,
    binary: &'static str,
    version_arg: &str,
) -> Result<ToolInfo> {
    let Some(path) = locate(binary) else {
        return Err(LocalnetError::ToolMissing(binary));
    };

    let path_arg = path.to_string_lossy().into_owned();
    let version = runner.output(&[&path_arg, version_arg]).await?.trim().to_string();
    if version.is_empty() {
        return Err(LocalnetError::VersionProbe(binary));
    }

    Ok(ToolInfo { path, version })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_finds_a_file_on_the_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("faketool");
        std::fs::write(&tool, "").unwrap();

        let search = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(locate_in("faketool", &search), Some(tool));
        assert_eq!(locate_in("missingtool", &search), None);
    }

    #[tokio::test]
    async fn probe_fails_for_a_missing_tool() {
        let runner = crate::runner::testing::RecordingRunner::new();
        let err = probe(&runner, "definitely-not-installed-tool", "--version")
            .await
            .unwrap_err();
        assert!(matches!(err, LocalnetError::ToolMissing(_)));
        // the runner is never invoked for a tool that is not on $PATH
        assert!(runner.calls().is_empty());
    }
}
