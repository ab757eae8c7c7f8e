//! Front end of the emulated JIT compiler.
//!
//! The host runtime does not translate kernel code. "Compiling" checks that
//! every `#include` resolves and that the requested entry point is declared
//! as `extern "C" __global__ void <name>(...)`.

use crate::error::{GpuError, Result};
use crate::runtime::IncludeFile;
use std::path::{Path, PathBuf};

const GLOBAL_DECL: &str = "__global__ void ";

/// All kernel entry points declared in `source`, in declaration order.
pub(crate) fn entry_points(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find(GLOBAL_DECL) {
        rest = &rest[pos + GLOBAL_DECL.len()..];
        let name: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Header names referenced by `#include` directives.
pub(crate) fn includes(source: &str) -> Vec<&str> {
    source
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("#include"))
        .filter_map(|rest| {
            let rest = rest.trim();
            let (open, close) = match rest.chars().next()? {
                '<' => ('<', '>'),
                '"' => ('"', '"'),
                _ => return None,
            };
            let inner = rest.strip_prefix(open)?;
            inner.find(close).map(|end| &inner[..end])
        })
        .collect()
}

/// Include directories passed as `-I<dir>` options.
pub(crate) fn include_dirs(options: &[String]) -> Vec<PathBuf> {
    options
        .iter()
        .filter_map(|opt| opt.strip_prefix("-I"))
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Check that the source is compilable and exports `entry`.
pub(crate) fn compile(
    source: &str,
    source_name: &str,
    entry: &str,
    search_dirs: &[PathBuf],
    manifest: &[IncludeFile<'_>],
) -> Result<()> {
    for header in includes(source) {
        let in_manifest = manifest.iter().any(|inc| inc.name == header);
        let on_disk = || search_dirs.iter().any(|dir| dir.join(header).is_file());
        if !in_manifest && !on_disk() {
            return Err(GpuError::Compilation(format!(
                "{source_name}: cannot open include file '{header}'"
            )));
        }
    }

    if entry_points(source).iter().any(|name| name == entry) {
        Ok(())
    } else {
        Err(GpuError::KernelNotFound(format!("{entry} in {source_name}")))
    }
}

/// Directory of a source file, used as an implicit include directory.
pub(crate) fn source_dir(path: &Path) -> Option<PathBuf> {
    path.parent().map(Path::to_path_buf)
}
