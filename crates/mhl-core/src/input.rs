use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use encoding_rs::{Encoding, WINDOWS_1252};

/// Manifest content handed to the pipeline, already decoded.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    /// File stem, used in report group headers
    pub name: String,
    pub path: Option<PathBuf>,
    pub text: String,
}

impl ManifestSource {
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            text: text.into(),
        }
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            text: decode_manifest_bytes(&bytes),
        })
    }
}

/// Decode manifest bytes: BOM first, then UTF-8, then Windows-1252
pub fn decode_manifest_bytes(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (decoded, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return decoded.into_owned();
    }

    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    // Older tools wrote Latin paths without declaring an encoding
    let (decoded, _, _) = WINDOWS_1252.decode(bytes);
    decoded.into_owned()
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("mhl"))
}

/// Expand each argument into manifest files: files are taken as given,
/// directories are searched recursively for `*.mhl`, sorted by path.
pub fn collect_manifest_paths(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            collect_recursive(input, &mut found)?;
            found.sort();
            if found.is_empty() {
                tracing::warn!(dir = %input.display(), "no .mhl files found");
            }
            paths.extend(found);
        } else if input.is_file() {
            paths.push(input.clone());
        } else {
            anyhow::bail!("manifest path does not exist: {}", input.display());
        }
    }
    Ok(paths)
}

fn collect_recursive(dir: &Path, found: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_recursive(&path, found)?;
        } else if is_manifest(&path) {
            found.push(path);
        }
    }
    Ok(())
}

/// Read every manifest named by `inputs`, in order.
pub fn load_manifests(inputs: &[PathBuf]) -> anyhow::Result<Vec<ManifestSource>> {
    collect_manifest_paths(inputs)?
        .iter()
        .map(|path| ManifestSource::read(path))
        .collect()
}
