//! Canonical JSON writing shared by the registry and lock-file codecs.
//!
//! Both on-disk formats are 4-space indented, end with a newline, and are
//! written atomically (temp sibling + rename) so a crash never leaves a
//! truncated file behind.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Render a value as 4-space indented JSON with a trailing newline.
pub fn to_canonical_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    let mut out = String::from_utf8(buf).expect("serde_json emits UTF-8");
    out.push('\n');
    Ok(out)
}

/// Write `contents` to `path`, creating parent directories and replacing any
/// existing file atomically.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }

    let mut tmp = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))
        .map_err(|e| Error::io(path, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| Error::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
