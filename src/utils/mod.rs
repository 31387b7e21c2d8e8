//! Utilities (document loading, terminal dialogs).

pub mod dialogs;

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use is_terminal::IsTerminal;

/// Read a Markdown document from disk.
/// Supports .md, .markdown, .txt and files without extension.
pub fn read_single_document(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("Document file '{}' does not exist", path.display());
    }
    if !path.is_file() {
        bail!("'{}' is not a file", path.display());
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "md" | "markdown" | "txt" | "" => {
            fs::read_to_string(path).map_err(|e| anyhow!("Failed to read file '{}': {}", path.display(), e))
        }
        _ => bail!(
            "Unsupported file type: .{}\nCurrently supported: .md, .markdown, .txt, and files without extension",
            extension
        ),
    }
}

/// Document from FILE, or from stdin when input is piped.
pub fn read_input(file: Option<&Path>) -> Result<String> {
    if let Some(path) = file {
        return read_single_document(path);
    }
    if io::stdin().is_terminal() {
        bail!("Provide a FILE or pipe a document via stdin");
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_markdown_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "# Title").unwrap();
        assert_eq!(read_single_document(&path).unwrap(), "# Title\n");
    }

    #[test]
    fn rejects_unknown_extensions_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        fs::write(&pdf, "x").unwrap();
        let err = read_single_document(&pdf).unwrap_err().to_string();
        assert!(err.starts_with("Unsupported file type: .pdf"));

        let missing = dir.path().join("missing.md");
        assert!(read_single_document(&missing).is_err());
        assert!(read_single_document(dir.path()).is_err());
    }
}
