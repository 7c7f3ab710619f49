use std::path::Path;

use anyhow::{Context as _, anyhow};
use chrono::Utc;
use tokio::process::Command;

use crate::domain::repository::ManifestParser;
use crate::domain::types::ParsedSbom;
use crate::error::SbomServiceError;

/// Serialisation produced by the parser subprocess.
pub const CYCLONEDX_JSON_FORMAT: &str = "cyclonedx-json";

/// Manifest parser shelling out to syft (or a compatible drop-in named via
/// `SYFT_COMMAND`). The manifest is written into a fresh scratch directory
/// which is removed when parsing finishes.
pub struct SyftManifestParser {
    command: String,
}

impl SyftManifestParser {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ManifestParser for SyftManifestParser {
    async fn parse(
        &self,
        project: &str,
        manifest_name: &str,
        content: &[u8],
    ) -> Result<ParsedSbom, SbomServiceError> {
        let scratch = tempfile::tempdir().context("create manifest scratch dir")?;
        let file_name = Path::new(manifest_name)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("manifest");
        let manifest_path = scratch.path().join(file_name);
        tokio::fs::write(&manifest_path, content)
            .await
            .context("write manifest to scratch dir")?;

        // Maven resolution wants the directory, not the file.
        let target = if file_name == "pom.xml" {
            format!("dir:{}", scratch.path().display())
        } else {
            manifest_path.display().to_string()
        };

        let output = Command::new(&self.command)
            .arg(&target)
            .args(["-o", CYCLONEDX_JSON_FORMAT])
            .output()
            .await
            .with_context(|| format!("spawn {}", self.command))?;

        if !output.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into());
        }
        if output.stdout.is_empty() {
            return Err(anyhow!(
                "{} returned empty output (stderr: {})",
                self.command,
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into());
        }

        Ok(ParsedSbom {
            project: project.to_owned(),
            created_at: Utc::now(),
            format: CYCLONEDX_JSON_FORMAT.to_owned(),
            data: output.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_subprocess_stdout() {
        // `echo` stands in for syft: any non-empty stdout is accepted here;
        // document validity is the sbom store's concern.
        let parser = SyftManifestParser::new("echo");
        let parsed = parser
            .parse("web", "go.mod", b"module example.com/web")
            .await
            .unwrap();
        assert_eq!(parsed.project, "web");
        assert_eq!(parsed.format, CYCLONEDX_JSON_FORMAT);
        assert!(!parsed.data.is_empty());
    }

    #[tokio::test]
    async fn failing_subprocess_is_an_error() {
        let parser = SyftManifestParser::new("false");
        assert!(parser.parse("web", "go.mod", b"module x").await.is_err());
    }

    #[tokio::test]
    async fn missing_executable_is_an_error() {
        let parser = SyftManifestParser::new("definitely-not-on-path-sbomhub");
        assert!(parser.parse("web", "go.mod", b"module x").await.is_err());
    }
}
