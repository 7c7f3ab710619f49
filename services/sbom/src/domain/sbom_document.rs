use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Component row carried in `sbom.batch_created` records.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub ecosystem: String,
}

/// Aggregate view of a CycloneDX document, stored alongside the raw SBOM.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SbomSummary {
    pub total_components: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    pub generated_at: String,
}

/// Extract `{name, version, type}` components from an SBOM document.
/// Understands CycloneDX `components`, SPDX `packages` and raw syft
/// `artifacts`; entries without both name and version are skipped.
pub fn extract_components(document: &Value) -> Vec<Component> {
    let mut components = Vec::new();

    if let Some(entries) = document.get("components").and_then(Value::as_array) {
        for entry in entries.iter().filter_map(Value::as_object) {
            if let Some(component) = component_from_entry(entry, detect_ecosystem(entry)) {
                components.push(component);
            }
        }
    }

    if let Some(packages) = document.get("packages").and_then(Value::as_array) {
        for entry in packages.iter().filter_map(Value::as_object) {
            let name = str_field(entry, "name");
            let version = str_field(entry, "versionInfo");
            if !name.is_empty() && !version.is_empty() {
                components.push(Component {
                    name: name.to_owned(),
                    version: version.to_owned(),
                    ecosystem: "unknown".to_owned(),
                });
            }
        }
    }

    if let Some(artifacts) = document.get("artifacts").and_then(Value::as_array) {
        for entry in artifacts.iter().filter_map(Value::as_object) {
            if let Some(component) = component_from_entry(entry, detect_ecosystem(entry)) {
                components.push(component);
            }
        }
    }

    components
}

fn component_from_entry(entry: &Map<String, Value>, ecosystem: String) -> Option<Component> {
    let name = str_field(entry, "name");
    let version = str_field(entry, "version");
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some(Component {
        name: name.to_owned(),
        version: version.to_owned(),
        ecosystem,
    })
}

fn str_field<'a>(entry: &'a Map<String, Value>, key: &str) -> &'a str {
    entry.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Ecosystem detection: the purl prefix always wins, then syft's language
/// and package-type properties; anything unresolved stays "unknown".
fn detect_ecosystem(entry: &Map<String, Value>) -> String {
    if let Some(purl) = entry.get("purl").and_then(Value::as_str) {
        let purl = purl.to_ascii_lowercase();
        let by_purl = match () {
            _ if purl.starts_with("pkg:pypi/") => Some("pypi"),
            _ if purl.starts_with("pkg:npm/") => Some("npm"),
            _ if purl.starts_with("pkg:maven/") => Some("maven"),
            _ if purl.starts_with("pkg:golang/") || purl.starts_with("pkg:go/") => Some("golang"),
            _ if purl.starts_with("pkg:composer/") => Some("composer"),
            _ if purl.starts_with("pkg:nuget/") => Some("nuget"),
            _ => None,
        };
        if let Some(eco) = by_purl {
            return eco.to_owned();
        }
    }

    if let Some(lang) = property_value(entry, "syft:package:language") {
        let by_language = match lang.to_ascii_lowercase().as_str() {
            "python" => Some("pypi"),
            "javascript" => Some("npm"),
            "go" => Some("golang"),
            "java" => Some("maven"),
            _ => None,
        };
        if let Some(eco) = by_language {
            return eco.to_owned();
        }
    }

    if let Some(kind) = property_value(entry, "syft:package:type") {
        let by_type = match kind.to_ascii_lowercase().as_str() {
            "python" => Some("pypi"),
            "npm" => Some("npm"),
            "golang" => Some("golang"),
            "maven" => Some("maven"),
            _ => None,
        };
        if let Some(eco) = by_type {
            return eco.to_owned();
        }
    }

    "unknown".to_owned()
}

fn property_value<'a>(entry: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    entry
        .get("properties")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find(|prop| prop.get("name").and_then(Value::as_str) == Some(name))?
        .get("value")?
        .as_str()
}

/// Summarise a CycloneDX document: component count plus distinct languages,
/// license ids and the generating tools (`name@version`).
pub fn summarize_document(document: &Value) -> SbomSummary {
    let mut summary = SbomSummary::default();

    if let Some(entries) = document.get("components").and_then(Value::as_array) {
        summary.total_components = entries.len();
        for entry in entries.iter().filter_map(Value::as_object) {
            if let Some(lang) = property_value(entry, "syft:package:language") {
                push_unique(&mut summary.languages, lang);
            }
            if let Some(licenses) = entry.get("licenses").and_then(Value::as_array) {
                for holder in licenses.iter().filter_map(Value::as_object) {
                    if let Some(id) = holder
                        .get("license")
                        .and_then(Value::as_object)
                        .and_then(|l| l.get("id"))
                        .and_then(Value::as_str)
                    {
                        push_unique(&mut summary.licenses, id);
                    }
                }
            }
        }
    }

    if let Some(metadata) = document.get("metadata").and_then(Value::as_object) {
        // Tool entries live under metadata.tools.components (CycloneDX 1.5
        // shape, which is what syft emits).
        if let Some(tool_components) = metadata
            .get("tools")
            .and_then(Value::as_object)
            .and_then(|tools| tools.get("components"))
            .and_then(Value::as_array)
        {
            for tool in tool_components.iter().filter_map(Value::as_object) {
                if let Some(name) = tool.get("name").and_then(Value::as_str) {
                    let version = tool.get("version").and_then(Value::as_str).unwrap_or_default();
                    summary.tools.push(format!("{name}@{version}"));
                }
            }
        }
        if let Some(ts) = metadata.get("timestamp").and_then(Value::as_str) {
            summary.generated_at = ts.to_owned();
        }
    }

    if summary.generated_at.is_empty() {
        summary.generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    }

    summary
}

fn push_unique(values: &mut Vec<String>, candidate: &str) {
    if !values.iter().any(|v| v == candidate) {
        values.push(candidate.to_owned());
    }
}

/// Synthesize a minimal CycloneDX document from raw scan findings, used
/// when no manifest yielded an SBOM but findings exist.
pub fn build_sbom_from_findings(findings: &[Map<String, Value>]) -> Value {
    let components: Vec<Value> = findings
        .iter()
        .map(|finding| {
            json!({
                "name": finding.get("check_id").cloned().unwrap_or(Value::Null),
                "version": "N/A",
                "file": finding.get("path").cloned().unwrap_or(Value::Null),
                "severity": finding.get("severity").cloned().unwrap_or(Value::Null),
                "message": finding.get("message").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    json!({
        "bomFormat": "CycloneDX",
        "specVersion": "1.4",
        "components": components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cyclonedx_fixture() -> Value {
        json!({
            "bomFormat": "CycloneDX",
            "specVersion": "1.4",
            "metadata": {
                "timestamp": "2025-01-01T00:00:00Z",
                "tools": {"components": [{"name": "syft", "version": "1.0.0"}]},
            },
            "components": [
                {
                    "name": "requests",
                    "version": "2.31.0",
                    "purl": "pkg:pypi/requests@2.31.0",
                    "licenses": [{"license": {"id": "Apache-2.0"}}],
                    "properties": [{"name": "syft:package:language", "value": "python"}],
                },
                {
                    "name": "left-pad",
                    "version": "1.3.0",
                    "properties": [{"name": "syft:package:language", "value": "javascript"}],
                },
                {"name": "versionless"},
            ],
        })
    }

    #[test]
    fn extracts_components_with_ecosystems() {
        let components = extract_components(&cyclonedx_fixture());
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].name, "requests");
        assert_eq!(components[0].ecosystem, "pypi");
        assert_eq!(components[1].ecosystem, "npm");
    }

    #[test]
    fn purl_wins_over_properties() {
        let entry = json!({
            "name": "guava",
            "version": "33.0",
            "purl": "pkg:maven/com.google.guava/guava@33.0",
            "properties": [{"name": "syft:package:language", "value": "python"}],
        });
        let components = extract_components(&json!({"components": [entry]}));
        assert_eq!(components[0].ecosystem, "maven");
    }

    #[test]
    fn unresolved_ecosystem_is_unknown() {
        let components = extract_components(&json!({
            "components": [{"name": "mystery", "version": "0.1"}],
        }));
        assert_eq!(components[0].ecosystem, "unknown");
    }

    #[test]
    fn extracts_spdx_packages() {
        let components = extract_components(&json!({
            "packages": [{"name": "zlib", "versionInfo": "1.3"}],
        }));
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].version, "1.3");
    }

    #[test]
    fn summary_counts_and_dedupes() {
        let summary = summarize_document(&cyclonedx_fixture());
        assert_eq!(summary.total_components, 3);
        assert_eq!(summary.languages, vec!["python", "javascript"]);
        assert_eq!(summary.licenses, vec!["Apache-2.0"]);
        assert_eq!(summary.tools, vec!["syft@1.0.0"]);
        assert_eq!(summary.generated_at, "2025-01-01T00:00:00Z");
    }

    #[test]
    fn summary_defaults_generated_at_when_metadata_is_missing() {
        let summary = summarize_document(&json!({"components": []}));
        assert!(!summary.generated_at.is_empty());
        // RFC 3339 at seconds precision, e.g. 2025-01-01T00:00:00Z.
        assert!(summary.generated_at.ends_with('Z'));
        assert!(!summary.generated_at.contains('.'));
    }

    #[test]
    fn findings_fallback_document_shape() {
        let finding = json!({
            "check_id": "rules.python.insecure-hash",
            "path": "app/crypto.py",
            "severity": "HIGH",
            "message": "md5 used for password hashing",
        });
        let findings = vec![finding.as_object().cloned().unwrap()];

        let document = build_sbom_from_findings(&findings);
        assert_eq!(document["bomFormat"], "CycloneDX");
        assert_eq!(document["specVersion"], "1.4");
        assert_eq!(
            document["components"][0]["name"],
            "rules.python.insecure-hash"
        );
        assert_eq!(document["components"][0]["version"], "N/A");
        assert_eq!(document["components"][0]["severity"], "HIGH");
    }
}
