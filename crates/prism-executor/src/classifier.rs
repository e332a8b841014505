//! Terraform output classification.
//!
//! Terraform run with `-json` emits one JSON object per line. Anything that
//! does not start with `{` (banners, warnings from wrappers, plain `init`
//! output) is passed through as raw text. State files are parsed separately
//! for identifying attributes.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use prism_models::PlanSummary;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

static PLAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Plan: (\d+) to add, (\d+) to change, (\d+) to destroy")
        .expect("Invalid plan regex")
});

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePos {
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub byte: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceRange {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub start: SourcePos,
    #[serde(default)]
    pub end: SourcePos,
}

/// A problem reported by terraform.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<SourceRange>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// The `changes` block of a `change_summary` message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    #[serde(default)]
    pub add: u32,
    #[serde(default)]
    pub change: u32,
    #[serde(default)]
    pub remove: u32,
    #[serde(default)]
    pub import: u32,
    #[serde(default)]
    pub operation: Option<String>,
}

impl From<ChangeSummary> for PlanSummary {
    fn from(c: ChangeSummary) -> Self {
        PlanSummary::new(c.add, c.change, c.remove)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HookResource {
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub resource_name: String,
}

/// Per-resource progress carried by `apply_*` and `refresh_*` messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hook {
    #[serde(default)]
    pub resource: HookResource,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub elapsed_seconds: u64,
}

/// One line of terraform's machine-readable output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TerraformMessage {
    #[serde(rename = "@level", default)]
    pub level: String,
    #[serde(rename = "@message", default)]
    pub message: String,
    #[serde(rename = "@module", default)]
    pub module: String,
    #[serde(rename = "@timestamp", default)]
    pub timestamp: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<Hook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform: Option<String>,
}

impl TerraformMessage {
    /// The error diagnostic carried by this message, if any.
    pub fn error_diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostic.as_ref().filter(|d| d.is_error())
    }
}

/// Everything recognized in a block of output.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub messages: Vec<TerraformMessage>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub changes: Option<ChangeSummary>,
    /// False if any error diagnostic was seen.
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateInstance {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateResource {
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub instances: Vec<StateInstance>,
}

/// Typed view of a `terraform.tfstate` file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub terraform_version: String,
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub lineage: String,
    #[serde(default)]
    pub outputs: serde_json::Map<String, Value>,
    #[serde(default)]
    pub resources: Vec<StateResource>,
}

/// Attributes pulled out of every state instance when present.
const IDENTITY_FIELDS: [&str; 2] = ["id", "arn"];

/// Parses a single output line. `None` for raw text or malformed JSON.
pub fn parse_line(line: &str) -> Option<TerraformMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!(error = %e, "Ignoring malformed JSON line");
            None
        }
    }
}

/// Classifies a whole block of line-delimited output.
pub fn parse_output(output: &str) -> ParseResult {
    let mut result = ParseResult::default();
    for msg in output.lines().filter_map(parse_line) {
        if let Some(diag) = &msg.diagnostic {
            match diag.severity {
                Severity::Error => result.errors.push(diag.clone()),
                Severity::Warning => result.warnings.push(diag.clone()),
                Severity::Unknown => {}
            }
        }
        if msg.kind == "change_summary" {
            if let Some(changes) = &msg.changes {
                result.changes = Some(changes.clone());
            }
        }
        result.messages.push(msg);
    }
    result.success = result.errors.is_empty();
    result
}

/// Extracts plan counts. A structured `change_summary` wins over the
/// human-readable `Plan:` line; neither yields all zeros.
pub fn parse_plan(output: &str) -> PlanSummary {
    if let Some(changes) = parse_output(output).changes {
        return changes.into();
    }
    PLAN_RE
        .captures(output)
        .map(|caps| {
            let n = |i: usize| caps[i].parse().unwrap_or(0);
            PlanSummary::new(n(1), n(2), n(3))
        })
        .unwrap_or_default()
}

/// Parses a state file into its typed form.
pub fn parse_state_document(data: &[u8]) -> Result<StateDocument, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Collects `{type}.{name}.{id|arn}` for every resource instance.
///
/// Unparseable state yields an empty map. Resources with several instances
/// report the last one.
pub fn parse_state(data: &[u8]) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let state = match parse_state_document(data) {
        Ok(state) => state,
        Err(e) => {
            debug!(error = %e, "State file is not valid JSON");
            return attrs;
        }
    };

    for resource in &state.resources {
        for instance in &resource.instances {
            for field in IDENTITY_FIELDS {
                if let Some(value) = instance.attributes.get(field) {
                    attrs.insert(
                        format!("{}.{}.{}", resource.kind, resource.name, field),
                        value_to_string(value),
                    );
                }
            }
        }
    }
    attrs
}

/// Resolves each named path against the state JSON. Paths that do not
/// resolve are left out.
pub fn extract_attributes(
    data: &[u8],
    queries: &BTreeMap<String, String>,
) -> HashMap<String, String> {
    let Ok(root) = serde_json::from_slice::<Value>(data) else {
        return HashMap::new();
    };
    queries
        .iter()
        .filter_map(|(name, path)| {
            lookup_path(&root, path).map(|v| (name.clone(), value_to_string(v)))
        })
        .collect()
}

/// Dotted path lookup. Numeric segments index into arrays.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Renders diagnostics as blocks separated by `---`.
pub fn summarize_errors(errors: &[Diagnostic]) -> String {
    let blocks: Vec<String> = errors
        .iter()
        .map(|d| {
            let mut block = format!("Error: {}\n", d.summary);
            if !d.address.is_empty() {
                block.push_str(&format!("Resource: {}\n", d.address));
            }
            if let Some(range) = &d.range {
                block.push_str(&format!("File: {}:{}\n", range.filename, range.start.line));
            }
            if !d.detail.is_empty() {
                block.push_str(&format!("Detail: {}\n", d.detail));
            }
            block
        })
        .collect();
    blocks.join("---\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE: &str = r#"{
        "version": 4,
        "serial": 10,
        "lineage": "test-lineage",
        "resources": [
            {
                "mode": "managed",
                "type": "aws_instance",
                "name": "web",
                "provider": "provider.aws",
                "instances": [
                    {
                        "schema_version": 1,
                        "attributes": {
                            "id": "i-1234567890abcdef0",
                            "arn": "arn:aws:ec2:us-east-1:123456789012:instance/i-1234567890abcdef0",
                            "tags": ["a", "b"],
                            "cpu": 2
                        }
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_line_skips_text() {
        assert!(parse_line("Initializing the backend...").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("{not json").is_none());

        let msg = parse_line(r#"  {"@level":"info","@message":"Terraform 1.6.0","type":"version","terraform":"1.6.0"}"#)
            .unwrap();
        assert_eq!(msg.kind, "version");
        assert_eq!(msg.message, "Terraform 1.6.0");
        assert_eq!(msg.terraform.as_deref(), Some("1.6.0"));
    }

    #[test]
    fn test_parse_output_collects_diagnostics() {
        let output = [
            "Some banner",
            r#"{"@level":"error","@message":"Error: Invalid reference","type":"diagnostic","diagnostic":{"severity":"error","summary":"Invalid reference","detail":"A reference must be valid","range":{"filename":"main.tf","start":{"line":3,"column":1,"byte":10},"end":{"line":3,"column":9,"byte":18}}}}"#,
            r#"{"@level":"warn","@message":"Warning: Deprecated","type":"diagnostic","diagnostic":{"severity":"warning","summary":"Deprecated"}}"#,
            r#"{"@level":"info","@message":"Plan: 1 to add, 0 to change, 0 to destroy.","type":"change_summary","changes":{"add":1,"change":0,"remove":0,"operation":"plan"}}"#,
        ]
        .join("\n");

        let result = parse_output(&output);

        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.success);
        assert_eq!(result.errors[0].range.as_ref().unwrap().start.line, 3);
        assert_eq!(result.changes.unwrap().add, 1);
    }

    #[test]
    fn test_parse_plan_prefers_change_summary() {
        let output = concat!(
            "Plan: 9 to add, 9 to change, 9 to destroy.\n",
            r#"{"type":"change_summary","changes":{"add":2,"change":1,"remove":0}}"#
        );
        assert_eq!(parse_plan(output), PlanSummary::new(2, 1, 0));
    }

    #[test]
    fn test_change_summary_import_count() {
        let msg = parse_line(
            r#"{"type":"change_summary","changes":{"add":0,"change":0,"import":2,"remove":0,"operation":"plan"}}"#,
        )
        .unwrap();
        let changes = msg.changes.unwrap();
        assert_eq!(changes.import, 2);
        assert_eq!(changes.operation.as_deref(), Some("plan"));

        let older = parse_line(r#"{"type":"change_summary","changes":{"add":1}}"#).unwrap();
        assert_eq!(older.changes.unwrap().import, 0);
    }

    #[test]
    fn test_parse_plan_text_fallback() {
        let cases = [
            ("Plan: 3 to add, 1 to change, 2 to destroy.", PlanSummary::new(3, 1, 2)),
            ("Plan: 0 to add, 0 to change, 0 to destroy.", PlanSummary::default()),
            ("Some other output", PlanSummary::default()),
            (
                "Refreshing state...\nPlan: 5 to add, 2 to change, 1 to destroy.\nApply complete!",
                PlanSummary::new(5, 2, 1),
            ),
        ];
        for (output, expected) in cases {
            assert_eq!(parse_plan(output), expected, "{:?}", output);
        }
    }

    #[test]
    fn test_parse_state_identity_attributes() {
        let attrs = parse_state(STATE.as_bytes());
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["aws_instance.web.id"], "i-1234567890abcdef0");
        assert!(attrs["aws_instance.web.arn"].starts_with("arn:aws:ec2"));
    }

    #[test]
    fn test_parse_state_empty_cases() {
        assert!(parse_state(br#"{"version": 4}"#).is_empty());
        assert!(parse_state(br#"{"resources":[{"type":"t","name":"n","instances":[]}]}"#).is_empty());
        assert!(parse_state(
            br#"{"resources":[{"type":"null_resource","name":"x","instances":[{"attributes":{"triggers":{}}}]}]}"#
        )
        .is_empty());
        assert!(parse_state(b"invalid json").is_empty());
    }

    #[test]
    fn test_parse_state_document() {
        let state = parse_state_document(STATE.as_bytes()).unwrap();
        assert_eq!(state.version, 4);
        assert_eq!(state.serial, 10);
        assert_eq!(state.lineage, "test-lineage");
        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.resources[0].kind, "aws_instance");
        assert_eq!(state.resources[0].instances[0].schema_version, 1);

        assert!(parse_state_document(b"invalid json").is_err());
    }

    #[test]
    fn test_extract_attributes() {
        let queries = BTreeMap::from([
            ("id".to_string(), "resources.0.instances.0.attributes.id".to_string()),
            ("second_tag".to_string(), "resources.0.instances.0.attributes.tags.1".to_string()),
            ("cpu".to_string(), "resources.0.instances.0.attributes.cpu".to_string()),
            ("missing".to_string(), "nonexistent.path".to_string()),
            ("out_of_range".to_string(), "resources.3.name".to_string()),
        ]);

        let attrs = extract_attributes(STATE.as_bytes(), &queries);

        assert_eq!(attrs["id"], "i-1234567890abcdef0");
        assert_eq!(attrs["second_tag"], "b");
        assert_eq!(attrs["cpu"], "2");
        assert!(!attrs.contains_key("missing"));
        assert!(!attrs.contains_key("out_of_range"));
    }

    #[test]
    fn test_summarize_errors() {
        let errors = vec![
            Diagnostic {
                severity: Severity::Error,
                summary: "Invalid reference".into(),
                detail: "A reference must be valid".into(),
                address: "aws_instance.web".into(),
                range: Some(SourceRange {
                    filename: "main.tf".into(),
                    start: SourcePos { line: 3, column: 1, byte: 0 },
                    end: SourcePos::default(),
                }),
            },
            Diagnostic {
                severity: Severity::Error,
                summary: "Missing provider".into(),
                ..Default::default()
            },
        ];
        assert_eq!(
            summarize_errors(&errors),
            "Error: Invalid reference\nResource: aws_instance.web\nFile: main.tf:3\n\
             Detail: A reference must be valid\n---\nError: Missing provider\n"
        );
        assert_eq!(summarize_errors(&[]), "");
    }
}
