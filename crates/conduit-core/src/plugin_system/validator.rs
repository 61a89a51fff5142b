//! Structural validation of plugin manifests.
//!
//! Validation works on the raw JSON document so that every problem can be
//! reported at once, with element indexes, before anything is decoded into
//! [`PluginManifest`]. All checks run; none short-circuits the others.
use std::sync::OnceLock;

use log::warn;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::kernel::constants::MAX_PLUGIN_ID_LEN;
use crate::plugin_system::contribution::{field_choices, required_fields};
use crate::plugin_system::error::ValidationError;
use crate::plugin_system::extension_point::ExtensionPoint;
use crate::plugin_system::manifest::{PluginCategory, PluginManifest};

/// Pattern advertised in the schema for plugin ids
pub const PLUGIN_ID_PATTERN: &str = "^[A-Za-z0-9.-]+$";

/// Pattern advertised in the schema for versions
pub const VERSION_PATTERN: &str = r"^[0-9]+\.[0-9]+\.[0-9]+(?:-[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?(?:\+[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?$";

const REQUIRED_STRINGS: [(&str, &str); 5] = [
    ("id", "Plugin ID"),
    ("name", "Plugin name"),
    ("version", "Plugin version"),
    ("description", "Plugin description"),
    ("author", "Plugin author"),
];

/// `MAJOR.MINOR.PATCH[-prerelease][+build]`, matched with the same
/// [`VERSION_PATTERN`] the schema publishes.
pub fn is_valid_version(version: &str) -> bool {
    static GRAMMAR: OnceLock<Option<Regex>> = OnceLock::new();
    GRAMMAR
        .get_or_init(|| Regex::new(VERSION_PATTERN).ok())
        .as_ref()
        .is_some_and(|grammar| grammar.is_match(version))
}

pub fn is_valid_plugin_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_PLUGIN_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Validate a typed manifest by checking its serialized form.
pub fn validate_manifest(manifest: &PluginManifest) -> Result<(), ValidationError> {
    validate(&manifest.to_value())
}

/// Validate a raw manifest document, collecting every violation.
pub fn validate(manifest: &Value) -> Result<(), ValidationError> {
    let mut errors = ValidationError::new();

    let Some(object) = manifest.as_object() else {
        errors.push("Manifest must be a JSON object");
        return errors.into_result();
    };

    for (key, label) in REQUIRED_STRINGS {
        if non_empty_str(object.get(key)).is_none() {
            errors.push(format!("{label} (\"{key}\") is required and must be a string"));
        }
    }

    if let Some(id) = non_empty_str(object.get("id")) {
        if !is_valid_plugin_id(id) {
            errors.push(format!(
                "Plugin ID \"{id}\" may only contain letters, digits, dots and hyphens (1-{MAX_PLUGIN_ID_LEN} characters)"
            ));
        }
    }

    if let Some(version) = non_empty_str(object.get("version")) {
        if !is_valid_version(version) {
            errors.push(format!(
                "Plugin version must follow semantic versioning (e.g., 1.0.0), got \"{version}\""
            ));
        }
    }

    check_engines(object, &mut errors);
    check_activation_events(object, &mut errors);
    check_optional_fields(object, &mut errors);
    check_dependencies(object, &mut errors);

    match object.get("contributes") {
        None | Some(Value::Null) => {}
        Some(Value::Object(contributes)) => check_contributions(contributes, &mut errors),
        Some(_) => errors.push("Contributions (\"contributes\") must be an object"),
    }

    errors.into_result()
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn check_engines(object: &Map<String, Value>, errors: &mut ValidationError) {
    let Some(engines) = object.get("engines").and_then(Value::as_object) else {
        errors.push("Engine compatibility (\"engines\") is required");
        return;
    };
    if non_empty_str(engines.get("host")).is_none() {
        errors.push("Host engine range (\"engines.host\") is required and must be a string");
    }
    if non_empty_str(engines.get("framework")).is_none() {
        errors.push("Framework range (\"engines.framework\") is required and must be a string");
    }
}

fn check_activation_events(object: &Map<String, Value>, errors: &mut ValidationError) {
    let Some(events) = object.get("activationEvents").and_then(Value::as_array) else {
        errors.push("Activation events (\"activationEvents\") must be an array");
        return;
    };
    for (index, event) in events.iter().enumerate() {
        if non_empty_str(Some(event)).is_none() {
            errors.push(format!("Activation event {index} must be a non-empty string"));
        }
    }
}

fn check_optional_fields(object: &Map<String, Value>, errors: &mut ValidationError) {
    for key in ["main", "license", "homepage"] {
        if let Some(value) = object.get(key) {
            if !value.is_null() && non_empty_str(Some(value)).is_none() {
                errors.push(format!("Optional field \"{key}\" must be a non-empty string when present"));
            }
        }
    }

    match object.get("keywords") {
        None | Some(Value::Null) => {}
        Some(Value::Array(keywords)) => {
            if keywords.iter().any(|k| !k.is_string()) {
                errors.push("Keywords (\"keywords\") must all be strings");
            }
        }
        Some(_) => errors.push("Keywords (\"keywords\") must be an array"),
    }

    match object.get("category") {
        None | Some(Value::Null) => {}
        Some(value) => {
            let known = value
                .as_str()
                .is_some_and(|c| PluginCategory::NAMES.contains(&c));
            if !known {
                errors.push(format!(
                    "Plugin category must be one of: {}",
                    PluginCategory::NAMES.join(", ")
                ));
            }
        }
    }

    match object.get("repository") {
        None | Some(Value::Null) => {}
        Some(Value::Object(repository)) => {
            if non_empty_str(repository.get("type")).is_none()
                || non_empty_str(repository.get("url")).is_none()
            {
                errors.push("Repository must have string \"type\" and \"url\" fields");
            }
        }
        Some(_) => errors.push("Repository (\"repository\") must be an object"),
    }
}

fn check_dependencies(object: &Map<String, Value>, errors: &mut ValidationError) {
    match object.get("dependencies") {
        None | Some(Value::Null) => {}
        Some(Value::Object(dependencies)) => {
            for (name, version) in dependencies {
                match version.as_str() {
                    Some(v) if is_valid_version(v) => {}
                    Some(v) => errors.push(format!("Dependency {name} has invalid version: {v}")),
                    None => errors.push(format!("Dependency {name} has invalid version: {version}")),
                }
            }
        }
        Some(_) => errors.push("Dependencies (\"dependencies\") must be an object"),
    }
}

fn check_contributions(contributes: &Map<String, Value>, errors: &mut ValidationError) {
    for (key, value) in contributes {
        let Some(point) = ExtensionPoint::from_contributes_key(key) else {
            warn!("Ignoring unknown contribution key \"{}\"", key);
            continue;
        };
        if value.is_null() {
            continue;
        }
        let Some(items) = value.as_array() else {
            errors.push(format!("Contribution \"{key}\" must be an array"));
            continue;
        };
        for (index, item) in items.iter().enumerate() {
            check_contribution(point, index, item, errors);
        }
    }
}

fn check_contribution(point: ExtensionPoint, index: usize, item: &Value, errors: &mut ValidationError) {
    let label = point.label();
    let Some(record) = item.as_object() else {
        errors.push(format!("{label} contribution {index} must be an object"));
        return;
    };

    for field in required_fields(point) {
        match record.get(*field) {
            None | Some(Value::Null) => {
                errors.push(format!("{label} contribution {index} is missing required \"{field}\" field"));
            }
            Some(Value::String(s)) if s.is_empty() => {
                errors.push(format!("{label} contribution {index} is missing required \"{field}\" field"));
            }
            Some(Value::String(s)) => {
                if let Some(choices) = field_choices(point, field) {
                    if !choices.contains(&s.as_str()) {
                        errors.push(format!(
                            "{label} contribution {index} must have {field} {}",
                            describe_choices(choices)
                        ));
                    }
                }
            }
            Some(_) => {
                errors.push(format!("{label} contribution {index} field \"{field}\" must be a string"));
            }
        }
    }
}

/// `"a" or "b"`, `"a", "b" or "c"`
fn describe_choices(choices: &[&str]) -> String {
    let quoted: Vec<String> = choices.iter().map(|c| format!("\"{c}\"")).collect();
    match quoted.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} or {}", rest.join(", "), last),
        Some((last, _)) => last.clone(),
        None => String::new(),
    }
}

/// JSON Schema (draft-07) describing a manifest, for editors and linters.
pub fn manifest_schema() -> Value {
    let mut contributes = Map::new();
    for point in ExtensionPoint::ALL {
        let mut properties = Map::new();
        for field in required_fields(point) {
            let property = match field_choices(point, field) {
                Some(choices) => json!({ "type": "string", "enum": choices }),
                None => json!({ "type": "string", "minLength": 1 }),
            };
            properties.insert(field.to_string(), property);
        }
        contributes.insert(
            point.contributes_key().to_string(),
            json!({
                "type": "array",
                "description": format!("Contributions to the {} extension point", point.as_str()),
                "items": {
                    "type": "object",
                    "required": required_fields(point),
                    "properties": properties,
                }
            }),
        );
    }

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Conduit plugin manifest",
        "type": "object",
        "required": ["id", "name", "version", "description", "author", "engines", "activationEvents"],
        "properties": {
            "id": {
                "type": "string",
                "pattern": PLUGIN_ID_PATTERN,
                "minLength": 1,
                "maxLength": MAX_PLUGIN_ID_LEN,
            },
            "name": { "type": "string", "minLength": 1 },
            "version": { "type": "string", "pattern": VERSION_PATTERN },
            "description": { "type": "string", "minLength": 1 },
            "author": { "type": "string", "minLength": 1 },
            "license": { "type": "string" },
            "engines": {
                "type": "object",
                "required": ["host", "framework"],
                "properties": {
                    "host": { "type": "string", "description": "Host engine version range" },
                    "framework": { "type": "string", "description": "Extension framework version range" },
                }
            },
            "activationEvents": { "type": "array", "items": { "type": "string", "minLength": 1 } },
            "main": { "type": "string", "minLength": 1 },
            "dependencies": {
                "type": "object",
                "additionalProperties": { "type": "string", "pattern": VERSION_PATTERN },
            },
            "keywords": { "type": "array", "items": { "type": "string" } },
            "category": { "type": "string", "enum": PluginCategory::NAMES },
            "homepage": { "type": "string" },
            "repository": {
                "type": "object",
                "required": ["type", "url"],
                "properties": {
                    "type": { "type": "string" },
                    "url": { "type": "string" },
                }
            },
            "contributes": { "type": "object", "properties": contributes },
        }
    })
}
