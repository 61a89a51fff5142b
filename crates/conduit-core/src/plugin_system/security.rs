//! Capability policy for code loaded from plugins.
//!
//! The policy answers three questions: may a plugin use capability `x`
//! ([`SecurityPolicy::is_capability_allowed`]), does a piece of source text
//! reach for anything restricted ([`SecurityPolicy::scan_for_violations`]),
//! and which globals should an embedded interpreter expose
//! ([`SecurityPolicy::build_restricted_scope`]). Deny entries always win
//! over allow entries.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::storage::config::SecuritySettings;

/// Capability plugins use to raise host notifications
pub const NOTIFY_CAPABILITY: &str = "host.ui.notify";

const DEFAULT_ALLOWED: [&str; 13] = [
    "console.log",
    "console.info",
    "console.warn",
    "console.error",
    "JSON.parse",
    "JSON.stringify",
    "Math.*",
    "Date.*",
    "String.*",
    "Array.*",
    "Object.*",
    "host.ui.*",
    "host.storage.*",
];

const DEFAULT_DENIED: [&str; 11] = [
    "eval",
    "Function",
    "require",
    "process",
    "global",
    "window",
    "document",
    "XMLHttpRequest",
    "fetch",
    "import",
    "importScripts",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Exact names or `prefix.*` wildcards
    pub allowed: Vec<String>,
    /// Exact names or `prefix.*` wildcards; consulted first
    pub denied: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed: DEFAULT_ALLOWED.iter().map(|s| s.to_string()).collect(),
            denied: DEFAULT_DENIED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    RestrictedIdentifier,
    PrototypeMutation,
    ConstructorEscalation,
}

/// One suspicious construct found by [`SecurityPolicy::scan_for_violations`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    /// 1-based line of the first occurrence
    pub line: usize,
    pub pattern: String,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScopeEntry {
    Exposed,
    /// Explicitly undefined inside the scope
    Hidden,
}

/// Globals an embedded interpreter should expose to plugin code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestrictedScope {
    entries: BTreeMap<String, ScopeEntry>,
}

impl RestrictedScope {
    pub fn get(&self, name: &str) -> Option<ScopeEntry> {
        self.entries.get(name).copied()
    }

    /// Whether `name`, or the closest namespace it lives in, is exposed
    pub fn is_exposed(&self, name: &str) -> bool {
        let mut candidate = name;
        loop {
            match self.get(candidate) {
                Some(ScopeEntry::Exposed) => return true,
                Some(ScopeEntry::Hidden) => return false,
                None => {}
            }
            match candidate.rfind('.') {
                Some(dot) => candidate = &candidate[..dot],
                None => return false,
            }
        }
    }

    pub fn exposed(&self) -> impl Iterator<Item = &str> {
        self.names_with(ScopeEntry::Exposed)
    }

    pub fn hidden(&self) -> impl Iterator<Item = &str> {
        self.names_with(ScopeEntry::Hidden)
    }

    fn names_with(&self, wanted: ScopeEntry) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(_, entry)| **entry == wanted)
            .map(|(name, _)| name.as_str())
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" || pattern == name {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => false,
    }
}

struct Idiom {
    kind: FindingKind,
    label: &'static str,
    regex: Regex,
}

fn escalation_idioms() -> &'static [Idiom] {
    static IDIOMS: OnceLock<Vec<Idiom>> = OnceLock::new();
    IDIOMS.get_or_init(|| {
        [
            (FindingKind::PrototypeMutation, "__proto__", r"__proto__"),
            (FindingKind::PrototypeMutation, "setPrototypeOf", r"\bsetPrototypeOf\s*\("),
            (
                FindingKind::ConstructorEscalation,
                "constructor.constructor",
                r#"\bconstructor\s*(?:\.\s*constructor\b|\[\s*['"]constructor['"]\s*\])"#,
            ),
        ]
        .into_iter()
        .filter_map(|(kind, label, pattern)| {
            Regex::new(pattern).ok().map(|regex| Idiom { kind, label, regex })
        })
        .collect()
    })
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

impl SecurityPolicy {
    /// Default lists adjusted by the host configuration
    pub fn from_settings(settings: &SecuritySettings) -> Self {
        let mut policy = Self::default();
        policy.allowed.extend(settings.allow.iter().cloned());
        policy.denied.extend(settings.deny.iter().cloned());
        policy
    }

    pub fn allow(mut self, capability: &str) -> Self {
        self.allowed.push(capability.to_string());
        self
    }

    pub fn deny(mut self, capability: &str) -> Self {
        self.denied.push(capability.to_string());
        self
    }

    pub fn is_capability_allowed(&self, name: &str) -> bool {
        if self.denied.iter().any(|p| pattern_matches(p, name)) {
            return false;
        }
        self.allowed.iter().any(|p| pattern_matches(p, name))
    }

    /// Best-effort textual scan. Never fails; an empty result proves nothing.
    pub fn scan_for_violations(&self, source: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        for identifier in &self.denied {
            let name = identifier.strip_suffix(".*").unwrap_or(identifier);
            if name.is_empty() || name == "*" {
                continue;
            }
            let Ok(regex) = Regex::new(&format!(r"\b{}\b", regex::escape(name))) else {
                continue;
            };
            if let Some(found) = regex.find(source) {
                findings.push(Finding {
                    kind: FindingKind::RestrictedIdentifier,
                    line: line_of(source, found.start()),
                    pattern: name.to_string(),
                    message: format!("use of restricted identifier '{}'", name),
                });
            }
        }

        for idiom in escalation_idioms() {
            if let Some(found) = idiom.regex.find(source) {
                let message = match idiom.kind {
                    FindingKind::PrototypeMutation => {
                        format!("prototype chain mutation via '{}'", idiom.label)
                    }
                    _ => format!("constructor escalation via '{}'", idiom.label),
                };
                findings.push(Finding {
                    kind: idiom.kind,
                    line: line_of(source, found.start()),
                    pattern: idiom.label.to_string(),
                    message,
                });
            }
        }

        findings.sort_by_key(|f| f.line);
        findings
    }

    /// Exposes allow-listed globals and hides every deny-listed one.
    pub fn build_restricted_scope(&self) -> RestrictedScope {
        let mut entries = BTreeMap::new();
        for pattern in &self.allowed {
            let name = pattern.strip_suffix(".*").unwrap_or(pattern);
            if name.is_empty() || name == "*" {
                continue;
            }
            entries.insert(name.to_string(), ScopeEntry::Exposed);
        }
        for pattern in &self.denied {
            let name = pattern.strip_suffix(".*").unwrap_or(pattern);
            if name.is_empty() || name == "*" {
                continue;
            }
            entries.insert(name.to_string(), ScopeEntry::Hidden);
        }
        RestrictedScope { entries }
    }
}
