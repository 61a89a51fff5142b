use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin_system::contribution::*;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::extension_point::ExtensionPoint;
use crate::plugin_system::validator;

/// Declarative description of a plugin, read from its `plugin.json`.
///
/// Manifests are immutable once loaded; callers share them behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique identifier for the plugin
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Plugin version (strict semantic version)
    pub version: String,

    pub description: String,

    pub author: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Compatibility ranges against the host and the extension framework
    pub engines: Engines,

    /// Contributions, one array per extension point
    #[serde(default)]
    pub contributes: Contributions,

    /// Events that trigger activation (`*` matches all)
    pub activation_events: Vec<String>,

    /// Entry file relative to the plugin directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// Declared (not resolved) dependencies: name → exact version
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<PluginCategory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engines {
    /// Host engine range, e.g. `^1.0.0`
    pub host: String,
    /// Extension framework range
    pub framework: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginCategory {
    Communication,
    Visualization,
    DataProcessing,
    Export,
    Themes,
    Tools,
    Other,
}

impl PluginCategory {
    pub const NAMES: [&'static str; 7] = [
        "communication",
        "visualization",
        "data-processing",
        "export",
        "themes",
        "tools",
        "other",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

/// The `contributes` object of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drivers: Vec<DriverContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parsers: Vec<ParserContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<TransformerContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub widgets: Vec<WidgetContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub renderers: Vec<RendererContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_formats: Vec<ExportFormatContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_processors: Vec<ExportProcessorContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub menus: Vec<MenuContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub toolbars: Vec<ToolbarContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settings: Vec<SettingsContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub themes: Vec<ThemeContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icon_themes: Vec<IconThemeContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug_tools: Vec<DebugToolContribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analysis_tools: Vec<AnalysisToolContribution>,
}

impl Contributions {
    /// Every declared contribution, in extension point order.
    pub fn all(&self) -> Vec<Contribution> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.drivers.iter().cloned().map(Contribution::Driver));
        out.extend(self.parsers.iter().cloned().map(Contribution::Parser));
        out.extend(self.validators.iter().cloned().map(Contribution::Validator));
        out.extend(self.transformers.iter().cloned().map(Contribution::Transformer));
        out.extend(self.widgets.iter().cloned().map(Contribution::Widget));
        out.extend(self.renderers.iter().cloned().map(Contribution::Renderer));
        out.extend(self.export_formats.iter().cloned().map(Contribution::ExportFormat));
        out.extend(self.export_processors.iter().cloned().map(Contribution::ExportProcessor));
        out.extend(self.menus.iter().cloned().map(Contribution::Menu));
        out.extend(self.toolbars.iter().cloned().map(Contribution::Toolbar));
        out.extend(self.settings.iter().cloned().map(Contribution::Settings));
        out.extend(self.themes.iter().cloned().map(Contribution::Theme));
        out.extend(self.icon_themes.iter().cloned().map(Contribution::IconTheme));
        out.extend(self.debug_tools.iter().cloned().map(Contribution::DebugTool));
        out.extend(self.analysis_tools.iter().cloned().map(Contribution::AnalysisTool));
        out
    }

    /// Number of contributions declared for `point`
    pub fn count(&self, point: ExtensionPoint) -> usize {
        match point {
            ExtensionPoint::CommunicationDrivers => self.drivers.len(),
            ExtensionPoint::DataParsers => self.parsers.len(),
            ExtensionPoint::DataValidators => self.validators.len(),
            ExtensionPoint::DataTransformers => self.transformers.len(),
            ExtensionPoint::VisualizationWidgets => self.widgets.len(),
            ExtensionPoint::ChartRenderers => self.renderers.len(),
            ExtensionPoint::ExportFormats => self.export_formats.len(),
            ExtensionPoint::ExportProcessors => self.export_processors.len(),
            ExtensionPoint::Menus => self.menus.len(),
            ExtensionPoint::Toolbars => self.toolbars.len(),
            ExtensionPoint::SettingsPages => self.settings.len(),
            ExtensionPoint::Themes => self.themes.len(),
            ExtensionPoint::IconThemes => self.icon_themes.len(),
            ExtensionPoint::DebugTools => self.debug_tools.len(),
            ExtensionPoint::AnalysisTools => self.analysis_tools.len(),
        }
    }

    pub fn declares(&self, point: ExtensionPoint) -> bool {
        self.count(point) > 0
    }

    pub fn len(&self) -> usize {
        ExtensionPoint::ALL.iter().map(|point| self.count(*point)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a contribution to the array of its extension point
    pub fn push(&mut self, contribution: Contribution) {
        match contribution {
            Contribution::Driver(c) => self.drivers.push(c),
            Contribution::Parser(c) => self.parsers.push(c),
            Contribution::Validator(c) => self.validators.push(c),
            Contribution::Transformer(c) => self.transformers.push(c),
            Contribution::Widget(c) => self.widgets.push(c),
            Contribution::Renderer(c) => self.renderers.push(c),
            Contribution::ExportFormat(c) => self.export_formats.push(c),
            Contribution::ExportProcessor(c) => self.export_processors.push(c),
            Contribution::Menu(c) => self.menus.push(c),
            Contribution::Toolbar(c) => self.toolbars.push(c),
            Contribution::Settings(c) => self.settings.push(c),
            Contribution::Theme(c) => self.themes.push(c),
            Contribution::IconTheme(c) => self.icon_themes.push(c),
            Contribution::DebugTool(c) => self.debug_tools.push(c),
            Contribution::AnalysisTool(c) => self.analysis_tools.push(c),
        }
    }
}

impl PluginManifest {
    /// Validate a raw manifest document and decode it.
    ///
    /// `origin` only labels errors; nothing is read from it.
    pub fn from_value(value: Value, origin: &Path) -> Result<Self, PluginSystemError> {
        validator::validate(&value).map_err(|source| PluginSystemError::ManifestValidation {
            path: origin.to_path_buf(),
            source,
        })?;
        serde_json::from_value(value).map_err(|e| PluginSystemError::ManifestError {
            path: origin.to_path_buf(),
            source: Box::new(e.into()),
        })
    }

    /// Cache and context key: `id@version`
    pub fn identity(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether `event` (or the `*` wildcard) is among the activation events
    pub fn activates_on(&self, event: &str) -> bool {
        self.activation_events
            .iter()
            .any(|e| e == event || e == crate::kernel::constants::ACTIVATE_ON_ANY)
    }
}

/// Builder for creating plugin manifests in code
pub struct ManifestBuilder {
    manifest: PluginManifest,
}

impl ManifestBuilder {
    /// Create a new manifest builder with the required identity fields
    pub fn new(id: &str, name: &str, version: &str) -> Self {
        Self {
            manifest: PluginManifest {
                id: id.to_string(),
                name: name.to_string(),
                version: version.to_string(),
                description: String::new(),
                author: String::new(),
                license: None,
                engines: Engines {
                    host: "*".to_string(),
                    framework: "*".to_string(),
                },
                contributes: Contributions::default(),
                activation_events: Vec::new(),
                main: None,
                dependencies: BTreeMap::new(),
                keywords: Vec::new(),
                category: None,
                homepage: None,
                repository: None,
            },
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.manifest.description = description.to_string();
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.manifest.author = author.to_string();
        self
    }

    pub fn license(mut self, license: &str) -> Self {
        self.manifest.license = Some(license.to_string());
        self
    }

    pub fn engines(mut self, host: &str, framework: &str) -> Self {
        self.manifest.engines = Engines {
            host: host.to_string(),
            framework: framework.to_string(),
        };
        self
    }

    pub fn activation_event(mut self, event: &str) -> Self {
        self.manifest.activation_events.push(event.to_string());
        self
    }

    pub fn main(mut self, main: &str) -> Self {
        self.manifest.main = Some(main.to_string());
        self
    }

    pub fn dependency(mut self, name: &str, version: &str) -> Self {
        self.manifest
            .dependencies
            .insert(name.to_string(), version.to_string());
        self
    }

    pub fn keyword(mut self, keyword: &str) -> Self {
        self.manifest.keywords.push(keyword.to_string());
        self
    }

    pub fn category(mut self, category: PluginCategory) -> Self {
        self.manifest.category = Some(category);
        self
    }

    pub fn contribute(mut self, contribution: Contribution) -> Self {
        self.manifest.contributes.push(contribution);
        self
    }

    /// Build the manifest
    pub fn build(self) -> PluginManifest {
        self.manifest
    }
}
