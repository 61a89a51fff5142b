//! Typed contribution records, one struct per extension point.
//!
//! Required fields are plain (non-optional) fields, so a record that
//! deserializes is structurally complete. Fields a host does not know about
//! are preserved in `extra` and passed through untouched.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plugin_system::extension_point::ExtensionPoint;

/// Fields every element of `point`'s contribution array must carry.
pub fn required_fields(point: ExtensionPoint) -> &'static [&'static str] {
    match point {
        ExtensionPoint::CommunicationDrivers => &["id", "name", "protocol"],
        ExtensionPoint::VisualizationWidgets => &["id", "name", "type"],
        ExtensionPoint::ExportFormats => &["id", "name", "extension"],
        ExtensionPoint::Menus | ExtensionPoint::Toolbars => &["id", "label", "command"],
        ExtensionPoint::SettingsPages => &["id", "title"],
        ExtensionPoint::Themes => &["id", "name", "type"],
        ExtensionPoint::DataParsers
        | ExtensionPoint::DataValidators
        | ExtensionPoint::DataTransformers
        | ExtensionPoint::ChartRenderers
        | ExtensionPoint::ExportProcessors
        | ExtensionPoint::IconThemes
        | ExtensionPoint::DebugTools
        | ExtensionPoint::AnalysisTools => &["id", "name"],
    }
}

/// Closed value set of an enumerated required field, if it is one.
pub fn field_choices(point: ExtensionPoint, field: &str) -> Option<&'static [&'static str]> {
    match (point, field) {
        (ExtensionPoint::VisualizationWidgets, "type") => Some(&["dataset", "group"]),
        (ExtensionPoint::Themes, "type") => Some(&["light", "dark", "high-contrast"]),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Dataset,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeKind {
    Light,
    Dark,
    HighContrast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverContribution {
    pub id: String,
    pub name: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserContribution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_formats: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorContribution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerContribution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetContribution {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_data_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererContribution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_types: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFormatContribution {
    pub id: String,
    pub name: String,
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProcessorContribution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_formats: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuContribution {
    pub id: String,
    pub label: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolbarContribution {
    pub id: String,
    pub label: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsContribution {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeContribution {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ThemeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconThemeContribution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugToolContribution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisToolContribution {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_data_types: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A capability instance contributed to exactly one extension point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Contribution {
    Driver(DriverContribution),
    Parser(ParserContribution),
    Validator(ValidatorContribution),
    Transformer(TransformerContribution),
    Widget(WidgetContribution),
    Renderer(RendererContribution),
    ExportFormat(ExportFormatContribution),
    ExportProcessor(ExportProcessorContribution),
    Menu(MenuContribution),
    Toolbar(ToolbarContribution),
    Settings(SettingsContribution),
    Theme(ThemeContribution),
    IconTheme(IconThemeContribution),
    DebugTool(DebugToolContribution),
    AnalysisTool(AnalysisToolContribution),
}

impl Contribution {
    /// Decode a raw record as a contribution to `point`.
    pub fn from_value(point: ExtensionPoint, value: Value) -> Result<Self, serde_json::Error> {
        let contribution = match point {
            ExtensionPoint::CommunicationDrivers => Contribution::Driver(serde_json::from_value(value)?),
            ExtensionPoint::DataParsers => Contribution::Parser(serde_json::from_value(value)?),
            ExtensionPoint::DataValidators => Contribution::Validator(serde_json::from_value(value)?),
            ExtensionPoint::DataTransformers => Contribution::Transformer(serde_json::from_value(value)?),
            ExtensionPoint::VisualizationWidgets => Contribution::Widget(serde_json::from_value(value)?),
            ExtensionPoint::ChartRenderers => Contribution::Renderer(serde_json::from_value(value)?),
            ExtensionPoint::ExportFormats => Contribution::ExportFormat(serde_json::from_value(value)?),
            ExtensionPoint::ExportProcessors => Contribution::ExportProcessor(serde_json::from_value(value)?),
            ExtensionPoint::Menus => Contribution::Menu(serde_json::from_value(value)?),
            ExtensionPoint::Toolbars => Contribution::Toolbar(serde_json::from_value(value)?),
            ExtensionPoint::SettingsPages => Contribution::Settings(serde_json::from_value(value)?),
            ExtensionPoint::Themes => Contribution::Theme(serde_json::from_value(value)?),
            ExtensionPoint::IconThemes => Contribution::IconTheme(serde_json::from_value(value)?),
            ExtensionPoint::DebugTools => Contribution::DebugTool(serde_json::from_value(value)?),
            ExtensionPoint::AnalysisTools => Contribution::AnalysisTool(serde_json::from_value(value)?),
        };
        Ok(contribution)
    }

    pub fn id(&self) -> &str {
        match self {
            Contribution::Driver(c) => &c.id,
            Contribution::Parser(c) => &c.id,
            Contribution::Validator(c) => &c.id,
            Contribution::Transformer(c) => &c.id,
            Contribution::Widget(c) => &c.id,
            Contribution::Renderer(c) => &c.id,
            Contribution::ExportFormat(c) => &c.id,
            Contribution::ExportProcessor(c) => &c.id,
            Contribution::Menu(c) => &c.id,
            Contribution::Toolbar(c) => &c.id,
            Contribution::Settings(c) => &c.id,
            Contribution::Theme(c) => &c.id,
            Contribution::IconTheme(c) => &c.id,
            Contribution::DebugTool(c) => &c.id,
            Contribution::AnalysisTool(c) => &c.id,
        }
    }

    /// Human-facing name: `label` for menus and toolbars, `title` for settings pages.
    pub fn display_name(&self) -> &str {
        match self {
            Contribution::Driver(c) => &c.name,
            Contribution::Parser(c) => &c.name,
            Contribution::Validator(c) => &c.name,
            Contribution::Transformer(c) => &c.name,
            Contribution::Widget(c) => &c.name,
            Contribution::Renderer(c) => &c.name,
            Contribution::ExportFormat(c) => &c.name,
            Contribution::ExportProcessor(c) => &c.name,
            Contribution::Menu(c) => &c.label,
            Contribution::Toolbar(c) => &c.label,
            Contribution::Settings(c) => &c.title,
            Contribution::Theme(c) => &c.name,
            Contribution::IconTheme(c) => &c.name,
            Contribution::DebugTool(c) => &c.name,
            Contribution::AnalysisTool(c) => &c.name,
        }
    }

    pub fn extension_point(&self) -> ExtensionPoint {
        match self {
            Contribution::Driver(_) => ExtensionPoint::CommunicationDrivers,
            Contribution::Parser(_) => ExtensionPoint::DataParsers,
            Contribution::Validator(_) => ExtensionPoint::DataValidators,
            Contribution::Transformer(_) => ExtensionPoint::DataTransformers,
            Contribution::Widget(_) => ExtensionPoint::VisualizationWidgets,
            Contribution::Renderer(_) => ExtensionPoint::ChartRenderers,
            Contribution::ExportFormat(_) => ExtensionPoint::ExportFormats,
            Contribution::ExportProcessor(_) => ExtensionPoint::ExportProcessors,
            Contribution::Menu(_) => ExtensionPoint::Menus,
            Contribution::Toolbar(_) => ExtensionPoint::Toolbars,
            Contribution::Settings(_) => ExtensionPoint::SettingsPages,
            Contribution::Theme(_) => ExtensionPoint::Themes,
            Contribution::IconTheme(_) => ExtensionPoint::IconThemes,
            Contribution::DebugTool(_) => ExtensionPoint::DebugTools,
            Contribution::AnalysisTool(_) => ExtensionPoint::AnalysisTools,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Contribution {
    /// Driver with only its required fields set
    pub fn driver(id: &str, name: &str, protocol: &str) -> Self {
        Contribution::Driver(DriverContribution {
            id: id.to_string(),
            name: name.to_string(),
            protocol: protocol.to_string(),
            description: None,
            icon: None,
            platforms: Vec::new(),
            config_schema: None,
            extra: Map::new(),
        })
    }

    /// Parser with only its required fields set
    pub fn parser(id: &str, name: &str) -> Self {
        Contribution::Parser(ParserContribution {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            template: None,
            supported_formats: Vec::new(),
            extra: Map::new(),
        })
    }

    /// Widget with only its required fields set
    pub fn widget(id: &str, name: &str, kind: WidgetKind) -> Self {
        Contribution::Widget(WidgetContribution {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            category: None,
            icon: None,
            supported_data_types: Vec::new(),
            config_schema: None,
            extra: Map::new(),
        })
    }

    /// Menu item with only its required fields set
    pub fn menu(id: &str, label: &str, command: &str) -> Self {
        Contribution::Menu(MenuContribution {
            id: id.to_string(),
            label: label.to_string(),
            command: command.to_string(),
            group: None,
            when: None,
            shortcut: None,
            extra: Map::new(),
        })
    }

    /// Theme with only its required fields set
    pub fn theme(id: &str, name: &str, kind: ThemeKind) -> Self {
        Contribution::Theme(ThemeContribution {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            path: None,
            colors: None,
            extra: Map::new(),
        })
    }
}
