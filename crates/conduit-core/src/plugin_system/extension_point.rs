use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::plugin_system::error::PluginSystemError;

/// The closed set of categories a plugin may contribute to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtensionPoint {
    #[serde(rename = "communication.drivers")]
    CommunicationDrivers,
    #[serde(rename = "data.parsers")]
    DataParsers,
    #[serde(rename = "data.validators")]
    DataValidators,
    #[serde(rename = "data.transformers")]
    DataTransformers,
    #[serde(rename = "visualization.widgets")]
    VisualizationWidgets,
    #[serde(rename = "visualization.renderers")]
    ChartRenderers,
    #[serde(rename = "export.formats")]
    ExportFormats,
    #[serde(rename = "export.processors")]
    ExportProcessors,
    #[serde(rename = "ui.menus")]
    Menus,
    #[serde(rename = "ui.toolbars")]
    Toolbars,
    #[serde(rename = "ui.settings")]
    SettingsPages,
    #[serde(rename = "ui.themes")]
    Themes,
    #[serde(rename = "ui.iconThemes")]
    IconThemes,
    #[serde(rename = "tools.debug")]
    DebugTools,
    #[serde(rename = "tools.analysis")]
    AnalysisTools,
}

impl ExtensionPoint {
    /// Every extension point, in manifest declaration order.
    pub const ALL: [ExtensionPoint; 15] = [
        ExtensionPoint::CommunicationDrivers,
        ExtensionPoint::DataParsers,
        ExtensionPoint::DataValidators,
        ExtensionPoint::DataTransformers,
        ExtensionPoint::VisualizationWidgets,
        ExtensionPoint::ChartRenderers,
        ExtensionPoint::ExportFormats,
        ExtensionPoint::ExportProcessors,
        ExtensionPoint::Menus,
        ExtensionPoint::Toolbars,
        ExtensionPoint::SettingsPages,
        ExtensionPoint::Themes,
        ExtensionPoint::IconThemes,
        ExtensionPoint::DebugTools,
        ExtensionPoint::AnalysisTools,
    ];

    /// Dotted identifier, e.g. `communication.drivers`
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionPoint::CommunicationDrivers => "communication.drivers",
            ExtensionPoint::DataParsers => "data.parsers",
            ExtensionPoint::DataValidators => "data.validators",
            ExtensionPoint::DataTransformers => "data.transformers",
            ExtensionPoint::VisualizationWidgets => "visualization.widgets",
            ExtensionPoint::ChartRenderers => "visualization.renderers",
            ExtensionPoint::ExportFormats => "export.formats",
            ExtensionPoint::ExportProcessors => "export.processors",
            ExtensionPoint::Menus => "ui.menus",
            ExtensionPoint::Toolbars => "ui.toolbars",
            ExtensionPoint::SettingsPages => "ui.settings",
            ExtensionPoint::Themes => "ui.themes",
            ExtensionPoint::IconThemes => "ui.iconThemes",
            ExtensionPoint::DebugTools => "tools.debug",
            ExtensionPoint::AnalysisTools => "tools.analysis",
        }
    }

    /// Key of the matching array inside a manifest's `contributes` object
    pub fn contributes_key(&self) -> &'static str {
        match self {
            ExtensionPoint::CommunicationDrivers => "drivers",
            ExtensionPoint::DataParsers => "parsers",
            ExtensionPoint::DataValidators => "validators",
            ExtensionPoint::DataTransformers => "transformers",
            ExtensionPoint::VisualizationWidgets => "widgets",
            ExtensionPoint::ChartRenderers => "renderers",
            ExtensionPoint::ExportFormats => "exportFormats",
            ExtensionPoint::ExportProcessors => "exportProcessors",
            ExtensionPoint::Menus => "menus",
            ExtensionPoint::Toolbars => "toolbars",
            ExtensionPoint::SettingsPages => "settings",
            ExtensionPoint::Themes => "themes",
            ExtensionPoint::IconThemes => "iconThemes",
            ExtensionPoint::DebugTools => "debugTools",
            ExtensionPoint::AnalysisTools => "analysisTools",
        }
    }

    /// Singular label used in validation messages
    pub fn label(&self) -> &'static str {
        match self {
            ExtensionPoint::CommunicationDrivers => "Driver",
            ExtensionPoint::DataParsers => "Parser",
            ExtensionPoint::DataValidators => "Validator",
            ExtensionPoint::DataTransformers => "Transformer",
            ExtensionPoint::VisualizationWidgets => "Widget",
            ExtensionPoint::ChartRenderers => "Renderer",
            ExtensionPoint::ExportFormats => "Export format",
            ExtensionPoint::ExportProcessors => "Export processor",
            ExtensionPoint::Menus => "Menu",
            ExtensionPoint::Toolbars => "Toolbar",
            ExtensionPoint::SettingsPages => "Settings",
            ExtensionPoint::Themes => "Theme",
            ExtensionPoint::IconThemes => "Icon theme",
            ExtensionPoint::DebugTools => "Debug tool",
            ExtensionPoint::AnalysisTools => "Analysis tool",
        }
    }

    /// Whether a module declaring contributions here must export a collection of the same name
    pub fn requires_module_export(&self) -> bool {
        matches!(
            self,
            ExtensionPoint::CommunicationDrivers
                | ExtensionPoint::DataParsers
                | ExtensionPoint::VisualizationWidgets
        )
    }

    pub fn from_contributes_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|point| point.contributes_key() == key)
    }
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtensionPoint {
    type Err = PluginSystemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|point| point.as_str() == s)
            .ok_or_else(|| PluginSystemError::UnknownExtensionPoint(s.to_string()))
    }
}
