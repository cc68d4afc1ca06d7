//! Catalog entries and the platforms they belong to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Automation platform an action belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    PowerAutomate,
    AutomationAnywhere,
    #[serde(rename = "uipath")]
    UiPath,
}

impl Platform {
    pub fn all() -> &'static [Platform] {
        &[
            Platform::PowerAutomate,
            Platform::AutomationAnywhere,
            Platform::UiPath,
        ]
    }

    /// Human-readable name, as used in the catalog's `Tool:` line
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::PowerAutomate => "Power Automate",
            Platform::AutomationAnywhere => "Automation Anywhere",
            Platform::UiPath => "UiPath",
        }
    }

    /// Stable wire identifier
    pub fn slug(&self) -> &'static str {
        match self {
            Platform::PowerAutomate => "power_automate",
            Platform::AutomationAnywhere => "automation_anywhere",
            Platform::UiPath => "uipath",
        }
    }

    /// Parse an optional request hint. Blank and `any` mean unconstrained.
    pub fn parse_hint(hint: Option<&str>) -> Result<Option<Platform>, String> {
        match hint.map(str::trim) {
            None | Some("") => Ok(None),
            Some(h) if h.eq_ignore_ascii_case("any") || h.eq_ignore_ascii_case("all") => Ok(None),
            Some(h) => h.parse().map(Some),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "powerautomate" | "pa" | "powerautomatedesktop" => Ok(Platform::PowerAutomate),
            "automationanywhere" | "aa" => Ok(Platform::AutomationAnywhere),
            "uipath" => Ok(Platform::UiPath),
            _ => Err(format!(
                "Unknown platform: {}. Valid options: power_automate, automation_anywhere, uipath",
                s
            )),
        }
    }
}

/// One action in the curated catalog. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub id: String,
    pub platform: Platform,
    pub title: String,
    pub description: String,
    /// Parameter name -> type (or short description when the type is unknown)
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl ActionDescriptor {
    /// Text that was embedded for this action
    pub fn document_text(&self) -> String {
        document_text(
            self.platform.display_name(),
            &self.title,
            &self.description,
            self.parameters.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }

    pub fn summary(&self, similarity: f32) -> ActionSummary {
        ActionSummary {
            id: self.id.clone(),
            platform: self.platform,
            title: self.title.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            similarity,
        }
    }
}

/// Build the catalog document for an action:
///
/// ```text
/// Tool: Power Automate
/// Action: Send email
/// Description: Sends an email message
/// Parameter: To - Recipient address
/// ```
pub fn document_text<'a>(
    tool: &str,
    action: &str,
    description: &str,
    parameters: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut content = format!(
        "Tool: {}\nAction: {}\nDescription: {}",
        tool, action, description
    );
    for (name, detail) in parameters {
        content.push_str(&format!("\nParameter: {} - {}", name, detail));
    }
    content
}

/// Search result shape: a descriptor without its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub id: String,
    pub platform: Platform,
    pub title: String,
    pub description: String,
    pub parameters: BTreeMap<String, String>,
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parsing_accepts_tool_choice_strings() {
        assert_eq!("power_automate".parse::<Platform>(), Ok(Platform::PowerAutomate));
        assert_eq!(
            "Automation Anywhere".parse::<Platform>(),
            Ok(Platform::AutomationAnywhere)
        );
        assert_eq!("UiPath".parse::<Platform>(), Ok(Platform::UiPath));
        assert_eq!("ui-path".parse::<Platform>(), Ok(Platform::UiPath));
        assert!("blue_prism".parse::<Platform>().is_err());
    }

    #[test]
    fn test_hint_any_is_unconstrained() {
        assert_eq!(Platform::parse_hint(None), Ok(None));
        assert_eq!(Platform::parse_hint(Some("  ")), Ok(None));
        assert_eq!(Platform::parse_hint(Some("ANY")), Ok(None));
        assert_eq!(
            Platform::parse_hint(Some("uipath")),
            Ok(Some(Platform::UiPath))
        );
    }

    #[test]
    fn test_serde_slugs() {
        assert_eq!(
            serde_json::to_string(&Platform::UiPath).unwrap(),
            "\"uipath\""
        );
        assert_eq!(
            serde_json::to_string(&Platform::AutomationAnywhere).unwrap(),
            "\"automation_anywhere\""
        );
        for platform in Platform::all() {
            assert_eq!(platform.slug().parse::<Platform>(), Ok(*platform));
        }
    }

    #[test]
    fn test_document_text_layout() {
        let mut parameters = BTreeMap::new();
        parameters.insert("To".to_string(), "Recipient address".to_string());
        let descriptor = ActionDescriptor {
            id: "power_automate:send-email".into(),
            platform: Platform::PowerAutomate,
            title: "Send email".into(),
            description: "Sends an email message".into(),
            parameters,
            embedding: vec![],
        };
        assert_eq!(
            descriptor.document_text(),
            "Tool: Power Automate\nAction: Send email\nDescription: Sends an email message\nParameter: To - Recipient address"
        );
    }
}
