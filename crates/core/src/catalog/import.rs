//! Offline import of scraped action exports into catalog descriptors.
//!
//! Accepts the JSON arrays written by the documentation scrapers, e.g.
//!
//! ```json
//! [{"tool": "Power Automate", "action": "Send email",
//!   "description": "...", "parameters": [{"name": "To", "description": "..."}]}]
//! ```
//!
//! Automation Anywhere exports use `"Input parameters"` with capitalised
//! column names; both shapes are read.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use super::descriptor::{document_text, ActionDescriptor, Platform};
use super::embedding::Embedder;
use crate::error::IndexError;

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapedParameter {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Description")]
    pub description: String,
    #[serde(default, rename = "type", alias = "Type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapedAction {
    #[serde(default)]
    pub tool: Option<String>,
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "Input parameters")]
    pub parameters: Vec<ScrapedParameter>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Parse a scraper export
pub fn parse_export(raw: &str) -> anyhow::Result<Vec<ScrapedAction>> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("Invalid action export: {}", e))
}

/// `Send  Email (SMTP)` -> `send-email-smtp`
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Convert and embed scraped actions for `platform`.
///
/// Entries with a blank action name or an id already produced earlier in the
/// export are skipped with a warning.
pub async fn import_actions(
    actions: Vec<ScrapedAction>,
    platform: Platform,
    embedder: &dyn Embedder,
) -> Result<Vec<ActionDescriptor>, IndexError> {
    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(actions.len());

    for action in actions {
        let title = action.action.trim().to_string();
        let slug = slugify(&title);
        if slug.is_empty() {
            tracing::warn!(url = ?action.url, "Skipping scraped action with no name");
            continue;
        }
        let id = format!("{}:{}", platform.slug(), slug);
        if !seen.insert(id.clone()) {
            tracing::warn!(%id, "Skipping duplicate scraped action");
            continue;
        }

        let tool = action
            .tool
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(platform.display_name());
        let text = document_text(
            tool,
            &title,
            action.description.trim(),
            action
                .parameters
                .iter()
                .map(|p| (p.name.as_str(), p.description.as_str())),
        );
        let embedding = embedder.embed(&text).await?;

        let parameters: BTreeMap<String, String> = action
            .parameters
            .into_iter()
            .filter(|p| !p.name.trim().is_empty())
            .map(|p| {
                let detail = p
                    .kind
                    .filter(|k| !k.trim().is_empty())
                    .unwrap_or(p.description);
                (p.name.trim().to_string(), detail)
            })
            .collect();

        descriptors.push(ActionDescriptor {
            id,
            platform,
            title,
            description: action.description.trim().to_string(),
            parameters,
            embedding,
        });
    }

    tracing::info!(
        platform = %platform,
        imported = descriptors.len(),
        "Imported scraped actions"
    );
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::embedding::HashingEmbedder;
    use tokio_test::{assert_err, assert_ok};

    const EXPORT: &str = r#"[
        {"tool": "Power Automate", "action": "Send email", "description": "Sends an email",
         "parameters": [{"name": "To", "description": "Recipients"}, {"name": "Subject", "description": "Subject line", "type": "Text"}]},
        {"tool": "Power Automate", "action": "Send Email", "description": "duplicate"},
        {"action": "   ", "description": "nameless"},
        {"tool": "Automation Anywhere", "action": "Open spreadsheet", "description": "Opens a workbook",
         "Input parameters": [{"Name": "File path", "Type": "String", "Description": "Workbook location"}]}
    ]"#;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Send  Email (SMTP)"), "send-email-smtp");
        assert_eq!(slugify("  "), "");
    }

    #[test]
    fn test_import_skips_blank_and_duplicate_entries() {
        tokio_test::block_on(async {
            let embedder = HashingEmbedder::new(64);
            let actions = assert_ok!(parse_export(EXPORT));
            let descriptors =
                assert_ok!(import_actions(actions, Platform::PowerAutomate, &embedder).await);

            assert_eq!(descriptors.len(), 2);
            assert_eq!(descriptors[0].id, "power_automate:send-email");
            assert_eq!(descriptors[0].parameters.get("To").map(String::as_str), Some("Recipients"));
            assert_eq!(descriptors[0].parameters.get("Subject").map(String::as_str), Some("Text"));
            assert_eq!(descriptors[0].embedding.len(), 64);
            assert_eq!(descriptors[1].parameters.get("File path").map(String::as_str), Some("String"));
        });
    }

    #[test]
    fn test_embedding_uses_document_text() {
        tokio_test::block_on(async {
            let embedder = HashingEmbedder::new(128);
            let actions = assert_ok!(parse_export(EXPORT));
            let descriptors =
                assert_ok!(import_actions(actions, Platform::PowerAutomate, &embedder).await);
            let expected = embedder.vectorize(
                "Tool: Power Automate\nAction: Send email\nDescription: Sends an email\nParameter: To - Recipients\nParameter: Subject - Subject line",
            );
            assert_eq!(descriptors[0].embedding, expected);
        });
    }

    #[test]
    fn test_rejects_non_array_export() {
        assert_err!(parse_export(r#"{"action": "x"}"#));
    }
}
