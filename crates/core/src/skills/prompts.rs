//! Default system prompts bundled at compile time.

/// Requirement analyst - breaks a request into atomic steps
pub const DECOMPOSER: &str = include_str!("defaults/decomposer.md");

/// Tool mapper - picks one catalog action among retrieved candidates
pub const TOOL_MAPPER: &str = include_str!("defaults/tool_mapper.md");

/// Mermaid syntax expert - renders and repairs flowcharts
pub const DIAGRAM: &str = include_str!("defaults/diagram.md");

/// Flowchart syntax reference consulted when repairing a diagram
pub const MERMAID_SYNTAX: &str = include_str!("defaults/mermaid_syntax.md");

/// All default prompts with their stage ids
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("decomposer", DECOMPOSER),
        ("tool_mapper", TOOL_MAPPER),
        ("diagram", DIAGRAM),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prompts_non_empty() {
        for (slug, content) in all_defaults() {
            assert!(!content.is_empty(), "Prompt '{}' should not be empty", slug);
            assert!(content.len() > 50, "Prompt '{}' seems too short", slug);
        }
    }

    #[test]
    fn test_diagram_prompt_forbids_reserved_id() {
        assert!(DIAGRAM.contains("flowchart TD"));
        assert!(DIAGRAM.contains("Never use `end`"));
    }
}
