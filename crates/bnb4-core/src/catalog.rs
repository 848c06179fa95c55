//! Static catalog of convertible models.
//!
//! The catalog is built once at startup and handed to the UI layer; it is
//! never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Whether a model consumes images and text, or text only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Vision,
    Text,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Vision => "vision",
            Modality::Text => "text",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One model the user can pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub display_name: String,
    /// Repository id or URL. Empty for the custom entry.
    pub source: String,
    pub modality: Modality,
    /// Parameter-count label such as "7B".
    pub params: String,
    pub description: String,
}

impl CatalogEntry {
    fn new(display_name: &str, source: &str, modality: Modality, params: &str, description: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            source: source.to_string(),
            modality,
            params: params.to_string(),
            description: description.to_string(),
        }
    }

    /// Whether the user has to type the source themselves.
    pub fn is_custom(&self) -> bool {
        self.source.is_empty()
    }
}

/// A named group of entries, shown as a header in the model picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogGroup {
    pub name: String,
    pub entries: Vec<CatalogEntry>,
}

const HEADER_PREFIX: &str = "--- ";
const HEADER_SUFFIX: &str = " ---";
const ENTRY_INDENT: &str = "  ";

/// Read-only model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    groups: Vec<CatalogGroup>,
}

impl ModelCatalog {
    /// Build a catalog from explicit groups.
    pub fn new(groups: Vec<CatalogGroup>) -> Self {
        Self { groups }
    }

    /// The catalog shipped with the application.
    pub fn builtin() -> Self {
        use Modality::{Text, Vision};

        Self::new(vec![
            CatalogGroup {
                name: "Vision-Language models".to_string(),
                entries: vec![
                    CatalogEntry::new(
                        "NuMarkdown-8B-Thinking",
                        "numind/NuMarkdown-8B-Thinking",
                        Vision,
                        "8B",
                        "OCR model with reasoning tokens for document conversion",
                    ),
                    CatalogEntry::new(
                        "Qwen2.5-VL-7B-Instruct",
                        "Qwen/Qwen2.5-VL-7B-Instruct",
                        Vision,
                        "7B",
                        "Multimodal model from Alibaba",
                    ),
                    CatalogEntry::new(
                        "MiniCPM-V-4_5",
                        "openbmb/MiniCPM-V-4_5",
                        Vision,
                        "8B",
                        "High-performance VL model",
                    ),
                    CatalogEntry::new(
                        "GLM-4V-9B",
                        "THUDM/glm-4v-9b",
                        Vision,
                        "9B",
                        "Visual language model from THUDM",
                    ),
                    CatalogEntry::new(
                        "InternVL2-8B",
                        "OpenGVLab/InternVL2-8B",
                        Vision,
                        "8B",
                        "Advanced VL model from OpenGVLab",
                    ),
                ],
            },
            CatalogGroup {
                name: "Translation models".to_string(),
                entries: vec![
                    CatalogEntry::new(
                        "Hunyuan-MT-7B",
                        "tencent/Hunyuan-MT-7B",
                        Text,
                        "7B",
                        "Tencent translator for 33 languages",
                    ),
                    CatalogEntry::new(
                        "Hunyuan-MT-Chimera-7B",
                        "tencent/Hunyuan-MT-Chimera-7B",
                        Text,
                        "7B",
                        "Ensemble translation model",
                    ),
                    CatalogEntry::new(
                        "NLLB-200-Distilled-600M",
                        "facebook/nllb-200-distilled-600M",
                        Text,
                        "600M",
                        "Multilingual translator from Meta",
                    ),
                    CatalogEntry::new(
                        "M2M100-12B",
                        "facebook/m2m100_12B",
                        Text,
                        "12B",
                        "Translator for 100+ languages",
                    ),
                ],
            },
            CatalogGroup {
                name: "LLM models".to_string(),
                entries: vec![
                    CatalogEntry::new(
                        "Qwen2.5-7B-Instruct",
                        "Qwen/Qwen2.5-7B-Instruct",
                        Text,
                        "7B",
                        "Qwen instruction model",
                    ),
                    CatalogEntry::new(
                        "Qwen2.5-14B-Instruct",
                        "Qwen/Qwen2.5-14B-Instruct",
                        Text,
                        "14B",
                        "Qwen 14B for complex tasks",
                    ),
                    CatalogEntry::new(
                        "Qwen2.5-32B-Instruct",
                        "Qwen/Qwen2.5-32B-Instruct",
                        Text,
                        "32B",
                        "Largest Qwen for consumer GPUs",
                    ),
                    CatalogEntry::new(
                        "Mistral-7B-Instruct-v0.3",
                        "mistralai/Mistral-7B-Instruct-v0.3",
                        Text,
                        "7B",
                        "Popular Mistral AI model",
                    ),
                    CatalogEntry::new(
                        "Llama-3.1-8B-Instruct",
                        "meta-llama/Llama-3.1-8B-Instruct",
                        Text,
                        "8B",
                        "Meta instruction model",
                    ),
                ],
            },
            CatalogGroup {
                name: "Custom".to_string(),
                entries: vec![CatalogEntry::new(
                    "Custom model",
                    "",
                    Vision,
                    "?",
                    "Enter the model URL manually",
                )],
            },
        ])
    }

    pub fn groups(&self) -> &[CatalogGroup] {
        &self.groups
    }

    /// All entries in display order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.groups.iter().flat_map(|group| group.entries.iter())
    }

    /// Look up an entry by display name.
    pub fn find(&self, display_name: &str) -> Option<&CatalogEntry> {
        let name = display_name.trim();
        self.entries().find(|entry| entry.display_name == name)
    }

    /// Labels for the model picker: one header per group followed by its
    /// indented entries.
    pub fn choice_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        for group in &self.groups {
            labels.push(format!("{HEADER_PREFIX}{}{HEADER_SUFFIX}", group.name));
            for entry in &group.entries {
                labels.push(format!("{ENTRY_INDENT}{}", entry.display_name));
            }
        }
        labels
    }

    /// Whether `label` is one of [`Self::choice_labels`].
    pub fn is_choice(&self, label: &str) -> bool {
        self.choice_labels().iter().any(|choice| choice == label)
    }

    /// Resolve a picker label to its entry. Group headers resolve to `None`.
    pub fn resolve_choice(&self, label: &str) -> Option<&CatalogEntry> {
        let trimmed = label.trim();
        if trimmed.is_empty() || trimmed.starts_with(HEADER_PREFIX.trim_end()) {
            return None;
        }
        self.find(trimmed)
    }

    /// Label of the first selectable entry.
    pub fn default_choice(&self) -> Option<String> {
        self.entries()
            .next()
            .map(|entry| format!("{ENTRY_INDENT}{}", entry.display_name))
    }

    /// One-line description shown under the picker.
    pub fn summary(entry: &CatalogEntry) -> String {
        format!(
            "{} parameters | {} | {}",
            entry.params, entry.modality, entry.description
        )
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_layout() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.groups().len(), 4);
        assert_eq!(catalog.entries().count(), 15);
        assert_eq!(catalog.entries().filter(|e| e.is_custom()).count(), 1);
    }

    #[test]
    fn test_choice_labels_have_headers_and_indented_entries() {
        let catalog = ModelCatalog::builtin();
        let labels = catalog.choice_labels();
        assert_eq!(labels[0], "--- Vision-Language models ---");
        assert_eq!(labels[1], "  NuMarkdown-8B-Thinking");
        assert_eq!(labels.len(), 15 + 4);
    }

    #[test]
    fn test_resolve_choice() {
        let catalog = ModelCatalog::builtin();
        let entry = catalog.resolve_choice("  Qwen2.5-7B-Instruct").unwrap();
        assert_eq!(entry.source, "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(entry.modality, Modality::Text);

        assert!(catalog.resolve_choice("--- LLM models ---").is_none());
        assert!(catalog.resolve_choice("  Unknown").is_none());
        assert!(catalog.resolve_choice("").is_none());
    }

    #[test]
    fn test_default_choice_is_first_entry() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(
            catalog.default_choice().as_deref(),
            Some("  NuMarkdown-8B-Thinking")
        );
        assert!(catalog.is_choice("  NuMarkdown-8B-Thinking"));
        assert!(!catalog.is_choice("NuMarkdown-8B-Thinking"));
    }

    #[test]
    fn test_summary() {
        let catalog = ModelCatalog::builtin();
        let entry = catalog.find("GLM-4V-9B").unwrap();
        assert_eq!(
            ModelCatalog::summary(entry),
            "9B parameters | vision | Visual language model from THUDM"
        );
    }
}
