//! Template renderer: `{name}` placeholder substitution for subject and content.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// A `{key}` placeholder. Keys may hold any character except braces.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"));

/// Subject and content after variable substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub content: String,
}

pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn render_message(
        subject: &str,
        content: &str,
        variables: &HashMap<String, String>,
    ) -> RenderedMessage {
        RenderedMessage {
            subject: Self::render(subject, variables),
            content: Self::render(content, variables),
        }
    }

    /// Replace every `{key}` whose key is in `variables`.
    ///
    /// Unknown placeholders stay as literal text. Substituted values are not
    /// scanned again, so a value containing `{other}` is emitted verbatim.
    pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
        if variables.is_empty() {
            return template.to_string();
        }

        PLACEHOLDER
            .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    tracing::debug!(variable = &caps[1], "Template variable not provided, left as is");
                    caps[0].to_string()
                }
            })
            .into_owned()
    }
}
