//! Keyword table for cheap tool detection from free text.
//!
//! Detection is a hint for the prompt, not a routing decision: the engine's
//! own reply decides which tool actually runs.

use std::collections::HashMap;

use serde::Deserialize;

/// Natural-language synonyms for well-known tools.
const BUILTIN_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "brave_web_search",
        &[
            "search the web",
            "web search",
            "search online",
            "look up",
            "find information about",
        ],
    ),
    (
        "brave_local_search",
        &[
            "find nearby",
            "search near me",
            "local",
            "around here",
            "in the area",
        ],
    ),
    (
        "generate_image",
        &[
            "create image",
            "make image",
            "draw",
            "create picture",
            "generate picture",
        ],
    ),
    (
        "send_email",
        &["send mail", "email to", "mail to", "compose email"],
    ),
    (
        "search_drive",
        &["find file", "look for file", "search files"],
    ),
    (
        "search_email",
        &["find email", "look for email", "search mail"],
    ),
];

/// Tool name → extra keywords. Editable from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct KeywordTable {
    synonyms: HashMap<String, Vec<String>>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        let synonyms = BUILTIN_SYNONYMS
            .iter()
            .map(|(tool, words)| {
                let words = words.iter().map(|w| w.to_string()).collect();
                (tool.to_string(), words)
            })
            .collect();
        Self { synonyms }
    }
}

impl KeywordTable {
    /// A table with no synonyms; tools match on their own names only.
    pub fn empty() -> Self {
        Self {
            synonyms: HashMap::new(),
        }
    }

    /// Replace the synonyms for one tool.
    pub fn with_synonyms(
        mut self,
        tool: impl Into<String>,
        words: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.synonyms
            .insert(tool.into(), words.into_iter().map(Into::into).collect());
        self
    }

    /// Merge `other` over this table; its entries win.
    pub fn extend(&mut self, other: KeywordTable) {
        self.synonyms.extend(other.synonyms);
    }

    /// All keywords for a tool, lower-cased: the name itself, the name with
    /// underscores as spaces, then the synonyms.
    pub fn keywords_for(&self, tool: &str) -> Vec<String> {
        let name = tool.to_lowercase();
        let spaced = name.replace('_', " ");
        let mut keywords = vec![name.clone()];
        if spaced != name {
            keywords.push(spaced);
        }
        if let Some(words) = self.synonyms.get(tool) {
            keywords.extend(words.iter().map(|w| w.to_lowercase()));
        }
        keywords
    }

    /// First tool, in iteration order, whose keywords match `text`.
    pub fn detect<'a>(
        &self,
        text: &str,
        tools: impl IntoIterator<Item = &'a str>,
    ) -> Option<&'a str> {
        let text = text.to_lowercase();
        tools.into_iter().find(|tool| {
            self.keywords_for(tool)
                .iter()
                .any(|keyword| matches_keyword(&text, keyword))
        })
    }
}

/// A multi-word keyword matches when every word appears somewhere in the text.
fn matches_keyword(text: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        keyword.split_whitespace().all(|word| text.contains(word))
    } else {
        text.contains(keyword)
    }
}
