//! Prompt and context assembly.
//!
//! The exact strings here are part of the model contract: changing the
//! template, separator, or placeholders changes model behavior.

use crate::models::RetrievedChunk;

/// System prompt with `{context}` and `{history}` placeholders.
pub const SYSTEM_PROMPT_TEMPLATE: &str = "You are NerdsIQ, a helpful AI assistant for NerdsToGo staff.
Answer questions based on the provided context from company documents.
If the context doesn't contain relevant information, say so clearly but still try to be helpful.
Always be professional, concise, and helpful.

Context from documents:
{context}

Previous conversation:
{history}
";

/// Context used when the search returned nothing.
pub const NO_DOCUMENTS: &str = "No relevant documents found.";

/// Placed between labeled chunks in the context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Messages sent to the language model for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

/// The context block plus the sources it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub context: String,
    /// Distinct non-blank source URLs in first-seen order.
    pub sources: Vec<String>,
}

/// Build the context block from search results.
///
/// Each chunk is rendered as `[From: <source name>]` followed by its text;
/// chunks are joined by [`CONTEXT_SEPARATOR`]. Blank and repeated URLs are
/// left out of `sources`.
pub fn assemble_context(results: &[RetrievedChunk]) -> AssembledContext {
    if results.is_empty() {
        return AssembledContext {
            context: NO_DOCUMENTS.to_string(),
            sources: Vec::new(),
        };
    }

    let mut parts = Vec::with_capacity(results.len());
    let mut sources: Vec<String> = Vec::new();

    for chunk in results {
        parts.push(format!("[From: {}]\n{}", chunk.source_name, chunk.text));
        if !chunk.source_url.is_empty() && !sources.contains(&chunk.source_url) {
            sources.push(chunk.source_url.clone());
        }
    }

    AssembledContext {
        context: parts.join(CONTEXT_SEPARATOR),
        sources,
    }
}

/// Fill `{name}` placeholders in one pass.
///
/// Substituted values are not rescanned, so retrieved text that happens
/// to contain `{history}` is left alone. Unknown placeholders are kept.
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Build the model prompt for one query.
pub fn build_prompt(context: &str, history: &str, question: &str) -> ChatPrompt {
    ChatPrompt {
        system: fill_template(
            SYSTEM_PROMPT_TEMPLATE,
            &[("context", context), ("history", history)],
        ),
        user: question.to_string(),
    }
}
