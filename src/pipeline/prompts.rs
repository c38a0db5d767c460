//! Prompt templates for the two LLM calls of a turn.

use anyhow::Result;

use crate::models::Passage;

const PERSONA: &str = "Rolul tău:\n\
Ești un expert cu peste 30 de ani de experiență practică în legislația muncii și dreptul muncii din România. \
Răspunzi exclusiv în limba română, oferind informații clare, precise și detaliate, adaptate la contextul specific. \
Include exemple practice atunci când este relevant. \
NU răspunzi la întrebări în afara Codului Muncii din România.";

/// A text template with `{name}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    template: &'static str,
}

/// Rewrites the latest message as a self-contained question.
pub const STANDALONE_QUESTION: PromptTemplate = PromptTemplate {
    template: concat!(
        "{persona}\n\n",
        "Acesta este istoricul conversației și întrebarea următoare:\n",
        "------------\n",
        "ISTORIC CONVERSAȚIE: {chatHistory}\n",
        "------------\n",
        "ÎNTREBARE URMĂTOARE: {question}\n",
        "------------\n",
        "Te rog să reformulezi întrebarea următoare ca o întrebare completă care poate fi înțeleasă independent. ",
        "Răspunde doar cu întrebarea reformulată:"
    ),
};

/// Answers the standalone question from retrieved passages.
pub const ANSWER: PromptTemplate = PromptTemplate {
    template: concat!(
        "{persona}\n\n",
        "Acesta este istoricul conversației și întrebarea, împreună cu contextul relevant:\n",
        "------------\n",
        "CONTEXT: {retrievedContext}\n",
        "------------\n",
        "ISTORIC CONVERSAȚIE: {chatHistory}\n",
        "------------\n",
        "ÎNTREBARE: {question}\n",
        "------------\n",
        "Te rog să răspunzi în detaliu, bazându-te pe articolele din context și citându-le atunci când este posibil:"
    ),
};

impl PromptTemplate {
    pub const fn new(template: &'static str) -> Self {
        Self { template }
    }

    /// Substitute every `{name}` with its value. `{persona}` is always bound.
    ///
    /// Values are inserted verbatim; braces inside them are not expanded.
    /// A placeholder with no binding is an error.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String> {
        let mut out = String::with_capacity(self.template.len() + 256);
        let mut rest = self.template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return Ok(out);
            };
            let name = &after[..close];
            if !is_placeholder_name(name) {
                out.push('{');
                rest = after;
                continue;
            }
            let value = if name == "persona" {
                PERSONA
            } else {
                vars.iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| anyhow::anyhow!("Missing prompt variable: {name}"))?
            };
            out.push_str(value);
            rest = &after[close + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Join passage texts into one context block.
pub fn format_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| sanitize_for_prompt(&p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Strip chat-template control tokens that could hijack the prompt.
pub fn sanitize_for_prompt(text: &str) -> String {
    const CONTROL_TOKENS: [&str; 4] = ["<|im_start|>", "<|im_end|>", "<|endoftext|>", "<|eot_id|>"];
    let mut out = text.to_string();
    for token in CONTROL_TOKENS {
        if out.contains(token) {
            out = out.replace(token, "");
        }
    }
    out
}
