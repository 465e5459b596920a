//! Prompt assembly: grounding context, citation markers, history, budget.

use std::fmt::Write;

use docent_index::store::ScoredChunk;
use docent_llm::provider::Message;

use crate::history::Turn;

const SYSTEM_TEMPLATE: &str = "\
You are a knowledgeable support specialist. You answer questions about the \
product using the documentation excerpts provided below.\n\
\n\
INSTRUCTIONS:\n\
- Answer using ONLY the provided context. If the context doesn't contain \
enough information to fully answer the question, say so clearly. Do not \
fabricate information.\n\
- Cite the context sections you used with bracketed markers like [1] or \
[2], matching the section numbers below. Only cite sections that actually \
support your answer.\n\
- Be precise when referencing features, API endpoints, or limits.\n\
- Keep answers concise but thorough.\n\
\n\
CONTEXT FROM DOCUMENTATION:\n";

/// A source reference surfaced with the answer. Markers match the `[n]`
/// tags in the assembled context and are reassigned fresh on every query.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub marker: usize,
    pub chunk_id: String,
    pub title: String,
    pub source: String,
    pub score: f32,
}

/// Everything the generation step needs: the message list, the citations
/// the markers map to, and whether context was dropped to fit the budget.
#[derive(Debug)]
pub struct PromptPayload {
    pub messages: Vec<Message>,
    pub citations: Vec<Citation>,
    pub truncated: bool,
}

/// Assembler configuration.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Estimated-token budget for the assembled system prompt.
    pub context_budget_tokens: usize,
    /// Conversation turns included in the message list.
    pub history_turns: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            context_budget_tokens: 2400,
            history_turns: 5,
        }
    }
}

/// Merge retrieved chunks and history into a structured prompt.
///
/// Chunks arrive ordered by score. Near-duplicates (same document,
/// adjacent or identical positions, where the overlap window makes the
/// texts redundant) collapse to the highest-scoring one. If the rendered
/// context would exceed the budget, the lowest-scoring chunks are dropped
/// first and `truncated` is set.
#[must_use]
pub fn assemble(
    question: &str,
    hits: &[ScoredChunk],
    history: &[&Turn],
    config: &AssemblerConfig,
) -> PromptPayload {
    let mut kept = dedup(hits);
    let mut truncated = false;

    while kept.len() > 1 && rendered_tokens(&kept) > config.context_budget_tokens {
        kept.pop();
        truncated = true;
    }
    if truncated {
        tracing::warn!(kept = kept.len(), "context truncated to fit budget");
    }

    let citations: Vec<Citation> = kept
        .iter()
        .enumerate()
        .map(|(i, hit)| Citation {
            marker: i + 1,
            chunk_id: hit.meta.chunk_id.clone(),
            title: hit.meta.title.clone(),
            source: hit.meta.source.clone(),
            score: hit.score,
        })
        .collect();

    let mut messages = Vec::with_capacity(config.history_turns * 2 + 2);
    messages.push(Message::system(render_system(&kept)));

    let skip = history.len().saturating_sub(config.history_turns);
    for turn in &history[skip..] {
        messages.push(Message::user(turn.question.clone()));
        messages.push(Message::assistant(turn.answer.clone()));
    }
    messages.push(Message::user(question));

    PromptPayload {
        messages,
        citations,
        truncated,
    }
}

/// Whitespace-delimited word count as a cheap token estimate.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Same document + same or adjacent chunk position means the texts share
/// an overlap window; keep only the best-scoring of such a pair. Disjoint
/// spans from one document both stay.
fn dedup(hits: &[ScoredChunk]) -> Vec<ScoredChunk> {
    let mut kept: Vec<ScoredChunk> = Vec::with_capacity(hits.len());
    for hit in hits {
        let redundant = kept.iter().any(|k| {
            k.meta.doc_id == hit.meta.doc_id && k.meta.position.abs_diff(hit.meta.position) <= 1
        });
        if !redundant {
            kept.push(hit.clone());
        }
    }
    kept
}

fn rendered_tokens(kept: &[ScoredChunk]) -> usize {
    estimate_tokens(SYSTEM_TEMPLATE) + kept.iter().map(|h| estimate_tokens(&h.meta.text) + 8).sum::<usize>()
}

fn render_system(kept: &[ScoredChunk]) -> String {
    let mut out = String::from(SYSTEM_TEMPLATE);
    if kept.is_empty() {
        out.push_str("(no relevant documentation found)\n");
        return out;
    }
    for (i, hit) in kept.iter().enumerate() {
        let _ = write!(out, "\n[{}] {}\n{}\n", i + 1, hit.meta.title, hit.meta.text);
        if i + 1 < kept.len() {
            out.push_str("\n---\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_index::store::ChunkMeta;
    use docent_llm::provider::Role;

    fn hit(doc_id: &str, position: usize, score: f32, text: &str) -> ScoredChunk {
        ScoredChunk {
            meta: ChunkMeta {
                chunk_id: format!("{doc_id}_{position}"),
                doc_id: doc_id.into(),
                title: doc_id.to_uppercase(),
                category: "General".into(),
                source: format!("{doc_id}.md"),
                position,
                text: text.into(),
            },
            score,
        }
    }

    fn turn(q: &str, a: &str) -> Turn {
        Turn {
            question: q.into(),
            answer: a.into(),
            citations: Vec::new(),
        }
    }

    #[test]
    fn markers_assigned_in_score_order() {
        let hits = vec![
            hit("refunds", 0, 0.9, "Refunds settle in 5-10 days."),
            hit("disputes", 2, 0.7, "Disputes have an evidence window."),
        ];
        let payload = assemble("q", &hits, &[], &AssemblerConfig::default());

        assert_eq!(payload.citations.len(), 2);
        assert_eq!(payload.citations[0].marker, 1);
        assert_eq!(payload.citations[0].chunk_id, "refunds_0");
        assert_eq!(payload.citations[1].marker, 2);
        assert!(!payload.truncated);
    }

    #[test]
    fn system_prompt_contains_tagged_chunks() {
        let hits = vec![hit("refunds", 0, 0.9, "Refunds settle in 5-10 days.")];
        let payload = assemble("q", &hits, &[], &AssemblerConfig::default());

        let system = &payload.messages[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("[1] REFUNDS"));
        assert!(system.content.contains("Refunds settle in 5-10 days."));
        assert!(system.content.contains("ONLY the provided context"));
    }

    #[test]
    fn adjacent_chunks_from_same_doc_collapse() {
        let hits = vec![
            hit("refunds", 1, 0.9, "Overlapping slice A."),
            hit("refunds", 2, 0.8, "Overlapping slice B."),
            hit("refunds", 5, 0.6, "A disjoint later section."),
        ];
        let payload = assemble("q", &hits, &[], &AssemblerConfig::default());

        let ids: Vec<&str> = payload
            .citations
            .iter()
            .map(|c| c.chunk_id.as_str())
            .collect();
        assert_eq!(ids, vec!["refunds_1", "refunds_5"]);
    }

    #[test]
    fn budget_drops_lowest_score_first_and_flags() {
        let long = "word ".repeat(300);
        let hits = vec![
            hit("a", 0, 0.9, &long),
            hit("b", 0, 0.8, &long),
            hit("c", 0, 0.7, &long),
        ];
        let config = AssemblerConfig {
            context_budget_tokens: 800,
            history_turns: 5,
        };
        let payload = assemble("q", &hits, &[], &config);

        assert!(payload.truncated);
        assert_eq!(payload.citations.len(), 2);
        assert_eq!(payload.citations[0].chunk_id, "a_0");
        assert_eq!(payload.citations[1].chunk_id, "b_0");
        assert!(estimate_tokens(&payload.messages[0].content) <= 800 + 20);
    }

    #[test]
    fn markers_renumbered_after_truncation() {
        let long = "word ".repeat(300);
        let hits = vec![hit("a", 0, 0.9, &long), hit("b", 0, 0.8, &long)];
        let config = AssemblerConfig {
            context_budget_tokens: 400,
            history_turns: 5,
        };
        let payload = assemble("q", &hits, &[], &config);

        assert_eq!(payload.citations.len(), 1);
        assert_eq!(payload.citations[0].marker, 1);
    }

    #[test]
    fn history_bounded_and_ordered() {
        let turns: Vec<Turn> = (0..4)
            .map(|i| turn(&format!("q{i}"), &format!("a{i}")))
            .collect();
        let refs: Vec<&Turn> = turns.iter().collect();
        let config = AssemblerConfig {
            history_turns: 2,
            ..AssemblerConfig::default()
        };
        let payload = assemble("current", &[], &refs, &config);

        // system + 2 turns * 2 messages + question
        assert_eq!(payload.messages.len(), 6);
        assert_eq!(payload.messages[1].content, "q2");
        assert_eq!(payload.messages[2].content, "a2");
        assert_eq!(payload.messages[5].content, "current");
    }

    #[test]
    fn no_hits_yields_no_citations() {
        let payload = assemble("q", &[], &[], &AssemblerConfig::default());
        assert!(payload.citations.is_empty());
        assert!(payload.messages[0].content.contains("no relevant documentation"));
    }

    #[test]
    fn estimate_tokens_counts_words() {
        assert_eq!(estimate_tokens("Hello world"), 2);
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one"), 1);
    }
}
