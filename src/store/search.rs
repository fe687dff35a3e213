//! Full-text-style retrieval over `name + notes + accept`: simple
//! whitespace/punctuation tokenization, term-frequency scoring, no
//! external index. Good enough for a local plan store; not a
//! replacement for a real search engine.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

use super::PlanStore;
use crate::cache::SimpleFilter;
use crate::error::Result;

/// Common English filler words excluded from the keyword cloud so it
/// surfaces actual subject matter instead of "the"/"and"/"for".
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "from", "into", "when", "then", "than",
        "have", "has", "had", "are", "was", "were", "will", "would", "should", "could", "can",
        "not", "but", "all", "any", "its", "our", "you", "your",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub score: f64,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_lowercase())
        .collect()
}

pub async fn search(store: &PlanStore, query: &str, k: usize) -> Result<Vec<SearchHit>> {
    let terms = tokenize(query);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let tickets = store
        .list_tickets_filtered(&SimpleFilter::default())
        .await?;

    let mut hits = Vec::new();
    for ticket in &tickets {
        let mut haystack = tokenize(&ticket.name);
        if let Some(notes) = &ticket.notes {
            haystack.extend(tokenize(notes));
        }
        if let Some(accept) = &ticket.accept {
            haystack.extend(tokenize(accept));
        }
        if haystack.is_empty() {
            continue;
        }

        let mut freq: HashMap<&str, usize> = HashMap::new();
        for tok in &haystack {
            *freq.entry(tok.as_str()).or_insert(0) += 1;
        }

        let score: f64 = terms
            .iter()
            .map(|t| *freq.get(t.as_str()).unwrap_or(&0) as f64)
            .sum();

        if score > 0.0 {
            hits.push(SearchHit {
                id: ticket.id.clone(),
                name: ticket.name.clone(),
                score: score / haystack.len() as f64,
            });
        }
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k);
    Ok(hits)
}

/// Top terms across all ticket names, for a dashboard word cloud.
/// Returns `(term, count)` pairs sorted by descending count.
pub async fn keyword_cloud(store: &PlanStore, top_n: usize) -> Result<Vec<(String, usize)>> {
    let tickets = store
        .list_tickets_filtered(&SimpleFilter::default())
        .await?;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for ticket in &tickets {
        for tok in tokenize(&ticket.name) {
            if tok.len() < 3 || STOPWORDS.contains(tok.as_str()) {
                continue;
            }
            *counts.entry(tok).or_insert(0) += 1;
        }
    }

    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.truncate(top_n);
    Ok(pairs)
}
