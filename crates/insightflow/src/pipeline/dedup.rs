use crate::pipeline::fetch::ContentItem;
use crate::similarity::Similarity;

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub kept: Vec<ContentItem>,
    pub collapsed: usize,
}

/// Greedy near-duplicate collapse. Items are visited oldest first and each is
/// dropped if it scores above `threshold` against anything already kept, so
/// the earliest item of a cluster is the one that survives. `prior` holds
/// bodies persisted by earlier runs; they count as kept but are not returned.
pub fn collapse_near_duplicates(
    mut items: Vec<ContentItem>,
    prior: &[String],
    similarity: &dyn Similarity,
    threshold: f64,
) -> DedupOutcome {
    items.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut out = DedupOutcome::default();
    for item in items {
        let duplicate = prior
            .iter()
            .map(String::as_str)
            .chain(out.kept.iter().map(|k| k.text.as_str()))
            .any(|kept| similarity.similarity(kept, &item.text) > threshold);
        if duplicate {
            out.collapsed += 1;
        } else {
            out.kept.push(item);
        }
    }
    out
}
