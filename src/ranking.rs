//! Relevance ranking for message search results.
//!
//! FTS5 bm25 decides topical relevance; engagement (reactions, replies)
//! and recency adjust it so that well-received, recent answers surface first.

use std::cmp::Ordering;

use crate::cache::MessageHit;

const SECONDS_PER_DAY: f64 = 86_400.0;
const ENGAGEMENT_FACTOR: f64 = 0.1;

/// `0.5 ^ (age / half_life)`; a non-positive half-life disables decay.
pub fn recency_decay(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_days.max(0.0) / half_life_days)
}

pub fn age_days(ts_epoch: f64, now_epoch: f64) -> f64 {
    ((now_epoch - ts_epoch) / SECONDS_PER_DAY).max(0.0)
}

pub fn engagement(reactions: i64, replies: i64) -> f64 {
    1.0 + ENGAGEMENT_FACTOR * (1.0 + reactions.max(0) as f64).ln()
        + ENGAGEMENT_FACTOR * (1.0 + replies.max(0) as f64).ln()
}

pub fn score_hit(hit: &MessageHit, now_epoch: f64, half_life_days: f64) -> f64 {
    let relevance = -hit.bm25;
    let message = &hit.message;
    let recency = recency_decay(age_days(message.ts_epoch(), now_epoch), half_life_days);

    relevance * engagement(message.reaction_count, message.reply_count) * (0.5 + 0.5 * recency)
}

#[derive(Debug, Clone)]
pub struct RankedHit {
    pub hit: MessageHit,
    pub score: f64,
}

/// Score, sort (score desc, then newest first) and truncate.
pub fn rank_hits(
    hits: Vec<MessageHit>,
    now_epoch: f64,
    half_life_days: f64,
    limit: usize,
) -> Vec<RankedHit> {
    let mut ranked: Vec<RankedHit> = hits
        .into_iter()
        .map(|hit| RankedHit {
            score: score_hit(&hit, now_epoch, half_life_days),
            hit,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.hit
                    .message
                    .ts_epoch()
                    .partial_cmp(&a.hit.message.ts_epoch())
                    .unwrap_or(Ordering::Equal)
            })
    });
    ranked.truncate(limit);
    ranked
}
