//! Expert discovery: who answers questions about a topic.
//!
//! Each matching message contributes a weight to its author. Answering
//! someone else's thread counts most, asking counts least, reactions add
//! a capped bonus, and everything decays with age.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::cache::{MessageHit, StoredMessage};
use crate::config::ExpertsConfig;
use crate::ranking::{age_days, recency_decay};

const MAX_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Contribution {
    Answer,
    Question,
    Message,
}

/// A message that made a user look like an expert.
#[derive(Debug, Clone, Serialize)]
pub struct ExpertSample {
    pub channel_id: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    #[serde(skip)]
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpertScore {
    pub user_id: String,
    pub score: f64,
    pub answers: u32,
    pub questions: u32,
    pub messages: u32,
    pub last_active_epoch: f64,
    pub channels: BTreeSet<String>,
    pub samples: Vec<ExpertSample>,
}

impl ExpertScore {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            score: 0.0,
            answers: 0,
            questions: 0,
            messages: 0,
            last_active_epoch: 0.0,
            channels: BTreeSet::new(),
            samples: Vec::new(),
        }
    }
}

pub fn classify(message: &StoredMessage, parent_user_id: Option<&str>) -> Contribution {
    if message.is_thread_parent() {
        return Contribution::Question;
    }
    if message.is_thread_reply() {
        // Replying inside your own thread is follow-up, not an answer
        return match (parent_user_id, message.user_id.as_deref()) {
            (Some(parent), Some(author)) if parent == author => Contribution::Message,
            _ => Contribution::Answer,
        };
    }
    Contribution::Message
}

/// The weight one message adds to its author's score.
pub fn message_weight(hit: &MessageHit, config: &ExpertsConfig, now_epoch: f64) -> f64 {
    let message = &hit.message;
    let base = match classify(message, hit.parent_user_id.as_deref()) {
        Contribution::Answer => config.answer_weight,
        Contribution::Question => config.question_weight,
        Contribution::Message => config.message_weight,
    };
    let reactions = message.reaction_count.clamp(0, i64::from(config.max_reactions)) as f64;
    let decay = recency_decay(age_days(message.ts_epoch(), now_epoch), config.half_life_days);

    (base + config.reaction_weight * reactions) * decay
}

/// Aggregate per-author scores. Bot messages, authorless messages and
/// `excluded` users are skipped.
pub fn rank_experts(
    hits: &[MessageHit],
    config: &ExpertsConfig,
    now_epoch: f64,
    excluded: &HashSet<String>,
) -> Vec<ExpertScore> {
    let mut by_user: HashMap<&str, ExpertScore> = HashMap::new();

    for hit in hits {
        let message = &hit.message;
        if message.is_bot {
            continue;
        }
        let Some(user_id) = message.user_id.as_deref() else {
            continue;
        };
        if excluded.contains(user_id) {
            continue;
        }

        let weight = message_weight(hit, config, now_epoch);
        let entry = by_user
            .entry(user_id)
            .or_insert_with(|| ExpertScore::new(user_id));

        entry.score += weight;
        match classify(message, hit.parent_user_id.as_deref()) {
            Contribution::Answer => entry.answers += 1,
            Contribution::Question => entry.questions += 1,
            Contribution::Message => entry.messages += 1,
        }
        entry.last_active_epoch = entry.last_active_epoch.max(message.ts_epoch());
        entry.channels.insert(hit.channel_name.clone());
        entry.samples.push(ExpertSample {
            channel_id: message.channel_id.clone(),
            ts: message.ts.clone(),
            thread_ts: message.thread_ts.clone(),
            weight,
        });
    }

    let mut experts: Vec<ExpertScore> = by_user.into_values().collect();
    for expert in &mut experts {
        expert
            .samples
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
        expert.samples.truncate(MAX_SAMPLES);
    }

    experts.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.answers.cmp(&a.answers))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    experts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::stored;
    use pretty_assertions::assert_eq;

    const NOW: f64 = 1_700_000_000.0;

    fn hit(message: StoredMessage, parent_user_id: Option<&str>) -> MessageHit {
        MessageHit {
            message,
            channel_name: "forum-rust".to_string(),
            bm25: -1.0,
            parent_user_id: parent_user_id.map(|s| s.to_string()),
        }
    }

    fn now_ts(offset_secs: f64) -> String {
        format!("{:.6}", NOW - offset_secs)
    }

    #[test]
    fn test_classify_contributions() {
        let q = stored("C1", "100.0", Some("100.0"), "U1", "q");
        let a = stored("C1", "101.0", Some("100.0"), "U2", "a");
        let follow_up = stored("C1", "102.0", Some("100.0"), "U1", "thanks");
        let plain = stored("C1", "103.0", None, "U3", "fyi");

        assert_eq!(classify(&q, None), Contribution::Question);
        assert_eq!(classify(&a, Some("U1")), Contribution::Answer);
        assert_eq!(classify(&follow_up, Some("U1")), Contribution::Message);
        assert_eq!(classify(&plain, None), Contribution::Message);
    }

    #[test]
    fn test_message_weight_caps_reactions_and_decays() {
        let config = ExpertsConfig::default();
        let mut answer = stored("C1", &now_ts(0.0), Some("1.0"), "U2", "a");
        answer.reaction_count = 50;

        let weight = message_weight(&hit(answer.clone(), Some("U1")), &config, NOW);
        let expected = config.answer_weight + config.reaction_weight * config.max_reactions as f64;
        assert!((weight - expected).abs() < 1e-9);

        answer.ts = now_ts(config.half_life_days * 86_400.0);
        let decayed = message_weight(&hit(answer, Some("U1")), &config, NOW);
        assert!((decayed - expected / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_answerer_outranks_asker_and_chatter() {
        let config = ExpertsConfig::default();
        let hits = vec![
            hit(stored("C1", &now_ts(10.0), Some(&now_ts(10.0)), "U_ASK", "how?"), None),
            hit(stored("C1", &now_ts(5.0), Some(&now_ts(10.0)), "U_EXPERT", "like this"), Some("U_ASK")),
            hit(stored("C1", &now_ts(3.0), None, "U_CHAT", "also curious"), None),
        ];

        let experts = rank_experts(&hits, &config, NOW, &HashSet::new());
        let order: Vec<_> = experts.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(order, vec!["U_EXPERT", "U_CHAT", "U_ASK"]);
        assert_eq!(experts[0].answers, 1);
        assert_eq!(experts[2].questions, 1);
        assert!(experts[0].channels.contains("forum-rust"));
    }

    #[test]
    fn test_bots_and_excluded_users_are_skipped() {
        let config = ExpertsConfig::default();
        let mut bot = stored("C1", &now_ts(1.0), None, "B1", "automated");
        bot.is_bot = true;
        let hits = vec![
            hit(bot, None),
            hit(stored("C1", &now_ts(2.0), None, "U_ME", "mine"), None),
            hit(stored("C1", &now_ts(3.0), None, "U_OTHER", "theirs"), None),
        ];
        let excluded: HashSet<String> = ["U_ME".to_string()].into_iter().collect();

        let experts = rank_experts(&hits, &config, NOW, &excluded);
        assert_eq!(experts.len(), 1);
        assert_eq!(experts[0].user_id, "U_OTHER");
    }

    #[test]
    fn test_samples_keep_heaviest_three() {
        let config = ExpertsConfig::default();
        let mut hits = Vec::new();
        for i in 0..5 {
            let mut m = stored("C1", &now_ts(i as f64), Some("1.0"), "U2", "answer");
            m.reaction_count = i;
            hits.push(hit(m, Some("U1")));
        }

        let experts = rank_experts(&hits, &config, NOW, &HashSet::new());
        assert_eq!(experts[0].samples.len(), MAX_SAMPLES);
        assert_eq!(experts[0].answers, 5);
        assert_eq!(experts[0].samples[0].ts, now_ts(4.0));
    }

    #[test]
    fn test_ties_break_on_answers_then_id() {
        let config = ExpertsConfig {
            answer_weight: 1.0,
            message_weight: 1.0,
            ..ExpertsConfig::default()
        };
        let hits = vec![
            hit(stored("C1", &now_ts(0.0), None, "U_B", "x"), None),
            hit(stored("C1", &now_ts(0.0), Some("1.0"), "U_C", "y"), Some("U_Z")),
            hit(stored("C1", &now_ts(0.0), None, "U_A", "z"), None),
        ];

        let experts = rank_experts(&hits, &config, NOW, &HashSet::new());
        let order: Vec<_> = experts.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(order, vec!["U_C", "U_A", "U_B"]);
    }
}
