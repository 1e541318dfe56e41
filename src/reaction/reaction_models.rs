use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Reaction {
    pub id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: i64,
    pub user_ids: Vec<i64>,
    /// Whether the viewing user is among `user_ids`. False on broadcast
    /// events, which have no single viewer.
    #[serde(default)]
    pub user_reacted: bool,
}

impl ReactionSummary {
    pub fn reacted_by(&self, user_id: i64) -> bool {
        self.user_ids.contains(&user_id)
    }
}

/// Fills in `user_reacted` for one viewer.
pub fn for_viewer(mut summaries: Vec<ReactionSummary>, viewer_id: i64) -> Vec<ReactionSummary> {
    for summary in &mut summaries {
        summary.user_reacted = summary.reacted_by(viewer_id);
    }
    summaries
}

/// Groups raw reaction rows into per-emoji summaries, most popular first.
/// Ties keep the order in which each emoji was first seen.
pub fn summarize(reactions: &[Reaction]) -> Vec<ReactionSummary> {
    let mut summaries: Vec<ReactionSummary> = Vec::new();
    for reaction in reactions {
        match summaries.iter_mut().find(|s| s.emoji == reaction.emoji) {
            Some(summary) => {
                summary.count += 1;
                summary.user_ids.push(reaction.user_id);
            }
            None => summaries.push(ReactionSummary {
                emoji: reaction.emoji.clone(),
                count: 1,
                user_ids: vec![reaction.user_id],
                user_reacted: false,
            }),
        }
    }
    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

/// Per-recipient delivery progress. Stored as SMALLINT so that "never
/// regress" is a plain numeric comparison in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent = 0,
    Delivered = 1,
    Read = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DeliveryStatus {
    pub message_id: i64,
    pub user_id: i64,
    pub status: DeliveryState,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaction(id: i64, user_id: i64, emoji: &str) -> Reaction {
        Reaction {
            id,
            message_id: 1,
            user_id,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn summaries_group_by_emoji_and_sort_by_count() {
        let rows = vec![
            reaction(1, 10, "👍"),
            reaction(2, 10, "❤️"),
            reaction(3, 20, "❤️"),
        ];
        let summaries = summarize(&rows);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].emoji, "❤️");
        assert_eq!(summaries[0].count, 2);
        assert!(summaries[0].reacted_by(20));
        assert!(!summaries[1].reacted_by(20));
        assert!(!summaries[0].user_reacted);
    }

    #[test]
    fn viewer_flag_follows_user_ids() {
        let rows = vec![reaction(1, 10, "👍"), reaction(2, 20, "🔥")];
        let viewed = for_viewer(summarize(&rows), 20);

        let thumbs = viewed.iter().find(|s| s.emoji == "👍").unwrap();
        let fire = viewed.iter().find(|s| s.emoji == "🔥").unwrap();
        assert!(!thumbs.user_reacted);
        assert!(fire.user_reacted);
    }

    #[test]
    fn delivery_states_are_ordered() {
        assert!(DeliveryState::Sent < DeliveryState::Delivered);
        assert!(DeliveryState::Delivered < DeliveryState::Read);
        assert_eq!(DeliveryState::Read as i16, 2);
    }
}
