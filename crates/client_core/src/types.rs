use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{FitBand, ItemId, Outcome},
    protocol::CandidateCard,
};

/// A candidate as the review deck presents it.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub stats: BTreeMap<String, f64>,
    /// Compatibility score, always within `0.0..=100.0`.
    pub score: f64,
}

impl Item {
    pub fn fit_band(&self) -> FitBand {
        FitBand::from_score(self.score)
    }
}

impl From<CandidateCard> for Item {
    fn from(card: CandidateCard) -> Self {
        let score = if card.fit_score.is_finite() {
            card.fit_score.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            id: card.seeker_profile_id,
            headline: card.headline,
            location: card.location,
            bio: card.bio,
            stats: card.stats,
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub item_id: ItemId,
    pub outcome: Outcome,
    pub issued_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(item_id: ItemId, outcome: Outcome) -> Self {
        Self {
            item_id,
            outcome,
            issued_at: Utc::now(),
        }
    }
}

/// User-facing save indicator for one key or one decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    #[default]
    Idle,
    Pending,
    Committing,
    Committed,
    Failed,
}

impl SyncStatus {
    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::Idle => "",
            SyncStatus::Pending => "Unsaved changes",
            SyncStatus::Committing => "Saving...",
            SyncStatus::Committed => "Saved",
            SyncStatus::Failed => "Save failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn item_clamps_out_of_range_scores() {
        let card = CandidateCard {
            seeker_profile_id: ItemId(Uuid::new_v4()),
            headline: Some("Data Engineer".into()),
            location: None,
            bio: None,
            stats: BTreeMap::new(),
            fit_score: 131.0,
            questionnaire_completed: true,
            stats_computed_at: None,
        };
        let item = Item::from(card.clone());
        assert_eq!(item.score, 100.0);
        assert_eq!(item.fit_band(), FitBand::Excellent);

        let broken = Item::from(CandidateCard {
            fit_score: f64::NAN,
            ..card
        });
        assert_eq!(broken.score, 0.0);
    }
}
