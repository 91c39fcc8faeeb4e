use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

// Seeker profile ids double as feed item ids.
id_newtype!(ItemId);
id_newtype!(QuestionId);
id_newtype!(QuestionnaireId);
id_newtype!(RoleConfigId);

/// The binary verdict on a candidate. Serialized the way the service names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "like")]
    Accept,
    #[serde(rename = "pass")]
    Reject,
}

impl Outcome {
    pub fn as_wire(self) -> &'static str {
        match self {
            Outcome::Accept => "like",
            Outcome::Reject => "pass",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "like" => Some(Outcome::Accept),
            "pass" => Some(Outcome::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    Scale,
    Text,
    YesNo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitBand {
    Excellent,
    Good,
    Moderate,
    Low,
}

impl FitBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            FitBand::Excellent
        } else if score >= 60.0 {
            FitBand::Good
        } else if score >= 40.0 {
            FitBand::Moderate
        } else {
            FitBand::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FitBand::Excellent => "Excellent Fit",
            FitBand::Good => "Good Fit",
            FitBand::Moderate => "Moderate Fit",
            FitBand::Low => "Low Fit",
        }
    }
}

/// Editable free-text profile fields and the server-side length limit of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Headline,
    Location,
    Bio,
}

impl ProfileField {
    pub const ALL: [ProfileField; 3] = [
        ProfileField::Headline,
        ProfileField::Location,
        ProfileField::Bio,
    ];

    pub fn max_chars(self) -> usize {
        match self {
            ProfileField::Headline => 500,
            ProfileField::Location => 255,
            ProfileField::Bio => 2000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileField::Headline => "headline",
            ProfileField::Location => "location",
            ProfileField::Bio => "bio",
        }
    }

    /// Cuts `value` down to the field limit on a char boundary.
    pub fn truncate_to_limit(self, value: &str) -> String {
        value.chars().take(self.max_chars()).collect()
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProfileField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProfileField::ALL
            .into_iter()
            .find(|field| field.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown profile field: {s}"))
    }
}
