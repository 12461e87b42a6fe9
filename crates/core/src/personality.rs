use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The persona the model adopts for every prompt in a walk.
///
/// This is a closed set; the persona text is injected into the system
/// instruction of each explore, pick and narrate call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Personality {
    #[default]
    CuriousGeneralist,
    HistoryNerd,
    ScienceGeek,
    ChaosGoblin,
    Foodie,
    ConspiracyAdjacent,
}

impl Personality {
    pub const ALL: [Personality; 6] = [
        Personality::CuriousGeneralist,
        Personality::HistoryNerd,
        Personality::ScienceGeek,
        Personality::ChaosGoblin,
        Personality::Foodie,
        Personality::ConspiracyAdjacent,
    ];

    /// The kebab-case key used on the wire.
    pub fn key(&self) -> &'static str {
        match self {
            Personality::CuriousGeneralist => "curious-generalist",
            Personality::HistoryNerd => "history-nerd",
            Personality::ScienceGeek => "science-geek",
            Personality::ChaosGoblin => "chaos-goblin",
            Personality::Foodie => "foodie",
            Personality::ConspiracyAdjacent => "conspiracy-adjacent",
        }
    }

    /// Human-facing name.
    pub fn label(&self) -> &'static str {
        match self {
            Personality::CuriousGeneralist => "Curious Generalist",
            Personality::HistoryNerd => "History Nerd",
            Personality::ScienceGeek => "Science Geek",
            Personality::ChaosGoblin => "Chaos Goblin",
            Personality::Foodie => "Foodie",
            Personality::ConspiracyAdjacent => "Conspiracy Adjacent",
        }
    }

    /// The persona description completing "You are a ...".
    pub fn persona(&self) -> &'static str {
        match self {
            Personality::CuriousGeneralist => "curious generalist who finds everything interesting",
            Personality::HistoryNerd => "history nerd who always wants to know the origin story",
            Personality::ScienceGeek => "science geek fascinated by how things work",
            Personality::ChaosGoblin => "chaos goblin drawn to the weird, dark, and unexpected",
            Personality::Foodie => "food obsessive who relates everything back to eating",
            Personality::ConspiracyAdjacent => {
                "person who loves connecting dots (but stays grounded in facts)"
            }
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Personality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Personality::ALL
            .into_iter()
            .find(|p| p.key() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown personality: '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personality_default_is_curious_generalist() {
        assert_eq!(Personality::default(), Personality::CuriousGeneralist);
    }

    #[test]
    fn test_personality_serde_uses_kebab_keys() {
        let json = serde_json::to_string(&Personality::ConspiracyAdjacent).unwrap();
        assert_eq!(json, "\"conspiracy-adjacent\"");

        let parsed: Personality = serde_json::from_str("\"chaos-goblin\"").unwrap();
        assert_eq!(parsed, Personality::ChaosGoblin);
    }

    #[test]
    fn test_personality_from_str_matches_key() {
        for p in Personality::ALL {
            assert_eq!(p.key().parse::<Personality>().unwrap(), p);
            assert_eq!(p.to_string(), p.key());
        }
        let err = "pirate".parse::<Personality>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
