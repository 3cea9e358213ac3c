use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The topical category a session is filed under.
///
/// Categories are a closed set. Each has a stable lowercase key used in persisted state and an
/// Arabic display label used by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Category {
    /// Matters of belief.
    Creed,
    /// Rulings and practice.
    Jurisprudence,
    /// Prophetic tradition.
    Tradition,
    /// Lives and history.
    Biography,
    /// Not yet filed.
    #[default]
    Uncategorized,
}

impl Category {
    /// All categories in their declared display order.
    pub const ALL: [Category; 5] = [
        Category::Creed,
        Category::Jurisprudence,
        Category::Tradition,
        Category::Biography,
        Category::Uncategorized,
    ];

    /// The key written to persisted state.
    pub fn key(self) -> &'static str {
        match self {
            Category::Creed => "creed",
            Category::Jurisprudence => "jurisprudence",
            Category::Tradition => "tradition",
            Category::Biography => "biography",
            Category::Uncategorized => "uncategorized",
        }
    }

    /// The display label shown to the user.
    pub fn label(self) -> &'static str {
        match self {
            Category::Creed => "العقيدة",
            Category::Jurisprudence => "الفقه",
            Category::Tradition => "الحديث",
            Category::Biography => "السيرة",
            Category::Uncategorized => "غير مصنف",
        }
    }

    /// Position of this category in [`Category::ALL`].
    pub fn ordinal(self) -> usize {
        match self {
            Category::Creed => 0,
            Category::Jurisprudence => 1,
            Category::Tradition => 2,
            Category::Biography => 3,
            Category::Uncategorized => 4,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Parses a category from its key, a legacy transliterated key, or its display label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "creed" | "aqeedah" | "aqidah" => return Ok(Category::Creed),
            "jurisprudence" | "fiqh" => return Ok(Category::Jurisprudence),
            "tradition" | "hadith" => return Ok(Category::Tradition),
            "biography" | "seerah" | "sirah" => return Ok(Category::Biography),
            "uncategorized" | "general" | "none" => return Ok(Category::Uncategorized),
            _ => {}
        }
        Category::ALL
            .into_iter()
            .find(|category| category.label() == trimmed)
            .ok_or_else(|| {
                format!(
                    "Invalid category: {s}. Valid options: creed, jurisprudence, tradition, biography, uncategorized"
                )
            })
    }
}

impl Serialize for Category {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
