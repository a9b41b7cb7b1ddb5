use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a positional argument value is obtained from the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgClass {
    #[default]
    Text,
    Select,
    FilePath,
    DirectoryPath,
}

impl ArgClass {
    pub fn is_path(self) -> bool {
        matches!(self, ArgClass::FilePath | ArgClass::DirectoryPath)
    }

    pub fn label(self) -> &'static str {
        match self {
            ArgClass::Text => "text",
            ArgClass::Select => "select",
            ArgClass::FilePath => "file",
            ArgClass::DirectoryPath => "directory",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    #[default]
    Single,
    Multiple,
}

/// A positional argument an item asks for at configuration time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub class: ArgClass,
    #[serde(default)]
    pub multiplicity: Multiplicity,
    #[serde(default)]
    pub value: Vec<String>,
}

impl ArgumentSpec {
    /// An unnamed argument means the item takes no positional input.
    pub fn is_declared(&self) -> bool {
        !self.name.trim().is_empty()
    }

    pub fn allows_multiple(&self) -> bool {
        self.multiplicity == Multiplicity::Multiple
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub logo_url: String,
    #[serde(default)]
    pub rating: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_publish_date")]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_installed: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub guide: String,
    #[serde(default)]
    pub input_arg: Option<ArgumentSpec>,
}

impl CatalogItem {
    pub fn rating(&self) -> u8 {
        self.rating.min(5)
    }

    /// The declared positional argument, if any.
    pub fn argument(&self) -> Option<&ArgumentSpec> {
        self.input_arg.as_ref().filter(|arg| arg.is_declared())
    }

    pub fn needs_configuration(&self) -> bool {
        !self.env.is_empty() || self.argument().is_some()
    }

    pub fn stars(&self) -> String {
        let rating = usize::from(self.rating());
        format!("{}{}", "*".repeat(rating), ".".repeat(5 - rating))
    }
}

pub fn parse_publish_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn deserialize_publish_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(|value| {
        let parsed = parse_publish_date(value);
        if parsed.is_none() {
            tracing::debug!("unparseable publish date: {value}");
        }
        parsed
    }))
}
