//! Read preferences and tag sets.
use crate::error::{Error::ArgumentError, Result};

use bson::{Bson, Document};
use serde::de::{self, Deserialize, Deserializer};
use serde_derive::Deserialize;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A set of server tags to match, e.g. `{ "dc": "ny", "rack": "1" }`.
pub type TagSet = BTreeMap<String, String>;

/// Describes which class of server may service a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadMode {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ReadMode::Primary => "primary",
            ReadMode::PrimaryPreferred => "primaryPreferred",
            ReadMode::Secondary => "secondary",
            ReadMode::SecondaryPreferred => "secondaryPreferred",
            ReadMode::Nearest => "nearest",
        }
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for ReadMode {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match &s.to_ascii_lowercase()[..] {
            "primary" => ReadMode::Primary,
            "primarypreferred" => ReadMode::PrimaryPreferred,
            "secondary" => ReadMode::Secondary,
            "secondarypreferred" => ReadMode::SecondaryPreferred,
            "nearest" => ReadMode::Nearest,
            _ => return Err(ArgumentError(format!("Unknown read preference mode '{}'.", s))),
        })
    }
}

impl<'de> Deserialize<'de> for ReadMode {
    fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ReadMode::from_str(&s).map_err(de::Error::custom)
    }
}

/// A read preference: the mode plus optional tag and staleness constraints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPreference {
    pub mode: ReadMode,
    /// Tag sets tried in order; an empty list matches every server.
    #[serde(default, alias = "tag_sets")]
    pub tag_sets: Vec<TagSet>,
    /// Maximum estimated replication lag, in seconds. `None` disables the check.
    #[serde(default)]
    pub max_staleness_seconds: Option<i64>,
}

impl Default for ReadPreference {
    fn default() -> Self {
        ReadPreference::primary()
    }
}

impl ReadPreference {
    pub fn new(mode: ReadMode, tag_sets: Option<Vec<TagSet>>) -> ReadPreference {
        ReadPreference {
            mode,
            tag_sets: tag_sets.unwrap_or_default(),
            max_staleness_seconds: None,
        }
    }

    pub fn primary() -> ReadPreference {
        ReadPreference::new(ReadMode::Primary, None)
    }

    /// Sets the maximum staleness. Negative values mean "no maximum".
    pub fn with_max_staleness(mut self, seconds: i64) -> ReadPreference {
        self.max_staleness_seconds = if seconds < 0 { None } else { Some(seconds) };
        self
    }

    /// Checks the preference for combinations the server selection rules forbid.
    pub fn validate(&self) -> Result<()> {
        if self.mode == ReadMode::Primary {
            if !self.tag_sets.is_empty() && self.tag_sets.iter().any(|set| !set.is_empty()) {
                return Err(ArgumentError(
                    "Read preference tags cannot be combined with mode 'primary'.".to_owned(),
                ));
            }
            if self.max_staleness_seconds.is_some() {
                return Err(ArgumentError(
                    "maxStalenessSeconds cannot be combined with mode 'primary'.".to_owned(),
                ));
            }
        }
        Ok(())
    }

    /// Parses a read preference document such as
    /// `{ mode: "secondary", tags: [{ dc: "ny" }], maxStalenessSeconds: 120 }`.
    pub fn from_document(doc: &Document) -> Result<ReadPreference> {
        let mode = match doc.get("mode") {
            Some(&Bson::String(ref s)) => ReadMode::from_str(s)?,
            _ => return Err(ArgumentError("read preference requires a 'mode' string.".to_owned())),
        };

        let mut tag_sets = Vec::new();
        match doc.get("tags") {
            Some(&Bson::Array(ref arr)) => {
                for item in arr {
                    match *item {
                        Bson::Document(ref set) => tag_sets.push(tag_set_from_document(set)?),
                        _ => return Err(ArgumentError("each tag set must be a document.".to_owned())),
                    }
                }
            }
            None => (),
            Some(_) => return Err(ArgumentError("read preference 'tags' must be an array.".to_owned())),
        }

        let max_staleness_seconds = match doc.get("maxStalenessSeconds") {
            Some(&Bson::I32(v)) => Some(i64::from(v)),
            Some(&Bson::I64(v)) => Some(v),
            Some(&Bson::FloatingPoint(v)) => Some(v as i64),
            None => None,
            Some(_) => {
                return Err(ArgumentError("'maxStalenessSeconds' must be a number.".to_owned()))
            }
        };

        let read_pref = ReadPreference {
            mode,
            tag_sets,
            max_staleness_seconds: max_staleness_seconds.filter(|v| *v >= 0),
        };
        read_pref.validate()?;
        Ok(read_pref)
    }

    /// Serializes the read preference into the document form sent to mongos.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("mode", Bson::String(self.mode.as_str().to_owned()));

        if !self.tag_sets.is_empty() {
            let tags = self
                .tag_sets
                .iter()
                .map(|set| {
                    let mut tag_doc = Document::new();
                    for (k, v) in set {
                        tag_doc.insert(k.to_owned(), Bson::String(v.to_owned()));
                    }
                    Bson::Document(tag_doc)
                })
                .collect();
            doc.insert("tags", Bson::Array(tags));
        }

        if let Some(seconds) = self.max_staleness_seconds {
            doc.insert("maxStalenessSeconds", Bson::I64(seconds));
        }

        doc
    }
}

/// Parses a document of string values into a tag set.
pub fn tag_set_from_document(doc: &Document) -> Result<TagSet> {
    let mut set = TagSet::new();
    for (k, v) in doc.iter() {
        match *v {
            Bson::String(ref tag) => {
                set.insert(k.to_owned(), tag.to_owned());
            }
            _ => return Err(ArgumentError(format!("tag '{}' must be a string.", k))),
        }
    }
    Ok(set)
}

/// A tag set matches a server if every pair in the set is present in the
/// server's tags. Servers may carry additional tags.
pub fn tag_set_matches(tag_set: &TagSet, server_tags: &TagSet) -> bool {
    tag_set.iter().all(|(k, v)| server_tags.get(k) == Some(v))
}
