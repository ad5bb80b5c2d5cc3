pub mod pool;
pub mod sdam;
pub mod server_selection;

use bson::{oid, Bson, Document};
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_json::Value;

use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// An ObjectId in extended JSON form: `{ "$oid": "..." }`.
#[derive(Clone, Debug, Deserialize)]
pub struct ExtendedOid {
    #[serde(rename = "$oid")]
    pub oid: String,
}

impl ExtendedOid {
    pub fn to_oid(&self) -> oid::ObjectId {
        oid::ObjectId::with_string(&self.oid).unwrap()
    }
}

pub fn from_file<T: DeserializeOwned>(path: &Path) -> T {
    let file = File::open(path).unwrap_or_else(|err| panic!("{}: {}", path.display(), err));
    serde_json::from_reader(file).unwrap_or_else(|err| panic!("{}: {}", path.display(), err))
}

/// Lists the JSON suites in `dir`, in name order.
pub fn suites(dir: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(Path::new(dir))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();
    assert!(!paths.is_empty(), "no suites found in {}", dir);
    paths
}

/// Converts a JSON value, including `$oid` and `$date` wrappers, to BSON.
pub fn to_bson(value: &Value) -> Bson {
    match *value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(b),
        Value::Number(ref n) => match n.as_i64() {
            Some(i) if i >= i64::from(std::i32::MIN) && i <= i64::from(std::i32::MAX) => {
                Bson::I32(i as i32)
            }
            Some(i) => Bson::I64(i),
            None => Bson::FloatingPoint(n.as_f64().unwrap()),
        },
        Value::String(ref s) => Bson::String(s.clone()),
        Value::Array(ref arr) => Bson::Array(arr.iter().map(to_bson).collect()),
        Value::Object(ref obj) => {
            if let Some(&Value::String(ref id)) = obj.get("$oid") {
                return Bson::ObjectId(oid::ObjectId::with_string(id).unwrap());
            }
            if let Some(millis) = obj.get("$date").and_then(Value::as_i64) {
                return Bson::UtcDatetime(Utc.timestamp_millis(millis));
            }
            Bson::Document(to_document(value))
        }
    }
}

pub fn to_document(value: &Value) -> Document {
    let mut doc = Document::new();
    if let Value::Object(ref obj) = *value {
        for (key, val) in obj {
            doc.insert(key.clone(), to_bson(val));
        }
    }
    doc
}
