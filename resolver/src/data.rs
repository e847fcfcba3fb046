use crate::key;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// A single entry of a fetch payload. Only the feature-identifying field and
/// the enablement field are interpreted.
pub type RawRecord = Value;

/// Canonical key to projection, in first-seen order.
pub type NormalizedDataMap = IndexMap<String, Projection>;

/// The part of a raw record that is surfaced to flag consumers.
///
/// Serializes as the selected subset of the original record, so a record
/// `{"name": "dark-mode", "enabled": true, "owner": "web"}` projected on
/// `enabled` becomes `{"enabled": true}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Projection {
    #[serde(skip)]
    enabled: Option<Value>,
    fields: Map<String, Value>,
}

impl Projection {
    pub fn from_record(record: &RawRecord, enabled_key: &str, selected: &[&str]) -> Self {
        let mut fields = Map::new();
        for field in std::iter::once(enabled_key).chain(selected.iter().copied()) {
            if let Some(value) = record.get(field) {
                fields.insert(field.to_string(), value.clone());
            }
        }

        Projection {
            enabled: record.get(enabled_key).cloned(),
            fields,
        }
    }

    /// The value of the enablement field, if the record carried one.
    pub fn enabled(&self) -> Option<&Value> {
        self.enabled.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Reduces raw records to a canonical-key map, keeping only the enablement field.
///
/// Later records whose identifiers normalize to the same key replace earlier ones.
pub fn normalize_data(
    records: &[RawRecord],
    feature_key: &str,
    enabled_key: &str,
) -> NormalizedDataMap {
    normalize_data_with(records, feature_key, enabled_key, &[])
}

/// Like [`normalize_data`], additionally copying the `selected` fields into
/// each projection.
pub fn normalize_data_with(
    records: &[RawRecord],
    feature_key: &str,
    enabled_key: &str,
    selected: &[&str],
) -> NormalizedDataMap {
    records
        .iter()
        .fold(NormalizedDataMap::new(), |mut normalized, record| {
            match feature_name(record, feature_key) {
                Some(name) => {
                    normalized.insert(
                        key::normalize(&name),
                        Projection::from_record(record, enabled_key, selected),
                    );
                }
                None => {
                    tracing::warn!(feature_key, "skipping record without a feature identifier");
                }
            }
            normalized
        })
}

fn feature_name(record: &RawRecord, feature_key: &str) -> Option<String> {
    match record.get(feature_key)? {
        Value::String(name) => Some(name.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
