//! Key and value types of the inventory.
//!
//! A [`Coordinate`] is the exact `(x, y, z)` location used as the map key and
//! an [`Entry`] is the immutable item descriptor stored there.  Both validate
//! on construction and on deserialization, so an invalid value never reaches
//! the store or the snapshot file.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Maximum label length, in characters.
pub const MAX_LABEL_LEN: usize = 256;

/// Maximum number of metadata keys per entry.
pub const MAX_METADATA_KEYS: usize = 32;

/// Maximum metadata key length, in characters.
pub const MAX_METADATA_KEY_LEN: usize = 64;

/// Maximum metadata value length, in characters.
pub const MAX_METADATA_VALUE_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Coordinate
// ---------------------------------------------------------------------------

/// A storage location.  Ordered by `x`, then `y`, then `z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Coordinate {
    pub const ORIGIN: Coordinate = Coordinate { x: 0, y: 0, z: 0 };

    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// Build a coordinate from three textual components.
    pub fn from_parts(x: &str, y: &str, z: &str) -> Result<Self, ModelError> {
        Ok(Self {
            x: parse_axis('x', x)?,
            y: parse_axis('y', y)?,
            z: parse_axis('z', z)?,
        })
    }
}

fn parse_axis(axis: char, value: &str) -> Result<i64, ModelError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| ModelError::CoordinateComponent {
            axis,
            value: value.trim().to_owned(),
        })
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Accepts `x y z`, `x,y,z`, `x, y, z` and `(x, y, z)`.
impl FromStr for Coordinate {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s.trim().trim_start_matches('(').trim_end_matches(')');
        let parts: Vec<&str> = inner
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();

        match parts.as_slice() {
            [x, y, z] => Self::from_parts(x, y, z),
            other => Err(ModelError::CoordinateArity(other.len())),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// The item stored at a coordinate.
///
/// Entries are never mutated in place; an update replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEntry")]
pub struct Entry {
    label: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl Entry {
    /// Create an entry with only a label.
    pub fn new(label: impl Into<String>) -> Result<Self, ModelError> {
        Self::with_metadata(label, BTreeMap::new())
    }

    /// Create an entry with a label and metadata (e.g. `quantity`, `owner`).
    pub fn with_metadata(
        label: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, ModelError> {
        let label = label.into().trim().to_owned();
        if label.is_empty() {
            return Err(ModelError::EmptyLabel);
        }
        let len = label.chars().count();
        if len > MAX_LABEL_LEN {
            return Err(ModelError::LabelTooLong {
                len,
                max: MAX_LABEL_LEN,
            });
        }

        if metadata.len() > MAX_METADATA_KEYS {
            return Err(ModelError::TooManyMetadata {
                count: metadata.len(),
                max: MAX_METADATA_KEYS,
            });
        }
        for (key, value) in &metadata {
            validate_metadata(key, value)?;
        }

        Ok(Self { label, metadata })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

fn validate_metadata(key: &str, value: &str) -> Result<(), ModelError> {
    let invalid = |reason: String| ModelError::InvalidMetadata {
        key: key.to_owned(),
        reason,
    };

    if key.trim().is_empty() {
        return Err(invalid("key must not be empty".into()));
    }
    if key.chars().count() > MAX_METADATA_KEY_LEN {
        return Err(invalid(format!(
            "key longer than {MAX_METADATA_KEY_LEN} characters"
        )));
    }
    if value.chars().count() > MAX_METADATA_VALUE_LEN {
        return Err(invalid(format!(
            "value longer than {MAX_METADATA_VALUE_LEN} characters"
        )));
    }
    Ok(())
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)?;
        if !self.metadata.is_empty() {
            let pairs: Vec<String> = self
                .metadata
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " [{}]", pairs.join(", "))?;
        }
        Ok(())
    }
}

/// Unvalidated wire shape of an [`Entry`].
#[derive(Deserialize)]
struct RawEntry {
    label: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl TryFrom<RawEntry> for Entry {
    type Error = ModelError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        Entry::with_metadata(raw.label, raw.metadata)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_parses_common_spellings() {
        let expected = Coordinate::new(-100, 20, -25);
        for text in ["-100 20 -25", "-100,20,-25", "-100, 20, -25", "(-100, 20, -25)"] {
            assert_eq!(text.parse::<Coordinate>().unwrap(), expected, "input: {text}");
        }
    }

    #[test]
    fn coordinate_rejects_wrong_arity() {
        assert_eq!(
            "1 2".parse::<Coordinate>(),
            Err(ModelError::CoordinateArity(2))
        );
        assert_eq!(
            "1 2 3 4".parse::<Coordinate>(),
            Err(ModelError::CoordinateArity(4))
        );
    }

    #[test]
    fn coordinate_rejects_non_integers() {
        let err = "1 two 3".parse::<Coordinate>().unwrap_err();
        assert_eq!(
            err,
            ModelError::CoordinateComponent {
                axis: 'y',
                value: "two".into()
            }
        );
        assert!("1.5 0 0".parse::<Coordinate>().is_err());
        assert!("99999999999999999999 0 0".parse::<Coordinate>().is_err());
    }

    #[test]
    fn coordinate_display() {
        assert_eq!(Coordinate::new(-1, 0, 7).to_string(), "(-1, 0, 7)");
    }

    #[test]
    fn coordinate_ordering_is_x_then_y_then_z() {
        let mut coords = vec![
            Coordinate::new(1, 0, 0),
            Coordinate::new(0, 5, 0),
            Coordinate::new(0, 0, 9),
            Coordinate::new(-3, 100, 100),
        ];
        coords.sort();
        assert_eq!(
            coords,
            vec![
                Coordinate::new(-3, 100, 100),
                Coordinate::new(0, 0, 9),
                Coordinate::new(0, 5, 0),
                Coordinate::new(1, 0, 0),
            ]
        );
    }

    #[test]
    fn entry_trims_label() {
        let entry = Entry::new("  iron ingot ").unwrap();
        assert_eq!(entry.label(), "iron ingot");
    }

    #[test]
    fn entry_rejects_empty_and_long_labels() {
        assert_eq!(Entry::new("   "), Err(ModelError::EmptyLabel));
        let long = "x".repeat(MAX_LABEL_LEN + 1);
        assert!(matches!(
            Entry::new(long),
            Err(ModelError::LabelTooLong { .. })
        ));
    }

    #[test]
    fn entry_validates_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert(String::new(), "1".to_owned());
        assert!(matches!(
            Entry::with_metadata("chest", metadata),
            Err(ModelError::InvalidMetadata { .. })
        ));

        let too_many: BTreeMap<String, String> = (0..=MAX_METADATA_KEYS)
            .map(|i| (format!("k{i}"), "v".to_owned()))
            .collect();
        assert!(matches!(
            Entry::with_metadata("chest", too_many),
            Err(ModelError::TooManyMetadata { .. })
        ));
    }

    #[test]
    fn entry_deserialization_validates() {
        let ok: Entry = serde_json::from_str(r#"{"label":"thing"}"#).unwrap();
        assert_eq!(ok.label(), "thing");
        assert!(ok.metadata().is_empty());

        let bad = serde_json::from_str::<Entry>(r#"{"label":"  "}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn entry_serialization_omits_empty_metadata() {
        let entry = Entry::new("thing").unwrap();
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            serde_json::json!({"label": "thing"})
        );
    }

    #[test]
    fn entry_display_includes_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("quantity".to_owned(), "64".to_owned());
        let entry = Entry::with_metadata("cobblestone", metadata).unwrap();
        assert_eq!(entry.to_string(), "cobblestone [quantity=64]");
    }
}
