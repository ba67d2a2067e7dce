//! Field definitions for PPP solutions.
//!
//! Every stitched quantity is a `FieldKey`: one of six physical fields plus
//! whether it is the value or its uncertainty. The key carries its
//! `FieldCategory`, which the stitcher resolves once into a `StitchMethod`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    WetZ,
    GradNorth,
    GradEast,
    X,
    Y,
    Z,
}

impl Field {
    /// Order of the groups inside a solution file.
    pub const ALL: [Field; 6] = [
        Field::WetZ,
        Field::GradNorth,
        Field::GradEast,
        Field::X,
        Field::Y,
        Field::Z,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::WetZ => "WetZ",
            Field::GradNorth => "GradNorth",
            Field::GradEast => "GradEast",
            Field::X => "X",
            Field::Y => "Y",
            Field::Z => "Z",
        }
    }

    /// Substring identifying this field's rows in the trailing column of a
    /// solution file.
    pub fn file_tag(self) -> &'static str {
        match self {
            Field::WetZ => "WetZ",
            Field::GradNorth => "GradNorth",
            Field::GradEast => "GradEast",
            Field::X => "Pos.X",
            Field::Y => "Pos.Y",
            Field::Z => "Pos.Z",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Field::WetZ => "cm",
            Field::GradNorth | Field::GradEast => "cm/m",
            Field::X | Field::Y | Field::Z => "m",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Field::WetZ => "Zenith Wet Delay",
            Field::GradNorth => "North Gradient of Zenith Wet Delay",
            Field::GradEast => "East Gradient of Zenith Wet Delay",
            Field::X => "WGS84(geocentric) X coordinate",
            Field::Y => "WGS84(geocentric) Y coordinate",
            Field::Z => "WGS84(geocentric) Z coordinate",
        }
    }

    /// Troposphere products are stored in centimeters, the file has meters.
    pub fn scale(self) -> f64 {
        if self.is_troposphere() {
            100.0
        } else {
            1.0
        }
    }

    pub fn is_troposphere(self) -> bool {
        matches!(self, Field::WetZ | Field::GradNorth | Field::GradEast)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Value,
    Error,
}

/// Which stitching rule a field follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldCategory {
    /// Troposphere values: averaged then smoothed.
    Smoothed,
    /// Station coordinates: averaged.
    Positional,
    /// Uncertainties: combined as root-sum-of-squares.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey {
    pub field: Field,
    pub kind: FieldKind,
}

impl FieldKey {
    pub const fn value(field: Field) -> Self {
        FieldKey {
            field,
            kind: FieldKind::Value,
        }
    }

    pub const fn error(field: Field) -> Self {
        FieldKey {
            field,
            kind: FieldKind::Error,
        }
    }

    /// All twelve keys, values first then errors for each field.
    pub fn all() -> Vec<FieldKey> {
        Field::ALL
            .iter()
            .flat_map(|&f| [FieldKey::value(f), FieldKey::error(f)])
            .collect()
    }

    pub fn is_error(&self) -> bool {
        self.kind == FieldKind::Error
    }

    pub fn category(&self) -> FieldCategory {
        match (self.kind, self.field.is_troposphere()) {
            (FieldKind::Error, _) => FieldCategory::Error,
            (FieldKind::Value, true) => FieldCategory::Smoothed,
            (FieldKind::Value, false) => FieldCategory::Positional,
        }
    }

    /// Counterpart uncertainty key of a value key.
    pub fn error_key(&self) -> FieldKey {
        FieldKey::error(self.field)
    }

    pub fn meta(&self) -> FieldMeta {
        FieldMeta {
            unit: self.field.unit().to_string(),
            description: self.field.description().to_string(),
            action: None,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FieldKind::Value => write!(f, "{}", self.field.name()),
            FieldKind::Error => write!(f, "{}_error", self.field.name()),
        }
    }
}

impl FromStr for FieldKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, kind) = match s.strip_suffix("_error") {
            Some(base) => (base, FieldKind::Error),
            None => (s, FieldKind::Value),
        };
        Field::ALL
            .iter()
            .find(|f| f.name() == base)
            .map(|&field| FieldKey { field, kind })
            .ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// Unit, description and provenance of one persisted column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub unit: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}
