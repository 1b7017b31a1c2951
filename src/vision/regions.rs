//! Answer-sheet template regions
//!
//! Maps named rectangles of the canonical image to the semantic fields
//! they hold. A template is bound to one printed sheet layout; switching
//! layouts means swapping the table, not code.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Semantic meaning of a template region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Student family name (printed or handwritten)
    FamilyName,
    /// Student first name
    FirstName,
    /// Unique student number, read through the instruction-driven backend
    StudentNumber,
    /// Score cell for one exam item
    Score,
    /// Score cell holding the grader's total
    Total,
}

impl FieldRole {
    /// Identity fields are reconciled against the registry
    pub fn is_identity(self) -> bool {
        matches!(
            self,
            FieldRole::FamilyName | FieldRole::FirstName | FieldRole::StudentNumber
        )
    }

    /// Numeric cells get digit-only sanitization
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldRole::Score | FieldRole::Total)
    }
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldRole::FamilyName => "family name",
            FieldRole::FirstName => "first name",
            FieldRole::StudentNumber => "student number",
            FieldRole::Score => "score",
            FieldRole::Total => "total",
        };
        f.write_str(name)
    }
}

/// Axis-aligned rectangle in canonical image coordinates, `x2`/`y2` exclusive.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Rect {
    pub const fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Whether the rectangle lies inside a `width` x `height` image
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x2 <= width && self.y2 <= height
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }
}

impl From<[u32; 4]> for Rect {
    fn from(v: [u32; 4]) -> Self {
        Rect::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Rect> for [u32; 4] {
    fn from(r: Rect) -> Self {
        [r.x1, r.y1, r.x2, r.y2]
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// A named region of the template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    /// Field name, also used as the results column for score items
    pub name: String,
    /// What the region holds
    pub role: FieldRole,
    /// Location in the canonical image
    pub rect: Rect,
}

impl RegionSpec {
    pub fn new(name: impl Into<String>, role: FieldRole, rect: Rect) -> Self {
        Self {
            name: name.into(),
            role,
            rect,
        }
    }
}

/// Template validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("region '{name}' has an empty rectangle {rect}")]
    EmptyRect { name: String, rect: Rect },
    #[error("region '{name}' {rect} exceeds the canonical image {width}x{height}")]
    OutOfBounds {
        name: String,
        rect: Rect,
        width: u32,
        height: u32,
    },
    #[error("region name '{0}' is used more than once")]
    DuplicateName(String),
    #[error("template has no {0} region")]
    MissingRole(FieldRole),
    #[error("template has more than one {0} region")]
    DuplicateRole(FieldRole),
    #[error("template has no score regions")]
    NoScoreItems,
    #[error("regions '{first}' and '{second}' overlap")]
    Overlap { first: String, second: String },
}

/// Validated, read-only table of template regions
#[derive(Debug, Clone)]
pub struct RegionTable {
    regions: Vec<RegionSpec>,
    width: u32,
    height: u32,
}

impl RegionTable {
    /// Validate `regions` against a `width` x `height` canonical frame
    pub fn new(regions: Vec<RegionSpec>, width: u32, height: u32) -> Result<Self, RegionError> {
        for (i, region) in regions.iter().enumerate() {
            if region.rect.is_empty() {
                return Err(RegionError::EmptyRect {
                    name: region.name.clone(),
                    rect: region.rect,
                });
            }
            if !region.rect.fits_within(width, height) {
                return Err(RegionError::OutOfBounds {
                    name: region.name.clone(),
                    rect: region.rect,
                    width,
                    height,
                });
            }
            if regions[..i].iter().any(|r| r.name == region.name) {
                return Err(RegionError::DuplicateName(region.name.clone()));
            }
        }

        for role in [
            FieldRole::FamilyName,
            FieldRole::FirstName,
            FieldRole::StudentNumber,
            FieldRole::Total,
        ] {
            match regions.iter().filter(|r| r.role == role).count() {
                0 => return Err(RegionError::MissingRole(role)),
                1 => {}
                _ => return Err(RegionError::DuplicateRole(role)),
            }
        }

        if !regions.iter().any(|r| r.role == FieldRole::Score) {
            return Err(RegionError::NoScoreItems);
        }

        // Identity rows on the printed sheet touch each other; everything else must be disjoint.
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                let compatible = a.role.is_identity() && b.role.is_identity();
                if !compatible && a.rect.overlaps(&b.rect) {
                    return Err(RegionError::Overlap {
                        first: a.name.clone(),
                        second: b.name.clone(),
                    });
                }
            }
        }

        Ok(Self {
            regions,
            width,
            height,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionSpec> {
        self.regions.iter()
    }

    /// Canonical frame the table was validated against
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Region layout of the reference answer sheet at 800x1000
pub fn reference_template() -> Vec<RegionSpec> {
    const SCORE_ROWS: [(u32, u32); 11] = [
        (474, 499),
        (503, 528),
        (533, 558),
        (563, 588),
        (591, 616),
        (620, 647),
        (650, 676),
        (680, 706),
        (708, 735),
        (739, 765),
        (767, 794),
    ];

    let mut regions = vec![
        RegionSpec::new("Family Name", FieldRole::FamilyName, Rect::new(215, 64, 448, 103)),
        RegionSpec::new("First Name", FieldRole::FirstName, Rect::new(216, 100, 446, 133)),
        RegionSpec::new("Student Number", FieldRole::StudentNumber, Rect::new(216, 132, 364, 155)),
    ];
    regions.extend(SCORE_ROWS.iter().enumerate().map(|(i, &(y1, y2))| {
        RegionSpec::new(format!("Q{}", i + 1), FieldRole::Score, Rect::new(673, y1, 734, y2))
    }));
    regions.push(RegionSpec::new("Total", FieldRole::Total, Rect::new(659, 806, 742, 838)));
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Vec<RegionSpec> {
        vec![
            RegionSpec::new("Family Name", FieldRole::FamilyName, Rect::new(0, 0, 50, 10)),
            RegionSpec::new("First Name", FieldRole::FirstName, Rect::new(0, 8, 50, 20)),
            RegionSpec::new("Student Number", FieldRole::StudentNumber, Rect::new(0, 20, 50, 30)),
            RegionSpec::new("Q1", FieldRole::Score, Rect::new(60, 0, 80, 10)),
            RegionSpec::new("Total", FieldRole::Total, Rect::new(60, 20, 80, 30)),
        ]
    }

    #[test]
    fn test_reference_template_is_valid() {
        let table = RegionTable::new(reference_template(), 800, 1000).unwrap();
        assert_eq!(table.iter().count(), 15);
        assert_eq!(table.iter().filter(|r| r.role == FieldRole::Score).count(), 11);
        let last = table.iter().find(|r| r.name == "Q11").unwrap();
        assert_eq!(last.rect, Rect::new(673, 767, 734, 794));
        assert_eq!(table.iter().last().unwrap().role, FieldRole::Total);
    }

    #[test]
    fn test_reference_template_rejected_on_smaller_frame() {
        let err = RegionTable::new(reference_template(), 400, 500).unwrap_err();
        assert!(matches!(err, RegionError::OutOfBounds { .. }));
    }

    #[test]
    fn test_identity_regions_may_touch() {
        assert!(RegionTable::new(minimal(), 100, 40).is_ok());
    }

    #[test]
    fn test_score_overlapping_identity_rejected() {
        let mut regions = minimal();
        regions[3].rect = Rect::new(40, 0, 70, 10);
        let err = RegionTable::new(regions, 100, 40).unwrap_err();
        assert_eq!(
            err,
            RegionError::Overlap {
                first: "Family Name".to_string(),
                second: "Q1".to_string()
            }
        );
    }

    #[test]
    fn test_missing_and_duplicate_roles() {
        let mut regions = minimal();
        regions.retain(|r| r.role != FieldRole::Total);
        assert_eq!(
            RegionTable::new(regions, 100, 40).unwrap_err(),
            RegionError::MissingRole(FieldRole::Total)
        );

        let mut regions = minimal();
        regions.push(RegionSpec::new("Total 2", FieldRole::Total, Rect::new(85, 20, 95, 30)));
        assert_eq!(
            RegionTable::new(regions, 100, 40).unwrap_err(),
            RegionError::DuplicateRole(FieldRole::Total)
        );
    }

    #[test]
    fn test_duplicate_name_and_empty_rect() {
        let mut regions = minimal();
        regions.push(RegionSpec::new("Q1", FieldRole::Score, Rect::new(85, 0, 95, 10)));
        assert_eq!(
            RegionTable::new(regions, 100, 40).unwrap_err(),
            RegionError::DuplicateName("Q1".to_string())
        );

        let mut regions = minimal();
        regions[3].rect = Rect::new(60, 5, 60, 10);
        assert!(matches!(
            RegionTable::new(regions, 100, 40),
            Err(RegionError::EmptyRect { .. })
        ));
    }

    #[test]
    fn test_rect_serializes_as_array() {
        let spec = RegionSpec::new("Q1", FieldRole::Score, Rect::new(1, 2, 3, 4));
        let toml_str = toml::to_string(&spec).unwrap();
        assert!(toml_str.contains("rect = [1, 2, 3, 4]"));
        assert!(toml_str.contains("role = \"score\""));
        let parsed: RegionSpec = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, spec);
    }
}
