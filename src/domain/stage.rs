//! CKD stages and the eGFR thresholds that define them (KDIGO bands).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// CKD severity stage, 1 (normal/high eGFR) through 5 (kidney failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CkdStage {
    Stage1,
    Stage2,
    Stage3,
    Stage4,
    Stage5,
}

impl CkdStage {
    pub const ALL: [Self; 5] = [
        Self::Stage1,
        Self::Stage2,
        Self::Stage3,
        Self::Stage4,
        Self::Stage5,
    ];

    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::Stage1 => 1,
            Self::Stage2 => 2,
            Self::Stage3 => 3,
            Self::Stage4 => 4,
            Self::Stage5 => 5,
        }
    }

    #[must_use]
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Stage1),
            2 => Some(Self::Stage2),
            3 => Some(Self::Stage3),
            4 => Some(Self::Stage4),
            5 => Some(Self::Stage5),
            _ => None,
        }
    }

    /// Zero-based class index used by the stage classifier.
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl fmt::Display for CkdStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

// Stages travel as the strings "1".."5", which is what the frontend expects.
impl Serialize for CkdStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CkdStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .parse::<u8>()
            .ok()
            .and_then(Self::from_number)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid CKD stage {raw:?}")))
    }
}

/// Lower eGFR bounds for stages 1-4; anything below the last bound is stage 5.
///
/// Bounds are inclusive below and exclusive above, so the bands are contiguous
/// and every real eGFR maps to exactly one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageThresholds {
    lower_bounds: [f64; 4],
}

impl Default for StageThresholds {
    fn default() -> Self {
        Self {
            lower_bounds: [90.0, 60.0, 30.0, 15.0],
        }
    }
}

impl StageThresholds {
    /// Build thresholds from stage 1-4 lower bounds.
    ///
    /// # Errors
    /// Returns an error if any bound is non-finite or the bounds are not
    /// strictly descending.
    pub fn new(lower_bounds: [f64; 4]) -> Result<Self, String> {
        let thresholds = Self { lower_bounds };
        thresholds.check()?;
        Ok(thresholds)
    }

    /// Re-check invariants (used after deserialization).
    ///
    /// # Errors
    /// Same conditions as [`StageThresholds::new`].
    pub fn check(&self) -> Result<(), String> {
        if self.lower_bounds.iter().any(|b| !b.is_finite()) {
            return Err("stage thresholds must be finite".to_string());
        }
        if self.lower_bounds.windows(2).any(|w| w[0] <= w[1]) {
            return Err(format!(
                "stage thresholds must be strictly descending, got {:?}",
                self.lower_bounds
            ));
        }
        Ok(())
    }

    /// Map an eGFR value to its stage. NaN maps to stage 5.
    #[must_use]
    pub fn stage_for(&self, egfr: f64) -> CkdStage {
        CkdStage::ALL
            .iter()
            .zip(self.lower_bounds.iter())
            .find(|(_, lower)| egfr >= **lower)
            .map_or(CkdStage::Stage5, |(stage, _)| *stage)
    }

    /// `[lower, upper)` eGFR band of a stage; open ends are infinite.
    #[must_use]
    pub fn band(&self, stage: CkdStage) -> (f64, f64) {
        let i = stage.index();
        let lower = self.lower_bounds.get(i).copied().unwrap_or(f64::NEG_INFINITY);
        let upper = if i == 0 {
            f64::INFINITY
        } else {
            self.lower_bounds[i - 1]
        };
        (lower, upper)
    }
}
