//! Continuous-assessment and exam scoring.
//!
//! An assessment is scored out of 100: two continuous assessments worth 20
//! each and an exam worth 60. Grades come from fixed bands on the total.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};

/// Maximum for each continuous assessment.
pub const MAX_CA: f64 = 20.0;

/// Maximum for the exam.
pub const MAX_EXAM: f64 = 60.0;

/// Lowest passing total.
pub const PASS_MARK: f64 = 40.0;

/// Raw scores for one student in one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    #[serde(rename = "firstCA")]
    pub first_ca: f64,
    #[serde(rename = "secondCA")]
    pub second_ca: f64,
    pub exam: f64,
}

impl Scores {
    pub fn new(first_ca: f64, second_ca: f64, exam: f64) -> Self {
        Self {
            first_ca,
            second_ca,
            exam,
        }
    }

    /// Check every component is finite and inside its range.
    pub fn validate(&self) -> Result<()> {
        check("firstCA", self.first_ca, MAX_CA)?;
        check("secondCA", self.second_ca, MAX_CA)?;
        check("exam", self.exam, MAX_EXAM)
    }

    /// Sum of all components.
    pub fn total(&self) -> f64 {
        self.first_ca + self.second_ca + self.exam
    }

    /// Letter grade for the total.
    pub fn grade(&self) -> Grade {
        Grade::from_total(self.total())
    }

    pub fn passed(&self) -> bool {
        self.total() >= PASS_MARK
    }

    /// Validate and summarise in one step.
    pub fn summary(&self) -> Result<GradeSummary> {
        self.validate()?;
        let total = self.total();
        Ok(GradeSummary {
            total,
            grade: Grade::from_total(total),
            passed: total >= PASS_MARK,
        })
    }
}

fn check(field: &'static str, value: f64, max: f64) -> Result<()> {
    if value.is_finite() && (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::ScoreOutOfRange { field, value, max })
    }
}

/// Letter grade bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Grade {
    /// Band a total score. Bands are inclusive at their lower bound.
    pub fn from_total(total: f64) -> Self {
        match total {
            t if t >= 70.0 => Grade::A,
            t if t >= 60.0 => Grade::B,
            t if t >= 50.0 => Grade::C,
            t if t >= 45.0 => Grade::D,
            t if t >= PASS_MARK => Grade::E,
            _ => Grade::F,
        }
    }

    /// Report-card remark for the grade.
    pub fn remark(&self) -> &'static str {
        match self {
            Grade::A => "Excellent",
            Grade::B => "Very Good",
            Grade::C => "Good",
            Grade::D => "Fair",
            Grade::E => "Pass",
            Grade::F => "Fail",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::F => "F",
        };
        f.write_str(letter)
    }
}

/// Derived result for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub total: f64,
    pub grade: Grade,
    pub passed: bool,
}
