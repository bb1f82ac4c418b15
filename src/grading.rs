use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// KCSE-style grade bands, descending by threshold. Scores at or above the
/// threshold earn the letter; anything below the last threshold is "E".
pub const GRADE_BANDS: [(f64, &str); 10] = [
    (90.0, "A"),
    (80.0, "A-"),
    (75.0, "B+"),
    (70.0, "B"),
    (65.0, "B-"),
    (60.0, "C+"),
    (55.0, "C"),
    (50.0, "C-"),
    (45.0, "D+"),
    (40.0, "D"),
];

pub const BOTTOM_GRADE: &str = "E";

/// Canonical letter order (classifier order), used for distribution buckets.
pub const GRADE_LETTERS: [&str; 11] = [
    "A", "A-", "B+", "B", "B-", "C+", "C", "C-", "D+", "D", "E",
];

/// Total over all of f64: out-of-range input falls through to the top or
/// bottom band rather than failing.
pub fn classify(score: f64) -> &'static str {
    for (threshold, letter) in GRADE_BANDS {
        if score >= threshold {
            return letter;
        }
    }
    BOTTOM_GRADE
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Scores arrive from the UI either as JSON numbers or as numeric strings
/// (free-text grade cells). Anything else is `invalid_score_format`.
pub fn parse_score(raw: &serde_json::Value) -> Result<f64, GradeError> {
    let parsed = match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(GradeError::new(
            "invalid_score_format",
            format!("score is not numeric: {}", raw),
        )),
    }
}

/// Round half away from zero at the first decimal. Scores are non-negative,
/// so `Int(10x + 0.5) / 10` is exact for the half case.
pub fn round1(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Arithmetic mean carried to one decimal. An empty score list is an
/// explicit error rather than a silent NaN.
pub fn average(scores: &[f64]) -> Result<f64, GradeError> {
    if scores.is_empty() {
        return Err(GradeError::new(
            "insufficient_data",
            "no scores to average",
        ));
    }
    let sum: f64 = scores.iter().sum();
    Ok(round1(sum / scores.len() as f64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    Pending,
    Approved,
}

impl GradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeStatus::Pending => "pending",
            GradeStatus::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GradeStatus::Pending),
            "approved" => Some(GradeStatus::Approved),
            _ => None,
        }
    }
}

/// One recorded measurement for one subject in one reporting period.
/// `letter_grade` is always derived from `score` via `classify`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject: String,
    pub score: f64,
    pub letter_grade: String,
    pub status: GradeStatus,
}

/// Typed composite key for score edits. Replaces the old
/// `"{studentId}-{subject}"` string concatenation, which could collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScoreKey {
    pub student_id: String,
    pub subject: String,
}

/// Per-student input to ranking: already-aggregated average and grade.
#[derive(Debug, Clone)]
pub struct StudentStanding {
    pub name: String,
    pub subject_count: usize,
    pub average: f64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub position: usize,
    pub name: String,
    pub subject_count: usize,
    pub average: f64,
    pub grade: String,
}

/// Stable sort descending by average; equal averages keep their input order.
/// Position is the 1-based index after sorting.
pub fn rank(mut standings: Vec<StudentStanding>) -> Vec<RankedStudent> {
    standings.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(Ordering::Equal)
    });
    standings
        .into_iter()
        .enumerate()
        .map(|(i, s)| RankedStudent {
            position: i + 1,
            name: s.name,
            subject_count: s.subject_count,
            average: s.average,
            grade: s.grade,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBucket {
    pub grade: String,
    pub count: usize,
    pub percentage: i64,
}

/// Buckets follow classifier order (A first), letters with zero students are
/// omitted, and percentages are integer-rounded.
pub fn distribution(ranked: &[RankedStudent]) -> Vec<GradeBucket> {
    let total = ranked.len();
    if total == 0 {
        return Vec::new();
    }
    GRADE_LETTERS
        .iter()
        .filter_map(|letter| {
            let count = ranked.iter().filter(|r| r.grade == *letter).count();
            if count == 0 {
                return None;
            }
            Some(GradeBucket {
                grade: letter.to_string(),
                count,
                percentage: ((count as f64 / total as f64) * 100.0).round() as i64,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassOverview {
    pub student_count: usize,
    pub class_average: f64,
    pub class_grade: String,
}

/// Class average is the mean of per-student averages, not of raw scores.
pub fn class_overview(ranked: &[RankedStudent]) -> Option<ClassOverview> {
    if ranked.is_empty() {
        return None;
    }
    let sum: f64 = ranked.iter().map(|r| r.average).sum();
    let class_average = round1(sum / ranked.len() as f64);
    Some(ClassOverview {
        student_count: ranked.len(),
        class_average,
        class_grade: classify(class_average).to_string(),
    })
}

/// One grades-table row: a student plus their subject scores for the period.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub student_id: String,
    pub name: String,
    pub subjects: Vec<SubjectScore>,
    pub average: Option<f64>,
}

impl StudentRow {
    pub fn score_for(&self, subject: &str) -> Option<f64> {
        self.subjects
            .iter()
            .find(|s| s.subject == subject)
            .map(|s| s.score)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortField {
    Name,
    Average,
    Subject(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Pure table sort: explicit field and direction, no process-wide sort state.
/// Missing averages and missing subject scores compare as 0. Ties keep their
/// incoming order in both directions, so descending flips the comparator
/// rather than reversing the sorted slice.
pub fn sort_rows(rows: &mut [StudentRow], field: &SortField, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let cmp = match field {
            SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortField::Average => {
                let av = a.average.unwrap_or(0.0);
                let bv = b.average.unwrap_or(0.0);
                av.partial_cmp(&bv).unwrap_or(Ordering::Equal)
            }
            SortField::Subject(subject) => {
                let av = a.score_for(subject).unwrap_or(0.0);
                let bv = b.score_for(subject).unwrap_or(0.0);
                av.partial_cmp(&bv).unwrap_or(Ordering::Equal)
            }
        };
        match direction {
            SortDirection::Asc => cmp,
            SortDirection::Desc => cmp.reverse(),
        }
    });
}
