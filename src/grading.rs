use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use uuid::Uuid;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScale {
    pub id: String,
    pub grade: String,
    pub min_score: f64,
    pub max_score: f64,
    pub gpa_point: f64,
    pub remark: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScaleInput {
    pub grade: String,
    pub min_score: f64,
    pub max_score: f64,
    pub gpa_point: f64,
    #[serde(default)]
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResolution {
    pub grade: String,
    pub gpa_point: f64,
    pub remark: String,
}

pub fn check_score(score: f64) -> EngineResult<()> {
    if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(EngineError::InvalidScore(score));
    }
    Ok(())
}

/// Map a score onto the configured bands.
///
/// When bands overlap, the one with the highest `min_score` wins; remaining
/// ties prefer the narrower band, then the lexically smaller grade.
pub fn resolve(score: f64, scales: &[GradingScale]) -> EngineResult<GradeResolution> {
    check_score(score)?;
    scales
        .iter()
        .filter(|s| s.min_score <= score && score <= s.max_score)
        .max_by(|a, b| {
            a.min_score
                .total_cmp(&b.min_score)
                .then_with(|| b.max_score.total_cmp(&a.max_score))
                .then_with(|| b.grade.cmp(&a.grade))
        })
        .map(|s| GradeResolution {
            grade: s.grade.clone(),
            gpa_point: s.gpa_point,
            remark: s.remark.clone(),
        })
        .ok_or(EngineError::NoMatchingScale(score))
}

pub fn validate_scale(input: &GradingScaleInput) -> EngineResult<()> {
    if input.grade.trim().is_empty() {
        return Err(EngineError::validation("grade", "grade must not be empty"));
    }
    for (field, v) in [
        ("minScore", input.min_score),
        ("maxScore", input.max_score),
        ("gpaPoint", input.gpa_point),
    ] {
        if !v.is_finite() {
            return Err(EngineError::validation(field, format!("{} must be a finite number", field)));
        }
    }
    if !(MIN_SCORE..=MAX_SCORE).contains(&input.min_score) {
        return Err(EngineError::validation("minScore", "minScore must be within 0..=100"));
    }
    if !(MIN_SCORE..=MAX_SCORE).contains(&input.max_score) {
        return Err(EngineError::validation("maxScore", "maxScore must be within 0..=100"));
    }
    if input.min_score > input.max_score {
        return Err(EngineError::validation(
            "minScore",
            "minScore must not exceed maxScore",
        ));
    }
    if input.gpa_point < 0.0 {
        return Err(EngineError::validation("gpaPoint", "gpaPoint must not be negative"));
    }
    Ok(())
}

/// First stored band whose closed range intersects `input`, ignoring `exclude_id`.
pub fn find_overlap<'a>(
    input: &GradingScaleInput,
    existing: &'a [GradingScale],
    exclude_id: Option<&str>,
) -> Option<&'a GradingScale> {
    existing
        .iter()
        .filter(|s| Some(s.id.as_str()) != exclude_id)
        .find(|s| input.min_score <= s.max_score && s.min_score <= input.max_score)
}

/// SHA-256 over the ordered band set; changes whenever any band changes.
pub fn scales_fingerprint(scales: &[GradingScale]) -> String {
    let mut sorted: Vec<&GradingScale> = scales.iter().collect();
    sorted.sort_by(|a, b| match a.min_score.total_cmp(&b.min_score) {
        Ordering::Equal => a.grade.cmp(&b.grade),
        other => other,
    });
    let mut hasher = Sha256::new();
    for s in sorted {
        hasher.update(
            format!(
                "{}|{}|{}|{}|{}\n",
                s.grade, s.min_score, s.max_score, s.gpa_point, s.remark
            )
            .as_bytes(),
        );
    }
    format!("{:x}", hasher.finalize())
}

/// Immutable copy of the band table taken at the start of an operation.
#[derive(Debug, Clone)]
pub struct GradingSnapshot {
    scales: Vec<GradingScale>,
    version: String,
}

impl GradingSnapshot {
    pub fn new(scales: Vec<GradingScale>) -> Self {
        let version = scales_fingerprint(&scales);
        Self { scales, version }
    }

    pub fn load(conn: &Connection) -> EngineResult<Self> {
        let scales = list_scales(conn)?;
        if scales.is_empty() {
            return Err(EngineError::validation(
                "gradingScales",
                "no grading scales configured",
            ));
        }
        Ok(Self::new(scales))
    }

    pub fn resolve(&self, score: f64) -> EngineResult<GradeResolution> {
        resolve(score, &self.scales)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scales(&self) -> &[GradingScale] {
        &self.scales
    }
}

pub fn list_scales(conn: &Connection) -> EngineResult<Vec<GradingScale>> {
    let mut stmt = conn.prepare(
        "SELECT id, grade, min_score, max_score, gpa_point, remark
         FROM grading_scales
         ORDER BY min_score DESC, grade",
    )?;
    let scales = stmt
        .query_map([], |r| {
            Ok(GradingScale {
                id: r.get(0)?,
                grade: r.get(1)?,
                min_score: r.get(2)?,
                max_score: r.get(3)?,
                gpa_point: r.get(4)?,
                remark: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scales)
}

fn reject_overlap(
    input: &GradingScaleInput,
    existing: &[GradingScale],
    exclude_id: Option<&str>,
) -> EngineResult<()> {
    if let Some(other) = find_overlap(input, existing, exclude_id) {
        return Err(EngineError::validation(
            "minScore",
            format!(
                "band {}..={} overlaps grade {} ({}..={})",
                input.min_score, input.max_score, other.grade, other.min_score, other.max_score
            ),
        ));
    }
    Ok(())
}

pub fn create_scale(conn: &Connection, input: &GradingScaleInput) -> EngineResult<GradingScale> {
    validate_scale(input)?;
    let tx = conn.unchecked_transaction()?;
    let existing = list_scales(&tx)?;
    reject_overlap(input, &existing, None)?;

    let scale = GradingScale {
        id: Uuid::new_v4().to_string(),
        grade: input.grade.trim().to_string(),
        min_score: input.min_score,
        max_score: input.max_score,
        gpa_point: input.gpa_point,
        remark: input.remark.trim().to_string(),
    };
    tx.execute(
        "INSERT INTO grading_scales(id, grade, min_score, max_score, gpa_point, remark)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &scale.id,
            &scale.grade,
            scale.min_score,
            scale.max_score,
            scale.gpa_point,
            &scale.remark,
        ),
    )?;
    tx.commit()?;
    tracing::info!(grade = %scale.grade, min = scale.min_score, max = scale.max_score, "grading scale created");
    Ok(scale)
}

pub fn update_scale(
    conn: &Connection,
    id: &str,
    input: &GradingScaleInput,
) -> EngineResult<GradingScale> {
    validate_scale(input)?;
    let tx = conn.unchecked_transaction()?;
    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM grading_scales WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(EngineError::not_found("grading scale", id));
    }
    let existing = list_scales(&tx)?;
    reject_overlap(input, &existing, Some(id))?;

    let scale = GradingScale {
        id: id.to_string(),
        grade: input.grade.trim().to_string(),
        min_score: input.min_score,
        max_score: input.max_score,
        gpa_point: input.gpa_point,
        remark: input.remark.trim().to_string(),
    };
    tx.execute(
        "UPDATE grading_scales
         SET grade = ?, min_score = ?, max_score = ?, gpa_point = ?, remark = ?
         WHERE id = ?",
        (
            &scale.grade,
            scale.min_score,
            scale.max_score,
            scale.gpa_point,
            &scale.remark,
            &scale.id,
        ),
    )?;
    tx.commit()?;
    Ok(scale)
}

pub fn delete_scale(conn: &Connection, id: &str) -> EngineResult<()> {
    let n = conn.execute("DELETE FROM grading_scales WHERE id = ?", [id])?;
    if n == 0 {
        return Err(EngineError::not_found("grading scale", id));
    }
    Ok(())
}
