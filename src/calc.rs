use crate::error::EngineResult;
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Guards against values like `1.005` landing just below the half step.
const HALF_UP_NUDGE: f64 = 1e-7;

/// Round-half-up to 2 decimal places: `Int(100*x + 0.5) / 100`.
/// Inputs are non-negative (scores and their means).
pub fn round_half_up_2(x: f64) -> f64 {
    ((100.0 * x) + 0.5 + HALF_UP_NUDGE).floor() / 100.0
}

/// Hundredths as an integer, for exact equality between rounded averages.
pub fn hundredths(x: f64) -> i64 {
    (round_half_up_2(x) * 100.0).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreAggregate {
    pub total_score: f64,
    pub average_score: f64,
    pub count: usize,
}

/// Sum and mean of per-subject scores. `None` when there is nothing to average.
/// Only the mean is rounded; the total is the plain sum.
///
/// Callers must feed scores in a stable order (by subject id) so that the
/// same data always produces bit-identical sums.
pub fn aggregate_scores<I>(scores: I) -> Option<ScoreAggregate>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for s in scores {
        sum += s;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(ScoreAggregate {
        total_score: sum,
        average_score: round_half_up_2(sum / (count as f64)),
        count,
    })
}

pub fn mean_2dp(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    Some(round_half_up_2(sum / (values.len() as f64)))
}

/// Standard competition ranking ("1224"): equal averages share a position and
/// the next distinct average skips the tied slots.
///
/// Output follows rank order; ties keep the input order.
pub fn competition_ranks<K: Clone>(entries: &[(K, f64)]) -> Vec<(K, i64)> {
    let mut order: Vec<(usize, i64)> = entries
        .iter()
        .enumerate()
        .map(|(i, (_, avg))| (i, hundredths(*avg)))
        .collect();
    order.sort_by(|a, b| match b.1.cmp(&a.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });

    let mut out = Vec::with_capacity(order.len());
    let mut prev: Option<i64> = None;
    let mut rank = 0_i64;
    for (pos, (idx, key)) in order.iter().enumerate() {
        if prev != Some(*key) {
            rank = pos as i64 + 1;
            prev = Some(*key);
        }
        out.push((entries[*idx].0.clone(), rank));
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTermAverage {
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub admission_number: Option<String>,
    pub subject_count: usize,
    pub total_score: Option<f64>,
    pub average_score: Option<f64>,
}

impl StudentTermAverage {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Per-student term aggregates for everyone currently assigned to `class_id`,
/// computed straight from `subject_results`. Students without results are
/// included with `None` aggregates.
pub fn class_term_averages(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
) -> EngineResult<Vec<StudentTermAverage>> {
    let mut students_stmt = conn.prepare(
        "SELECT id, first_name, last_name, admission_number
         FROM students
         WHERE class_id = ?
         ORDER BY last_name, first_name, id",
    )?;
    let students: Vec<(String, String, String, Option<String>)> = students_stmt
        .query_map([class_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut scores_stmt = conn.prepare(
        "SELECT r.student_id, r.total_score
         FROM subject_results r
         JOIN students s ON s.id = r.student_id
         WHERE s.class_id = ? AND r.term_id = ?
         ORDER BY r.student_id, r.subject_id",
    )?;
    let mut scores_by_student: HashMap<String, Vec<f64>> = HashMap::new();
    let rows = scores_stmt.query_map((class_id, term_id), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })?;
    for row in rows {
        let (student_id, score) = row?;
        scores_by_student.entry(student_id).or_default().push(score);
    }

    Ok(students
        .into_iter()
        .map(|(student_id, first_name, last_name, admission_number)| {
            let agg = scores_by_student
                .get(&student_id)
                .and_then(|scores| aggregate_scores(scores.iter().copied()));
            StudentTermAverage {
                student_id,
                first_name,
                last_name,
                admission_number,
                subject_count: agg.map(|a| a.count).unwrap_or(0),
                total_score: agg.map(|a| a.total_score),
                average_score: agg.map(|a| a.average_score),
            }
        })
        .collect())
}
