use crate::calc::{self, StudentTermAverage};
use crate::db;
use crate::directory::{self, StudentRecord};
use crate::error::{EngineError, EngineResult};
use crate::grading::GradingSnapshot;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedSubject {
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub total_score: f64,
    pub grade: String,
    pub gpa_point: f64,
    pub remark: String,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub admission_number: Option<String>,
    pub term_id: String,
    pub class_id: String,
    pub results: Vec<GradedSubject>,
    pub total_score: f64,
    pub average_score: f64,
    pub gpa: f64,
    pub class_position: Option<i64>,
    pub total_students: Option<i64>,
    pub class_teacher_remark: Option<String>,
    pub principal_remark: Option<String>,
    pub policy_version: String,
    pub generated_at: String,
}

/// Staff-entered remarks. `None` leaves a remark untouched; an empty string clears it.
#[derive(Debug, Clone, Default)]
pub struct RemarksPatch {
    pub class_teacher_remark: Option<String>,
    pub principal_remark: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub student_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassBatchSummary {
    pub succeeded: usize,
    pub failed: Vec<BatchFailure>,
}

/// Competition-ranked positions of every student in a class with at least
/// one result for the term.
#[derive(Debug, Clone, Default)]
pub struct ClassRanking {
    positions: HashMap<String, i64>,
    total: i64,
}

impl ClassRanking {
    pub fn from_averages(averages: &[StudentTermAverage]) -> Self {
        let ranked: Vec<(String, f64)> = averages
            .iter()
            .filter_map(|a| a.average_score.map(|avg| (a.student_id.clone(), avg)))
            .collect();
        let total = ranked.len() as i64;
        let positions = calc::competition_ranks(&ranked).into_iter().collect();
        Self { positions, total }
    }

    pub fn compute(conn: &Connection, class_id: &str, term_id: &str) -> EngineResult<Self> {
        Ok(Self::from_averages(&calc::class_term_averages(
            conn, class_id, term_id,
        )?))
    }

    pub fn position(&self, student_id: &str) -> Option<i64> {
        self.positions.get(student_id).copied()
    }

    pub fn total(&self) -> i64 {
        self.total
    }
}

/// Generate (or refresh) one student's report card for a term.
#[tracing::instrument(skip(conn))]
pub fn generate_student_report(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> EngineResult<ReportCard> {
    let student = directory::load_student(conn, student_id)?;
    directory::ensure_term_exists(conn, term_id)?;
    let snapshot = GradingSnapshot::load(conn)?;
    let ranking = ClassRanking::compute(conn, &student.class_id, term_id)?;
    build_and_store(conn, &snapshot, &ranking, &student, term_id)
}

/// Generate report cards for every student currently assigned to the class.
///
/// One student's failure never stops the rest; it is recorded in the summary.
#[tracing::instrument(skip(conn))]
pub fn generate_class_reports(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
) -> EngineResult<ClassBatchSummary> {
    directory::ensure_class_exists(conn, class_id)?;
    directory::ensure_term_exists(conn, term_id)?;
    let snapshot = GradingSnapshot::load(conn)?;
    let ranking = ClassRanking::compute(conn, class_id, term_id)?;
    let students = directory::list_students(conn, class_id)?;

    let mut summary = ClassBatchSummary::default();
    for student in &students {
        match build_and_store(conn, &snapshot, &ranking, student, term_id) {
            Ok(_) => summary.succeeded += 1,
            Err(e) => {
                tracing::warn!(student_id = %student.id, code = e.code(), "report generation failed: {}", e);
                summary.failed.push(BatchFailure {
                    student_id: student.id.clone(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        class_id,
        term_id,
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        "class report batch finished"
    );
    Ok(summary)
}

fn build_and_store(
    conn: &Connection,
    snapshot: &GradingSnapshot,
    ranking: &ClassRanking,
    student: &StudentRecord,
    term_id: &str,
) -> EngineResult<ReportCard> {
    let results = directory::list_results(conn, &student.id, term_id)?;
    let Some(agg) = calc::aggregate_scores(results.iter().map(|r| r.total_score)) else {
        return Err(EngineError::NoResultsForTerm {
            student_id: student.id.clone(),
            term_id: term_id.to_string(),
        });
    };

    let mut graded = Vec::with_capacity(results.len());
    for r in &results {
        let g = snapshot.resolve(r.total_score)?;
        graded.push(GradedSubject {
            subject_id: r.subject_id.clone(),
            subject_name: r.subject_name.clone(),
            total_score: r.total_score,
            grade: g.grade,
            gpa_point: g.gpa_point,
            remark: g.remark,
            remarks: r.remarks.clone(),
        });
    }
    let gpa_points: Vec<f64> = graded.iter().map(|g| g.gpa_point).collect();
    let gpa = calc::mean_2dp(&gpa_points).unwrap_or(0.0);

    let class_position = ranking.position(&student.id);
    let total_students = class_position.map(|_| ranking.total());
    let generated_at = db::now_rfc3339();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO report_cards(
           id, student_id, term_id, class_id, total_score, average_score, gpa,
           class_position, total_students, policy_version, generated_at
         )
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, term_id) DO UPDATE SET
           class_id = excluded.class_id,
           total_score = excluded.total_score,
           average_score = excluded.average_score,
           gpa = excluded.gpa,
           class_position = excluded.class_position,
           total_students = excluded.total_students,
           policy_version = excluded.policy_version,
           generated_at = excluded.generated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            &student.id,
            term_id,
            &student.class_id,
            agg.total_score,
            agg.average_score,
            gpa,
            class_position,
            total_students,
            snapshot.version(),
            &generated_at,
        ],
    )?;
    let card_id: String = tx.query_row(
        "SELECT id FROM report_cards WHERE student_id = ? AND term_id = ?",
        (&student.id, term_id),
        |r| r.get(0),
    )?;
    tx.execute(
        "DELETE FROM report_card_subjects WHERE report_card_id = ?",
        [&card_id],
    )?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO report_card_subjects(
               report_card_id, subject_id, total_score, grade, gpa_point, remark, subject_remarks
             )
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )?;
        for g in &graded {
            insert.execute((
                &card_id,
                &g.subject_id,
                g.total_score,
                &g.grade,
                g.gpa_point,
                &g.remark,
                &g.remarks,
            ))?;
        }
    }
    tx.commit()?;

    tracing::debug!(student_id = %student.id, term_id, average = agg.average_score, ?class_position, "report card stored");
    get_student_report(conn, &student.id, term_id)
}

const CARD_SELECT: &str = "SELECT
       rc.id, rc.student_id, s.first_name, s.last_name, s.admission_number,
       rc.term_id, rc.class_id, rc.total_score, rc.average_score, rc.gpa,
       rc.class_position, rc.total_students, rc.class_teacher_remark,
       rc.principal_remark, rc.policy_version, rc.generated_at
     FROM report_cards rc
     JOIN students s ON s.id = rc.student_id";

fn card_from_row(r: &Row<'_>) -> rusqlite::Result<ReportCard> {
    let first: String = r.get(2)?;
    let last: String = r.get(3)?;
    Ok(ReportCard {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: format!("{} {}", first, last),
        admission_number: r.get(4)?,
        term_id: r.get(5)?,
        class_id: r.get(6)?,
        results: Vec::new(),
        total_score: r.get(7)?,
        average_score: r.get(8)?,
        gpa: r.get(9)?,
        class_position: r.get(10)?,
        total_students: r.get(11)?,
        class_teacher_remark: r.get(12)?,
        principal_remark: r.get(13)?,
        policy_version: r.get(14)?,
        generated_at: r.get(15)?,
    })
}

fn attach_subjects(conn: &Connection, card: &mut ReportCard) -> EngineResult<()> {
    let mut stmt = conn.prepare(
        "SELECT rs.subject_id, sub.name, rs.total_score, rs.grade, rs.gpa_point, rs.remark, rs.subject_remarks
         FROM report_card_subjects rs
         LEFT JOIN subjects sub ON sub.id = rs.subject_id
         WHERE rs.report_card_id = ?
         ORDER BY rs.subject_id",
    )?;
    card.results = stmt
        .query_map([&card.id], |r| {
            Ok(GradedSubject {
                subject_id: r.get(0)?,
                subject_name: r.get(1)?,
                total_score: r.get(2)?,
                grade: r.get(3)?,
                gpa_point: r.get(4)?,
                remark: r.get(5)?,
                remarks: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

pub fn get_student_report(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> EngineResult<ReportCard> {
    let sql = format!("{} WHERE rc.student_id = ? AND rc.term_id = ?", CARD_SELECT);
    let card = conn
        .query_row(&sql, (student_id, term_id), card_from_row)
        .optional()?;
    let Some(mut card) = card else {
        return Err(EngineError::not_found(
            "report card",
            &format!("{}/{}", student_id, term_id),
        ));
    };
    attach_subjects(conn, &mut card)?;
    Ok(card)
}

/// Stored cards for a class and term, best position first.
pub fn get_class_reports(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
) -> EngineResult<Vec<ReportCard>> {
    directory::ensure_class_exists(conn, class_id)?;
    directory::ensure_term_exists(conn, term_id)?;
    let sql = format!(
        "{} WHERE rc.class_id = ? AND rc.term_id = ?
         ORDER BY rc.class_position IS NULL, rc.class_position, s.last_name, s.first_name",
        CARD_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut cards = stmt
        .query_map((class_id, term_id), card_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for card in &mut cards {
        attach_subjects(conn, card)?;
    }
    Ok(cards)
}

pub fn list_term_reports(conn: &Connection, term_id: &str) -> EngineResult<Vec<ReportCard>> {
    let sql = format!(
        "{} WHERE rc.term_id = ?
         ORDER BY rc.class_id, rc.class_position IS NULL, rc.class_position, s.last_name, s.first_name",
        CARD_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut cards = stmt
        .query_map([term_id], card_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for card in &mut cards {
        attach_subjects(conn, card)?;
    }
    Ok(cards)
}

fn normalize_remark(raw: Option<String>) -> (bool, Option<String>) {
    match raw {
        None => (false, None),
        Some(s) => {
            let t = s.trim();
            (true, if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

/// Write staff remarks without touching any computed field.
pub fn update_report_remarks(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
    patch: RemarksPatch,
) -> EngineResult<ReportCard> {
    if patch.class_teacher_remark.is_none() && patch.principal_remark.is_none() {
        return Err(EngineError::validation(
            "classTeacherRemark",
            "supply classTeacherRemark and/or principalRemark",
        ));
    }
    let (set_teacher, teacher) = normalize_remark(patch.class_teacher_remark);
    let (set_principal, principal) = normalize_remark(patch.principal_remark);

    let n = conn.execute(
        "UPDATE report_cards SET
           class_teacher_remark = CASE WHEN ?1 THEN ?2 ELSE class_teacher_remark END,
           principal_remark = CASE WHEN ?3 THEN ?4 ELSE principal_remark END
         WHERE student_id = ?5 AND term_id = ?6",
        (set_teacher, teacher, set_principal, principal, student_id, term_id),
    )?;
    if n == 0 {
        return Err(EngineError::not_found(
            "report card",
            &format!("{}/{}", student_id, term_id),
        ));
    }
    get_student_report(conn, student_id, term_id)
}
