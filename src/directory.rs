use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::grading;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub admission_number: Option<String>,
    pub class_id: String,
}

impl StudentRecord {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRow {
    pub id: String,
    pub name: String,
    pub start_date: Option<String>,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub student_id: String,
    pub term_id: String,
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub total_score: f64,
    pub remarks: Option<String>,
}

fn non_empty(field: &str, value: &str) -> EngineResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(EngineError::validation(field, format!("{} must not be empty", field)));
    }
    Ok(v.to_string())
}

pub fn ensure_class_exists(conn: &Connection, class_id: &str) -> EngineResult<String> {
    conn.query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
        r.get(0)
    })
    .optional()?
    .ok_or_else(|| EngineError::not_found("class", class_id))
}

pub fn ensure_term_exists(conn: &Connection, term_id: &str) -> EngineResult<String> {
    conn.query_row("SELECT name FROM terms WHERE id = ?", [term_id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| EngineError::not_found("term", term_id))
}

pub fn list_classes(conn: &Connection) -> EngineResult<Vec<ClassRow>> {
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                student_count: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_class(conn: &Connection, name: &str) -> EngineResult<ClassRow> {
    let name = non_empty("name", name)?;
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO classes(id, name) VALUES(?, ?)", (&id, &name))?;
    Ok(ClassRow {
        id,
        name,
        student_count: 0,
    })
}

pub fn load_student(conn: &Connection, student_id: &str) -> EngineResult<StudentRecord> {
    conn.query_row(
        "SELECT id, first_name, last_name, admission_number, class_id
         FROM students
         WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRecord {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                admission_number: r.get(3)?,
                class_id: r.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("student", student_id))
}

pub fn list_students(conn: &Connection, class_id: &str) -> EngineResult<Vec<StudentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name, admission_number, class_id
         FROM students
         WHERE class_id = ?
         ORDER BY last_name, first_name, id",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(StudentRecord {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                admission_number: r.get(3)?,
                class_id: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_student(
    conn: &Connection,
    class_id: &str,
    first_name: &str,
    last_name: &str,
    admission_number: Option<&str>,
) -> EngineResult<StudentRecord> {
    ensure_class_exists(conn, class_id)?;
    let student = StudentRecord {
        id: Uuid::new_v4().to_string(),
        first_name: non_empty("firstName", first_name)?,
        last_name: non_empty("lastName", last_name)?,
        admission_number: admission_number
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        class_id: class_id.to_string(),
    };
    conn.execute(
        "INSERT INTO students(id, class_id, first_name, last_name, admission_number, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student.id,
            &student.class_id,
            &student.first_name,
            &student.last_name,
            &student.admission_number,
            db::now_rfc3339(),
        ),
    )?;
    Ok(student)
}

pub fn list_terms(conn: &Connection) -> EngineResult<Vec<TermRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, start_date, is_current
         FROM terms
         ORDER BY start_date IS NULL, start_date, name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(TermRow {
                id: r.get(0)?,
                name: r.get(1)?,
                start_date: r.get(2)?,
                is_current: r.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Marking a term current clears the flag on every other term.
pub fn create_term(
    conn: &Connection,
    name: &str,
    start_date: Option<&str>,
    is_current: bool,
) -> EngineResult<TermRow> {
    let name = non_empty("name", name)?;
    let start_date = match start_date.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                EngineError::validation("startDate", "startDate must be YYYY-MM-DD")
            })?;
            Some(raw.to_string())
        }
        None => None,
    };
    let term = TermRow {
        id: Uuid::new_v4().to_string(),
        name,
        start_date,
        is_current,
    };

    let tx = conn.unchecked_transaction()?;
    if is_current {
        tx.execute("UPDATE terms SET is_current = 0", [])?;
    }
    tx.execute(
        "INSERT INTO terms(id, name, start_date, is_current) VALUES(?, ?, ?, ?)",
        (&term.id, &term.name, &term.start_date, term.is_current as i64),
    )?;
    tx.commit()?;
    Ok(term)
}

pub fn list_subjects(conn: &Connection) -> EngineResult<Vec<SubjectRow>> {
    let mut stmt = conn.prepare("SELECT id, name FROM subjects ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_subject(conn: &Connection, name: &str) -> EngineResult<SubjectRow> {
    let subject = SubjectRow {
        id: Uuid::new_v4().to_string(),
        name: non_empty("name", name)?,
    };
    conn.execute(
        "INSERT INTO subjects(id, name) VALUES(?, ?)",
        (&subject.id, &subject.name),
    )?;
    Ok(subject)
}

/// Insert or replace one student's score for a subject in a term.
pub fn upsert_result(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
    subject_id: &str,
    total_score: f64,
    remarks: Option<&str>,
) -> EngineResult<()> {
    grading::check_score(total_score)?;
    let subject_id = non_empty("subjectId", subject_id)?;
    load_student(conn, student_id)?;
    ensure_term_exists(conn, term_id)?;

    let remarks = remarks.map(str::trim).filter(|s| !s.is_empty());
    conn.execute(
        "INSERT INTO subject_results(id, student_id, term_id, subject_id, total_score, remarks, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, term_id, subject_id) DO UPDATE SET
           total_score = excluded.total_score,
           remarks = excluded.remarks,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            term_id,
            &subject_id,
            total_score,
            remarks,
            db::now_rfc3339(),
        ),
    )?;
    Ok(())
}

/// Results ordered by subject id; aggregation relies on this order.
pub fn list_results(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> EngineResult<Vec<SubjectResult>> {
    let mut stmt = conn.prepare(
        "SELECT r.student_id, r.term_id, r.subject_id, sub.name, r.total_score, r.remarks
         FROM subject_results r
         LEFT JOIN subjects sub ON sub.id = r.subject_id
         WHERE r.student_id = ? AND r.term_id = ?
         ORDER BY r.subject_id",
    )?;
    let rows = stmt
        .query_map((student_id, term_id), |r| {
            Ok(SubjectResult {
                student_id: r.get(0)?,
                term_id: r.get(1)?,
                subject_id: r.get(2)?,
                subject_name: r.get(3)?,
                total_score: r.get(4)?,
                remarks: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn result_upsert_replaces_score_for_same_subject() {
        let conn = conn();
        let class = create_class(&conn, "JSS 1").expect("class");
        let s = create_student(&conn, &class.id, "Ada", "Obi", Some("ADM-1")).expect("student");
        let term = create_term(&conn, "First Term", Some("2026-09-08"), true).expect("term");

        upsert_result(&conn, &s.id, &term.id, "math", 40.0, None).expect("first");
        upsert_result(&conn, &s.id, &term.id, "math", 65.5, Some("improved")).expect("second");
        let results = list_results(&conn, &s.id, &term.id).expect("list");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].total_score, 65.5);
        assert_eq!(results[0].remarks.as_deref(), Some("improved"));
    }

    #[test]
    fn result_upsert_validates_score_and_references() {
        let conn = conn();
        let class = create_class(&conn, "JSS 1").expect("class");
        let s = create_student(&conn, &class.id, "Ada", "Obi", None).expect("student");
        let term = create_term(&conn, "First Term", None, false).expect("term");

        assert!(matches!(
            upsert_result(&conn, &s.id, &term.id, "math", 101.0, None),
            Err(EngineError::InvalidScore(_))
        ));
        assert!(matches!(
            upsert_result(&conn, "nope", &term.id, "math", 50.0, None),
            Err(EngineError::NotFound { entity: "student", .. })
        ));
        assert!(matches!(
            upsert_result(&conn, &s.id, "nope", "math", 50.0, None),
            Err(EngineError::NotFound { entity: "term", .. })
        ));
    }

    #[test]
    fn only_one_current_term() {
        let conn = conn();
        let t1 = create_term(&conn, "First Term", Some("2026-01-05"), true).expect("t1");
        let t2 = create_term(&conn, "Second Term", Some("2026-04-20"), true).expect("t2");
        let terms = list_terms(&conn).expect("list");
        let current: Vec<&str> = terms
            .iter()
            .filter(|t| t.is_current)
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(current, vec![t2.id.as_str()]);
        assert_eq!(terms[0].id, t1.id);
        assert!(create_term(&conn, "Bad", Some("20/04/2026"), false).is_err());
    }

    #[test]
    fn student_requires_existing_class() {
        let conn = conn();
        assert!(matches!(
            create_student(&conn, "missing", "Ada", "Obi", None),
            Err(EngineError::NotFound { entity: "class", .. })
        ));
    }
}
