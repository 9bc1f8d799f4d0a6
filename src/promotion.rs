use crate::calc;
use crate::db;
use crate::directory;
use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const SETTINGS_KEY: &str = "setup.promotion";
pub const DEFAULT_PASS_THRESHOLD: f64 = 50.0;

pub const REASON_MEETS_CRITERIA: &str = "Average score meets promotion criteria";
pub const REASON_BELOW_THRESHOLD: &str = "Average score below promotion threshold";
pub const REASON_NO_DATA: &str = "No assessment data available";
pub const REASON_ALREADY_PROCESSED: &str = "Already processed for this term";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionAction {
    Promote,
    Retain,
}

impl PromotionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PromotionAction::Promote => "PROMOTE",
            PromotionAction::Retain => "RETAIN",
        }
    }

    fn default_reason(self) -> &'static str {
        match self {
            PromotionAction::Promote => "Promoted to next class",
            PromotionAction::Retain => "Retained in current class",
        }
    }
}

/// Workspace promotion settings (`setup.promotion`).
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionPolicy {
    pub pass_threshold: f64,
    pub require_policy_version: bool,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            require_policy_version: false,
        }
    }
}

impl PromotionPolicy {
    pub fn load(conn: &Connection) -> EngineResult<Self> {
        let mut policy = Self::default();
        if let Some(saved) = db::settings_get_json(conn, SETTINGS_KEY)? {
            if let Some(obj) = saved.as_object() {
                // Each saved field applies on its own; a bad one keeps its default.
                for (k, v) in obj {
                    if let Err(msg) = policy.merge_field(k, v) {
                        tracing::warn!(key = %k, "ignoring saved promotion setting: {}", msg);
                    }
                }
            }
        }
        Ok(policy)
    }

    /// All-or-nothing: the first invalid field rejects the patch.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = self.clone();
        for (k, v) in patch {
            next.merge_field(k, v)?;
        }
        *self = next;
        Ok(())
    }

    fn merge_field(&mut self, k: &str, v: &Value) -> Result<(), String> {
        match k {
            "passThreshold" => {
                let Some(n) = v.as_f64() else {
                    return Err("passThreshold must be a number".to_string());
                };
                if !(0.0..=100.0).contains(&n) {
                    return Err("passThreshold must be within 0..=100".to_string());
                }
                self.pass_threshold = n;
            }
            "requirePolicyVersion" => {
                let Some(b) = v.as_bool() else {
                    return Err("requirePolicyVersion must be a boolean".to_string());
                };
                self.require_policy_version = b;
            }
            _ => return Err(format!("unknown promotion field: {}", k)),
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "passThreshold": self.pass_threshold,
            "requirePolicyVersion": self.require_policy_version,
        })
    }

    /// Fingerprint of everything that influences a recommendation.
    pub fn version(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("passThreshold={}", self.pass_threshold).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn recommend(&self, average_score: Option<f64>) -> (PromotionAction, &'static str) {
        match average_score {
            None => (PromotionAction::Retain, REASON_NO_DATA),
            Some(avg) if avg >= self.pass_threshold => {
                (PromotionAction::Promote, REASON_MEETS_CRITERIA)
            }
            Some(_) => (PromotionAction::Retain, REASON_BELOW_THRESHOLD),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionCandidate {
    pub student_id: String,
    pub student_name: String,
    pub admission_number: Option<String>,
    pub average_score: Option<f64>,
    pub subject_count: usize,
    pub recommended_action: PromotionAction,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateReport {
    pub class_id: String,
    pub term_id: String,
    pub pass_threshold: f64,
    pub policy_version: String,
    pub candidates: Vec<PromotionCandidate>,
}

/// Recommend PROMOTE/RETAIN for every student in the class. Reads scores
/// directly; stored report cards are never consulted. Writes nothing.
pub fn evaluate_candidates(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
) -> EngineResult<CandidateReport> {
    directory::ensure_class_exists(conn, class_id)?;
    directory::ensure_term_exists(conn, term_id)?;
    let policy = PromotionPolicy::load(conn)?;

    let candidates = calc::class_term_averages(conn, class_id, term_id)?
        .into_iter()
        .map(|a| {
            let (action, reason) = policy.recommend(a.average_score);
            PromotionCandidate {
                student_name: a.display_name(),
                student_id: a.student_id,
                admission_number: a.admission_number,
                average_score: a.average_score,
                subject_count: a.subject_count,
                recommended_action: action,
                reason: reason.to_string(),
            }
        })
        .collect();

    Ok(CandidateReport {
        class_id: class_id.to_string(),
        term_id: term_id.to_string(),
        pass_threshold: policy.pass_threshold,
        policy_version: policy.version(),
        candidates,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionDecision {
    pub student_id: String,
    pub action: PromotionAction,
    #[serde(default)]
    pub target_class_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedDecision {
    pub student_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionSummary {
    pub applied: Vec<String>,
    pub skipped: Vec<SkippedDecision>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub term_id: String,
    pub from_class_id: String,
    pub to_class_id: String,
    pub action: String,
    pub reason: String,
    pub processed_at: String,
}

enum Outcome {
    Applied,
    Skipped(String),
}

/// Commit reviewed decisions for the term.
///
/// Each student is its own transaction. Per-student problems land in
/// `skipped`; only request-level problems (unknown term, stale or missing
/// policy version) fail the call, and they do so before any write.
#[tracing::instrument(skip(conn, decisions), fields(decisions = decisions.len()))]
pub fn process_promotions(
    conn: &Connection,
    decisions: &[PromotionDecision],
    term_id: &str,
    policy_version: Option<&str>,
) -> EngineResult<PromotionSummary> {
    directory::ensure_term_exists(conn, term_id)?;
    let policy = PromotionPolicy::load(conn)?;
    let current = policy.version();
    match policy_version {
        Some(v) if v != current => {
            return Err(EngineError::StalePolicy {
                expected: v.to_string(),
                current,
            });
        }
        None if policy.require_policy_version => {
            return Err(EngineError::validation(
                "policyVersion",
                "policyVersion is required by the promotion settings",
            ));
        }
        _ => {}
    }

    let mut summary = PromotionSummary::default();
    for d in decisions {
        match apply_decision(conn, d, term_id) {
            Ok(Outcome::Applied) => summary.applied.push(d.student_id.clone()),
            Ok(Outcome::Skipped(reason)) => {
                tracing::debug!(student_id = %d.student_id, %reason, "promotion decision skipped");
                summary.skipped.push(SkippedDecision {
                    student_id: d.student_id.clone(),
                    reason,
                });
            }
            Err(e) => {
                tracing::warn!(student_id = %d.student_id, "promotion decision failed: {}", e);
                summary.skipped.push(SkippedDecision {
                    student_id: d.student_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        term_id,
        applied = summary.applied.len(),
        skipped = summary.skipped.len(),
        "promotion batch finished"
    );
    Ok(summary)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

/// The processed check and the class move share one `BEGIN IMMEDIATE`
/// transaction; `UNIQUE(student_id, term_id)` settles cross-process races.
fn apply_decision(
    conn: &Connection,
    d: &PromotionDecision,
    term_id: &str,
) -> EngineResult<Outcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let student = match directory::load_student(&tx, &d.student_id) {
        Ok(s) => s,
        Err(EngineError::NotFound { .. }) => {
            return Ok(Outcome::Skipped("Student not found".to_string()))
        }
        Err(e) => return Err(e),
    };

    let processed: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM promotion_records WHERE student_id = ? AND term_id = ?",
            (&student.id, term_id),
            |r| r.get(0),
        )
        .optional()?;
    if processed.is_some() {
        return Ok(Outcome::Skipped(REASON_ALREADY_PROCESSED.to_string()));
    }

    let to_class_id = match d.action {
        PromotionAction::Retain => student.class_id.clone(),
        PromotionAction::Promote => {
            let target = d
                .target_class_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty());
            let Some(target) = target else {
                return Ok(Outcome::Skipped(
                    "Target class is required for promotion".to_string(),
                ));
            };
            if target == student.class_id {
                return Ok(Outcome::Skipped(
                    "Target class must differ from current class".to_string(),
                ));
            }
            match directory::ensure_class_exists(&tx, target) {
                Ok(_) => {}
                Err(EngineError::NotFound { .. }) => {
                    return Ok(Outcome::Skipped("Target class not found".to_string()))
                }
                Err(e) => return Err(e),
            }
            target.to_string()
        }
    };

    let reason = d
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(d.action.default_reason());
    let now = db::now_rfc3339();

    if d.action == PromotionAction::Promote {
        tx.execute(
            "UPDATE students SET class_id = ?, updated_at = ? WHERE id = ?",
            (&to_class_id, &now, &student.id),
        )?;
    }
    let inserted = tx.execute(
        "INSERT INTO promotion_records(
           id, student_id, term_id, from_class_id, to_class_id, action, reason, processed_at
         )
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &student.id,
            term_id,
            &student.class_id,
            &to_class_id,
            d.action.as_str(),
            reason,
            &now,
        ),
    );
    match inserted {
        Ok(_) => {}
        // Dropping the transaction rolls back the class move as well.
        Err(e) if is_unique_violation(&e) => {
            return Ok(Outcome::Skipped(REASON_ALREADY_PROCESSED.to_string()))
        }
        Err(e) => return Err(e.into()),
    }
    tx.commit()?;
    Ok(Outcome::Applied)
}

/// Committed records for a term, optionally limited to moves out of or into a class.
pub fn list_promotion_records(
    conn: &Connection,
    term_id: &str,
    class_id: Option<&str>,
) -> EngineResult<Vec<PromotionRecord>> {
    directory::ensure_term_exists(conn, term_id)?;
    let mut stmt = conn.prepare(
        "SELECT pr.id, pr.student_id, s.first_name, s.last_name, pr.term_id,
                pr.from_class_id, pr.to_class_id, pr.action, pr.reason, pr.processed_at
         FROM promotion_records pr
         JOIN students s ON s.id = pr.student_id
         WHERE pr.term_id = ?1
           AND (?2 IS NULL OR pr.from_class_id = ?2 OR pr.to_class_id = ?2)
         ORDER BY pr.processed_at, s.last_name, s.first_name",
    )?;
    let rows = stmt
        .query_map((term_id, class_id), |r| {
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            Ok(PromotionRecord {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: format!("{} {}", first, last),
                term_id: r.get(4)?,
                from_class_id: r.get(5)?,
                to_class_id: r.get(6)?,
                action: r.get(7)?,
                reason: r.get(8)?,
                processed_at: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
