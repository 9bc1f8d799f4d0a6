use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{bad_field, db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::promotion::{self, PromotionDecision};
use serde_json::json;

fn handle_candidates(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match promotion::evaluate_candidates(conn, &class_id, &term_id) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn parse_decisions(req: &Request) -> Result<Vec<PromotionDecision>, serde_json::Value> {
    let Some(raw) = req.params.get("decisions").and_then(|v| v.as_array()) else {
        return Err(bad_field(req, "decisions", "decisions must be an array"));
    };
    let mut out = Vec::with_capacity(raw.len());
    for (index, item) in raw.iter().enumerate() {
        match serde_json::from_value::<PromotionDecision>(item.clone()) {
            Ok(d) => out.push(d),
            Err(e) => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("invalid decision: {}", e),
                    Some(json!({ "field": "decisions", "index": index })),
                ))
            }
        }
    }
    Ok(out)
}

fn handle_process(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "currentTermId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let decisions = match parse_decisions(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy_version = match optional_str(req, "policyVersion") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match promotion::process_promotions(conn, &decisions, &term_id, policy_version.as_deref()) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match optional_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match promotion::list_promotion_records(conn, &term_id, class_id.as_deref()) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotions.candidates" => Some(handle_candidates(state, req)),
        "promotions.process" => Some(handle_process(state, req)),
        "promotions.history" => Some(handle_history(state, req)),
        _ => None,
    }
}
