use crate::archive;
use crate::directory;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{bad_field, db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::report_card::{self, RemarksPatch};
use serde_json::json;
use std::path::PathBuf;

fn student_and_term(req: &Request) -> Result<(String, String), serde_json::Value> {
    let student_id = required_str(req, "studentId")?;
    let term_id = required_str(req, "termId")?;
    Ok((student_id, term_id))
}

fn class_and_term(req: &Request) -> Result<(String, String), serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let term_id = required_str(req, "termId")?;
    Ok((class_id, term_id))
}

fn handle_generate_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (student_id, term_id) = match student_and_term(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match report_card::generate_student_report(conn, &student_id, &term_id) {
        Ok(card) => ok(&req.id, json!(card)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_generate_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (class_id, term_id) = match class_and_term(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match report_card::generate_class_reports(conn, &class_id, &term_id) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "count": summary.succeeded,
                "failures": summary.failed,
            }),
        ),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_class_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (class_id, term_id) = match class_and_term(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match report_card::get_class_reports(conn, &class_id, &term_id) {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (student_id, term_id) = match student_and_term(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match report_card::get_student_report(conn, &student_id, &term_id) {
        Ok(card) => ok(&req.id, json!(card)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_update_remarks(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (student_id, term_id) = match student_and_term(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_teacher_remark = match optional_str(req, "classTeacherRemark") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let principal_remark = match optional_str(req, "principalRemark") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = RemarksPatch {
        class_teacher_remark,
        principal_remark,
    };
    match report_card::update_report_remarks(conn, &student_id, &term_id, patch) {
        Ok(card) => ok(&req.id, json!(card)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_export_term(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return bad_field(req, "outPath", "missing outPath"),
    };
    if let Err(e) = directory::ensure_term_exists(conn, &term_id) {
        return engine_err(&req.id, &e);
    }

    let export = match archive::export_term_archive(conn, &term_id, &PathBuf::from(&out_path)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "archiveFormat": export.archive_format,
            "reportCardCount": export.report_card_count,
            "promotionCount": export.promotion_count
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.generateStudent" => Some(handle_generate_student(state, req)),
        "reports.generateClass" => Some(handle_generate_class(state, req)),
        "reports.classList" => Some(handle_class_list(state, req)),
        "reports.get" => Some(handle_get(state, req)),
        "reports.updateRemarks" => Some(handle_update_remarks(state, req)),
        "reports.exportTerm" => Some(handle_export_term(state, req)),
        _ => None,
    }
}
