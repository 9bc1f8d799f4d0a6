use crate::directory;
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{bad_field, db_conn, optional_str, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    match directory::list_classes(conn) {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::create_class(conn, &name) {
        Ok(class) => ok(&req.id, json!({ "classId": class.id, "name": class.name })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::list_students(conn, &class_id) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let admission_number = match optional_str(req, "admissionNumber") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::create_student(
        conn,
        &class_id,
        &first_name,
        &last_name,
        admission_number.as_deref(),
    ) {
        Ok(student) => ok(
            &req.id,
            json!({ "studentId": student.id, "displayName": student.display_name() }),
        ),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::list_terms(conn) {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start_date = match optional_str(req, "startDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let is_current = match req.params.get("isCurrent") {
        None | Some(serde_json::Value::Null) => false,
        Some(v) => match v.as_bool() {
            Some(b) => b,
            None => return bad_field(req, "isCurrent", "isCurrent must be a boolean"),
        },
    };
    match directory::create_term(conn, &name, start_date.as_deref(), is_current) {
        Ok(term) => ok(&req.id, json!({ "termId": term.id, "name": term.name })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::list_subjects(conn) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::create_subject(conn, &name) {
        Ok(subject) => ok(&req.id, json!({ "subjectId": subject.id, "name": subject.name })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_results_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let total_score = match required_f64(req, "totalScore") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let remarks = match optional_str(req, "remarks") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::upsert_result(
        conn,
        &student_id,
        &term_id,
        &subject_id,
        total_score,
        remarks.as_deref(),
    ) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match directory::list_results(conn, &student_id, &term_id) {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "terms.list" => Some(handle_terms_list(state, req)),
        "terms.create" => Some(handle_terms_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "results.upsert" => Some(handle_results_upsert(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        _ => None,
    }
}
