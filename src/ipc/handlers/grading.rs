use crate::grading::{self, GradingScaleInput, GradingSnapshot};
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{bad_field, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_scale(req: &Request) -> Result<GradingScaleInput, serde_json::Value> {
    let Some(raw) = req.params.get("scale") else {
        return Err(bad_field(req, "scale", "missing scale"));
    };
    serde_json::from_value::<GradingScaleInput>(raw.clone())
        .map_err(|e| bad_field(req, "scale", format!("invalid scale: {}", e)))
}

fn handle_scales_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match grading::list_scales(conn) {
        Ok(scales) => {
            let snapshot = GradingSnapshot::new(scales);
            ok(
                &req.id,
                json!({ "scales": snapshot.scales(), "version": snapshot.version() }),
            )
        }
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_scales_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input = match parse_scale(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match grading::create_scale(conn, &input) {
        Ok(scale) => ok(&req.id, json!({ "scale": scale })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_scales_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input = match parse_scale(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match grading::update_scale(conn, &id, &input) {
        Ok(scale) => ok(&req.id, json!({ "scale": scale })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_scales_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match grading::delete_scale(conn, &id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradingScales.list" => Some(handle_scales_list(state, req)),
        "gradingScales.create" => Some(handle_scales_create(state, req)),
        "gradingScales.update" => Some(handle_scales_update(state, req)),
        "gradingScales.delete" => Some(handle_scales_delete(state, req)),
        _ => None,
    }
}
