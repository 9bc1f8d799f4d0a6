use crate::db;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{bad_field, db_conn};
use crate::ipc::types::{AppState, Request};
use crate::promotion::{self, PromotionPolicy};
use serde_json::json;

#[derive(Clone, Copy)]
enum SetupSection {
    Promotion,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "promotion" => Some(Self::Promotion),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Promotion => promotion::SETTINGS_KEY,
        }
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match PromotionPolicy::load(conn) {
        Ok(v) => v,
        Err(e) => return engine_err(&req.id, &e),
    };
    ok(&req.id, json!({ "promotion": policy.to_json() }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return bad_field(req, "section", "missing section");
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return bad_field(req, "section", "unknown section");
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return bad_field(req, "patch", "patch must be an object");
    };

    let current = match section {
        SetupSection::Promotion => {
            let mut policy = match PromotionPolicy::load(conn) {
                Ok(v) => v,
                Err(e) => return engine_err(&req.id, &e),
            };
            if let Err(msg) = policy.merge_patch(patch_obj) {
                return bad_field(req, "patch", msg);
            }
            policy.to_json()
        }
    };
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section_raw, "setup section updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
