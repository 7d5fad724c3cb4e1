use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::{transition_course_status, CourseStatus};
use serde_json::json;

fn handle_course_transition_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let status = match req.params.get("status").and_then(|v| v.as_str()) {
        Some(raw) => match CourseStatus::parse(raw) {
            Some(v) => v,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be one of: future, active, completed",
                    Some(json!({ "status": raw })),
                )
            }
        },
        None => return err(&req.id, "bad_params", "missing status", None),
    };

    match transition_course_status(conn, &course_id, status) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "course.transitionStatus" => Some(handle_course_transition_status(state, req)),
        _ => None,
    }
}
