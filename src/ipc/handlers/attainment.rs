use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn calc_err(req: &Request, e: calc::CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

fn calc_context<'a>(conn: &'a Connection, course_id: &'a str) -> calc::CalcContext<'a> {
    calc::CalcContext { conn, course_id }
}

/// Drill-down primitive: one student against one CO. A null attainment is
/// the no-data case: the student has no mark on any mapped question.
fn handle_attainment_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let co_id = match required_str(req, "coId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match calc::compute_student_co_attainment(&calc_context(conn, &course_id), &co_id, &student_id)
    {
        Ok(attainment) => ok(&req.id, json!({ "attainment": attainment })),
        Err(e) => calc_err(req, e),
    }
}

fn handle_attainment_class_co(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let co_id = match required_str(req, "coId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match calc::compute_class_co_attainment(&calc_context(conn, &course_id), &co_id) {
        Ok(attainment) => ok(&req.id, json!({ "coAttainment": attainment })),
        Err(e) => calc_err(req, e),
    }
}

fn handle_attainment_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match calc::compute_course_attainment_summary(&calc_context(conn, &course_id), None) {
        Ok(summary) => ok(&req.id, json!({ "summary": summary })),
        Err(e) => calc_err(req, e),
    }
}

fn handle_attainment_persist(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match required_str(req, "semester") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match calc::persist_course_attainment(
        &calc_context(conn, &course_id),
        &academic_year,
        &semester,
        None,
    ) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => calc_err(req, e),
    }
}

fn handle_attainment_persisted_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT ca.co_id, co.code, ca.student_id, ca.academic_year, ca.semester,
                ca.percentage, ca.met_target, ca.calculated_at
         FROM course_attainments ca
         JOIN course_outcomes co ON co.id = ca.co_id
         WHERE ca.course_id = ?
         ORDER BY co.code, ca.student_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            let co_id: String = row.get(0)?;
            let co_code: String = row.get(1)?;
            let student_id: String = row.get(2)?;
            let academic_year: String = row.get(3)?;
            let semester: String = row.get(4)?;
            let percentage: f64 = row.get(5)?;
            let met_target: i64 = row.get(6)?;
            let calculated_at: String = row.get(7)?;
            Ok(json!({
                "coId": co_id,
                "coCode": co_code,
                "studentId": student_id,
                "academicYear": academic_year,
                "semester": semester,
                "percentage": percentage,
                "metTarget": met_target != 0,
                "calculatedAt": calculated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(attainments) => ok(&req.id, json!({ "attainments": attainments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attainment.student" => Some(handle_attainment_student(state, req)),
        "attainment.classCo" => Some(handle_attainment_class_co(state, req)),
        "attainment.course" => Some(handle_attainment_course(state, req)),
        "attainment.persist" => Some(handle_attainment_persist(state, req)),
        "attainment.persisted.list" => Some(handle_attainment_persisted_list(state, req)),
        _ => None,
    }
}
