use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn handle_student_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let program = match required_str(req, "program") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let batch = match required_str(req, "batch") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let roll_no = req
        .params
        .get("rollNo")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string());

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, roll_no, program, batch, active)
         VALUES(?, ?, ?, ?, ?, 1)",
        (&student_id, &name, &roll_no, &program, &batch),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

fn handle_student_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing active", None);
    };

    let updated = match conn.execute(
        "UPDATE students SET active = ? WHERE id = ?",
        (active as i64, &student_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "studentId": student_id, "active": active }))
}

fn handle_enrollment_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    // Default the tag to the course's own semester label.
    let course_semester: Option<String> = match conn
        .query_row(
            "SELECT semester FROM courses WHERE id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_semester) = course_semester else {
        return err(&req.id, "not_found", "course not found", None);
    };
    let semester = req
        .params
        .get("semester")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or(course_semester);

    // The partial unique index keeps one live enrollment per pair;
    // a duplicate request is reported, not failed.
    let enrollment_id = Uuid::new_v4().to_string();
    let inserted = match conn.execute(
        "INSERT OR IGNORE INTO enrollments(
            id, student_id, course_id, semester, enrolled_at, deleted_at)
         VALUES(?, ?, ?, ?, ?, NULL)",
        (
            &enrollment_id,
            &student_id,
            &course_id,
            &semester,
            Utc::now().to_rfc3339(),
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "courseId": course_id,
            "created": inserted > 0
        }),
    )
}

fn handle_enrollment_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated = match conn.execute(
        "UPDATE enrollments SET deleted_at = ?
         WHERE student_id = ? AND course_id = ? AND deleted_at IS NULL",
        (Utc::now().to_rfc3339(), &student_id, &course_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "active enrollment not found", None);
    }

    ok(&req.id, json!({ "studentId": student_id, "courseId": course_id }))
}

fn handle_enrollment_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let include_inactive = req
        .params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if include_inactive {
        "SELECT e.student_id, s.name, e.semester, e.enrolled_at, e.deleted_at
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.course_id = ?
         ORDER BY s.name"
    } else {
        "SELECT e.student_id, s.name, e.semester, e.enrolled_at, e.deleted_at
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.course_id = ? AND e.deleted_at IS NULL
         ORDER BY s.name"
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            let student_id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let semester: Option<String> = row.get(2)?;
            let enrolled_at: Option<String> = row.get(3)?;
            let deleted_at: Option<String> = row.get(4)?;
            Ok(json!({
                "studentId": student_id,
                "name": name,
                "semester": semester,
                "enrolledAt": enrolled_at,
                "active": deleted_at.is_none()
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "student.create" => Some(handle_student_create(state, req)),
        "student.setActive" => Some(handle_student_set_active(state, req)),
        "enrollment.create" => Some(handle_enrollment_create(state, req)),
        "enrollment.deactivate" => Some(handle_enrollment_deactivate(state, req)),
        "enrollment.list" => Some(handle_enrollment_list(state, req)),
        _ => None,
    }
}
