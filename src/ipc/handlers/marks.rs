use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const MARKS_SET_MAX_ROWS: usize = 5000;

struct HandlerErr {
    code: &'static str,
    message: String,
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn upsert_mark(
    conn: &Connection,
    question_id: &str,
    student_id: &str,
    obtained_marks: f64,
    academic_year: &str,
    semester: &str,
) -> Result<(), HandlerErr> {
    let mark_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO student_marks(
            id, question_id, student_id, obtained_marks, academic_year, semester)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(question_id, student_id) DO UPDATE SET
           obtained_marks = excluded.obtained_marks,
           academic_year = excluded.academic_year,
           semester = excluded.semester",
        (
            &mark_id,
            question_id,
            student_id,
            obtained_marks,
            academic_year,
            semester,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
    })?;
    Ok(())
}

fn question_exists(conn: &Connection, question_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM questions WHERE id = ?", [question_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
    })
}

/// Bulk mark entry. Rows are validated and written independently; a bad
/// row is reported back by index and never aborts the rest of the batch.
/// obtained <= maxMarks is deliberately not checked here (moderation and
/// re-totals live upstream of this store).
fn handle_marks_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(rows) = req.params.get("marks").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing marks[]", None);
    };

    if rows.len() > MARKS_SET_MAX_ROWS {
        return err(
            &req.id,
            "bad_params",
            format!(
                "marks payload exceeds max rows: {} > {}",
                rows.len(),
                MARKS_SET_MAX_ROWS
            ),
            None,
        );
    }

    let mut updated = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "mark row must be an object"
            }));
            continue;
        };

        let question_id = match obj.get("questionId").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "missing questionId"
                }));
                continue;
            }
        };
        let student_id = match obj.get("studentId").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "missing studentId"
                }));
                continue;
            }
        };
        let obtained = match obj.get("obtainedMarks").and_then(|v| v.as_f64()) {
            Some(v) if v >= 0.0 && v.is_finite() => v,
            Some(_) => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "obtainedMarks must be >= 0"
                }));
                continue;
            }
            None => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "missing obtainedMarks"
                }));
                continue;
            }
        };
        let academic_year = match obj.get("academicYear").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "missing academicYear"
                }));
                continue;
            }
        };
        let semester = match obj.get("semester").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                errors.push(json!({
                    "index": i,
                    "code": "bad_params",
                    "message": "missing semester"
                }));
                continue;
            }
        };

        match question_exists(conn, &question_id) {
            Ok(true) => {}
            Ok(false) => {
                errors.push(json!({
                    "index": i,
                    "code": "not_found",
                    "message": "question not found"
                }));
                continue;
            }
            Err(e) => {
                errors.push(json!({
                    "index": i,
                    "code": e.code,
                    "message": e.message
                }));
                continue;
            }
        }

        match upsert_mark(
            conn,
            &question_id,
            &student_id,
            obtained,
            &academic_year,
            &semester,
        ) {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "code": e.code,
                "message": e.message
            })),
        }
    }

    let rejected = errors.len();
    let mut result = json!({ "updated": updated });
    if rejected > 0 {
        let obj = result.as_object_mut().expect("result should be object");
        obj.insert("rejected".into(), json!(rejected));
        obj.insert("errors".into(), json!(errors));
    }

    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.set" => Some(handle_marks_set(state, req)),
        _ => None,
    }
}
