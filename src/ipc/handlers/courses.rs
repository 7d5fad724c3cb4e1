use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
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

fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

struct TargetConfig {
    target_percentage: f64,
    thresholds: calc::AttainmentThresholds,
}

fn parse_target_config(req: &Request) -> Result<TargetConfig, serde_json::Value> {
    let target_percentage = required_f64(req, "targetPercentage")?;
    if !target_percentage.is_finite() || !(0.0..=100.0).contains(&target_percentage) {
        return Err(err(
            &req.id,
            "bad_params",
            "targetPercentage must be in range 0..=100",
            Some(json!({ "targetPercentage": target_percentage })),
        ));
    }

    let t1 = required_f64(req, "level1Threshold")?;
    let t2 = required_f64(req, "level2Threshold")?;
    let t3 = required_f64(req, "level3Threshold")?;
    let thresholds = calc::AttainmentThresholds::new(t1, t2, t3).map_err(|msg| {
        err(
            &req.id,
            "bad_params",
            msg,
            Some(json!({
                "level1Threshold": t1,
                "level2Threshold": t2,
                "level3Threshold": t3
            })),
        )
    })?;

    Ok(TargetConfig {
        target_percentage,
        thresholds,
    })
}

fn course_json(conn: &Connection, req_id: &str, course_id: &str) -> Result<serde_json::Value, serde_json::Value> {
    let course = calc::load_course(conn, course_id)
        .map_err(|e| err(req_id, &e.code, e.message, e.details))?;
    Ok(json!({
        "courseId": course.id,
        "code": course.code,
        "name": course.name,
        "targetPercentage": course.target_percentage,
        "level1Threshold": course.thresholds.level1,
        "level2Threshold": course.thresholds.level2,
        "level3Threshold": course.thresholds.level3,
        "status": course.status,
        "program": course.program,
        "batch": course.batch,
        "semester": course.semester,
        "academicYear": course.academic_year
    }))
}

fn handle_course_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
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
    let semester = match required_str(req, "semester") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let targets = match parse_target_config(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(
            id, code, name, target_percentage, level1_threshold, level2_threshold,
            level3_threshold, status, program, batch, semester, academic_year)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'future', ?, ?, ?, ?)",
        (
            &course_id,
            &code,
            &name,
            targets.target_percentage,
            targets.thresholds.level1,
            targets.thresholds.level2,
            targets.thresholds.level3,
            &program,
            &batch,
            &semester,
            &academic_year,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(
        &req.id,
        json!({ "courseId": course_id, "code": code, "status": "future" }),
    )
}

fn handle_course_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match course_json(conn, &req.id, &course_id) {
        Ok(course) => ok(&req.id, json!({ "course": course })),
        Err(e) => e,
    }
}

fn handle_course_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    // Counts via correlated subqueries to avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.code,
           c.name,
           c.status,
           (SELECT COUNT(*) FROM course_outcomes co
             WHERE co.course_id = c.id AND co.deleted_at IS NULL) AS co_count,
           (SELECT COUNT(*) FROM enrollments e
             WHERE e.course_id = c.id AND e.deleted_at IS NULL) AS enrollment_count
         FROM courses c
         ORDER BY c.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            let status: String = row.get(3)?;
            let co_count: i64 = row.get(4)?;
            let enrollment_count: i64 = row.get(5)?;
            Ok(json!({
                "courseId": id,
                "code": code,
                "name": name,
                "status": status,
                "coCount": co_count,
                "enrollmentCount": enrollment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_course_update_targets(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let targets = match parse_target_config(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE courses SET
           target_percentage = ?,
           level1_threshold = ?,
           level2_threshold = ?,
           level3_threshold = ?
         WHERE id = ?",
        (
            targets.target_percentage,
            targets.thresholds.level1,
            targets.thresholds.level2,
            targets.thresholds.level3,
            &course_id,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    // Attainment is always recomputed from live targets, so no persisted
    // per-student row needs touching here.
    match course_json(conn, &req.id, &course_id) {
        Ok(course) => ok(&req.id, json!({ "course": course })),
        Err(e) => e,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "course.create" => Some(handle_course_create(state, req)),
        "course.get" => Some(handle_course_get(state, req)),
        "course.list" => Some(handle_course_list(state, req)),
        "course.updateTargets" => Some(handle_course_update_targets(state, req)),
        _ => None,
    }
}
