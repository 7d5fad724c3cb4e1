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

fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

fn handle_co_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match required_str(req, "description") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let co_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO course_outcomes(id, course_id, code, description, deleted_at)
         VALUES(?, ?, ?, ?, NULL)",
        (&co_id, &course_id, &code, &description),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "course_outcomes" })),
        );
    }

    ok(&req.id, json!({ "coId": co_id, "code": code }))
}

fn handle_co_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "SELECT id, code, description, deleted_at
         FROM course_outcomes WHERE course_id = ? ORDER BY code"
    } else {
        "SELECT id, code, description, deleted_at
         FROM course_outcomes WHERE course_id = ? AND deleted_at IS NULL ORDER BY code"
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let description: String = row.get(2)?;
            let deleted_at: Option<String> = row.get(3)?;
            Ok(json!({
                "coId": id,
                "code": code,
                "description": description,
                "active": deleted_at.is_none()
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(outcomes) => ok(&req.id, json!({ "outcomes": outcomes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_co_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let co_id = match required_str(req, "coId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing active", None);
    };

    let deleted_at: Option<String> = if active {
        None
    } else {
        Some(Utc::now().to_rfc3339())
    };
    let updated = match conn.execute(
        "UPDATE course_outcomes SET deleted_at = ? WHERE id = ?",
        (&deleted_at, &co_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "course outcome not found", None);
    }

    ok(&req.id, json!({ "coId": co_id, "active": active }))
}

fn handle_po_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match required_str(req, "description") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let po_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO program_outcomes(id, code, description) VALUES(?, ?, ?)",
        (&po_id, &code, &description),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "program_outcomes" })),
        );
    }

    ok(&req.id, json!({ "poId": po_id, "code": code }))
}

fn handle_co_map_po(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let co_id = match required_str(req, "coId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let po_id = match required_str(req, "poId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let level = match req.params.get("level").and_then(|v| v.as_i64()) {
        Some(v) if (1..=3).contains(&v) => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                "level must be 1, 2 or 3",
                Some(json!({ "level": v })),
            )
        }
        None => return err(&req.id, "bad_params", "missing level", None),
    };

    // Re-mapping a retired pair revives it with the new strength.
    if let Err(e) = conn.execute(
        "INSERT INTO co_po_mappings(co_id, po_id, level, deleted_at)
         VALUES(?, ?, ?, NULL)
         ON CONFLICT(co_id, po_id) DO UPDATE SET
           level = excluded.level,
           deleted_at = NULL",
        (&co_id, &po_id, level),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "co_po_mappings" })),
        );
    }

    ok(&req.id, json!({ "coId": co_id, "poId": po_id, "level": level }))
}

fn handle_co_po_mappings(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT co.code, po.code, m.level
         FROM co_po_mappings m
         JOIN course_outcomes co ON co.id = m.co_id
         JOIN program_outcomes po ON po.id = m.po_id
         WHERE co.course_id = ? AND m.deleted_at IS NULL AND co.deleted_at IS NULL
         ORDER BY co.code, po.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            let co_code: String = row.get(0)?;
            let po_code: String = row.get(1)?;
            let level: i64 = row.get(2)?;
            Ok(json!({
                "coCode": co_code,
                "poCode": po_code,
                "level": level
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(mappings) => ok(&req.id, json!({ "mappings": mappings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assessment_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM assessments WHERE course_id = ?",
        [&course_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let assessment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assessments(id, course_id, title, sort_order) VALUES(?, ?, ?, ?)",
        (&assessment_id, &course_id, &title, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        );
    }

    ok(&req.id, json!({ "assessmentId": assessment_id, "title": title }))
}

fn handle_question_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assessment_id = match required_str(req, "assessmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let label = match required_str(req, "label") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_marks = match req.params.get("maxMarks").and_then(|v| v.as_i64()) {
        Some(v) if v > 0 => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                "maxMarks must be a positive integer",
                Some(json!({ "maxMarks": v })),
            )
        }
        None => {
            return err(
                &req.id,
                "bad_params",
                "missing or non-integer maxMarks",
                None,
            )
        }
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM assessments WHERE id = ?",
            [&assessment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "assessment not found", None);
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM questions WHERE assessment_id = ?",
        [&assessment_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let question_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO questions(id, assessment_id, label, max_marks, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (&question_id, &assessment_id, &label, max_marks, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }

    ok(
        &req.id,
        json!({ "questionId": question_id, "label": label, "maxMarks": max_marks }),
    )
}

fn handle_question_map_co(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let co_id = match required_str(req, "coId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Re-mapping an unmapped pair revives it.
    if let Err(e) = conn.execute(
        "INSERT INTO question_co_mappings(question_id, co_id, deleted_at)
         VALUES(?, ?, NULL)
         ON CONFLICT(question_id, co_id) DO UPDATE SET deleted_at = NULL",
        (&question_id, &co_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "question_co_mappings" })),
        );
    }

    ok(&req.id, json!({ "questionId": question_id, "coId": co_id }))
}

fn handle_question_unmap_co(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let co_id = match required_str(req, "coId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated = match conn.execute(
        "UPDATE question_co_mappings SET deleted_at = ?
         WHERE question_id = ? AND co_id = ? AND deleted_at IS NULL",
        (Utc::now().to_rfc3339(), &question_id, &co_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "mapping not found", None);
    }

    ok(&req.id, json!({ "questionId": question_id, "coId": co_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "co.create" => Some(handle_co_create(state, req)),
        "co.list" => Some(handle_co_list(state, req)),
        "co.setActive" => Some(handle_co_set_active(state, req)),
        "po.create" => Some(handle_po_create(state, req)),
        "co.mapPo" => Some(handle_co_map_po(state, req)),
        "co.poMappings" => Some(handle_co_po_mappings(state, req)),
        "assessment.create" => Some(handle_assessment_create(state, req)),
        "question.create" => Some(handle_question_create(state, req)),
        "question.mapCo" => Some(handle_question_map_co(state, req)),
        "question.unmapCo" => Some(handle_question_unmap_co(state, req)),
        _ => None,
    }
}
