mod test_support;

use serde_json::json;
use test_support::{request, request_ok, seed_scenario_course, state_with_workspace};

fn create_course_with_thresholds(
    state: &mut outcomed::ipc::AppState,
    t1: f64,
    t2: f64,
    t3: f64,
) -> serde_json::Value {
    request(
        state,
        "create",
        "course.create",
        json!({
            "code": "CS400",
            "name": "Threshold Course",
            "targetPercentage": 50.0,
            "level1Threshold": t1,
            "level2Threshold": t2,
            "level3Threshold": t3,
            "program": "BTech-CSE",
            "batch": "2024",
            "semester": "S1",
            "academicYear": "2025-26"
        }),
    )
}

fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn course_create_rejects_non_monotonic_thresholds() {
    let mut state = state_with_workspace("outcomed-bad-thresholds");

    for (t1, t2, t3) in [
        (65.0, 50.0, 80.0),
        (50.0, 50.0, 80.0),
        (50.0, 80.0, 80.0),
        (50.0, 65.0, 120.0),
        (-5.0, 65.0, 80.0),
    ] {
        let resp = create_course_with_thresholds(&mut state, t1, t2, t3);
        assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(error_code(&resp), Some("bad_params"));
    }

    let resp = create_course_with_thresholds(&mut state, 50.0, 65.0, 80.0);
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn update_targets_rejects_bad_values_and_keeps_the_old_ones() {
    let mut state = state_with_workspace("outcomed-update-targets");
    let course = seed_scenario_course(&mut state);

    let resp = request(
        &mut state,
        "1",
        "course.updateTargets",
        json!({
            "courseId": course.course_id,
            "targetPercentage": 50.0,
            "level1Threshold": 80.0,
            "level2Threshold": 65.0,
            "level3Threshold": 50.0
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&resp), Some("bad_params"));

    let course_row = request_ok(
        &mut state,
        "2",
        "course.get",
        json!({ "courseId": course.course_id }),
    );
    assert_eq!(
        course_row
            .get("course")
            .and_then(|c| c.get("level1Threshold"))
            .and_then(|v| v.as_f64()),
        Some(50.0)
    );
}

#[test]
fn target_edits_reflow_into_attainment_on_the_next_read() {
    let mut state = state_with_workspace("outcomed-target-edit");
    let course = seed_scenario_course(&mut state);

    // Raising the per-student bar to 60 drops S2 (55%): two of four meet
    // it, and 50% meeting lands exactly on the level-1 threshold.
    let _ = request_ok(
        &mut state,
        "1",
        "course.updateTargets",
        json!({
            "courseId": course.course_id,
            "targetPercentage": 60.0,
            "level1Threshold": 50.0,
            "level2Threshold": 65.0,
            "level3Threshold": 80.0
        }),
    );

    let result = request_ok(
        &mut state,
        "2",
        "attainment.classCo",
        json!({ "courseId": course.course_id, "coId": course.co1_id }),
    );
    let co = result.get("coAttainment").expect("coAttainment");
    assert_eq!(
        co.get("studentsMeetingTarget").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(
        co.get("percentageMeetingTarget").and_then(|v| v.as_f64()),
        Some(50.0)
    );
    assert_eq!(co.get("attainmentLevel").and_then(|v| v.as_i64()), Some(1));
}
