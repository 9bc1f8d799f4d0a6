mod test_support;

use serde_json::json;
use test_support::{spawn_with_workspace, str_field, Sidecar};

struct Cohort {
    term_id: String,
    from_class: String,
    next_class: String,
    ada: String,
    ben: String,
    cy: String,
}

fn seed_cohort(sidecar: &mut Sidecar) -> Cohort {
    let from_class = sidecar.create_class("JSS 3");
    let next_class = sidecar.create_class("SS 1");
    let term_id = sidecar.create_term("Third Term");
    let math = sidecar.create_subject("Mathematics");
    let english = sidecar.create_subject("English");
    let ada = sidecar.create_student(&from_class, "Ada", "Adams");
    let ben = sidecar.create_student(&from_class, "Ben", "Brown");
    let cy = sidecar.create_student(&from_class, "Cy", "Cole");
    sidecar.record(&ada, &term_id, &math, 85.0);
    sidecar.record(&ada, &term_id, &english, 75.0);
    sidecar.record(&ben, &term_id, &math, 45.0);
    sidecar.record(&ben, &term_id, &english, 35.0);
    Cohort {
        term_id,
        from_class,
        next_class,
        ada,
        ben,
        cy,
    }
}

fn student_ids(sidecar: &mut Sidecar, class_id: &str) -> Vec<String> {
    sidecar.ok("students.list", json!({ "classId": class_id }))["students"]
        .as_array()
        .expect("students")
        .iter()
        .filter_map(|s| s["id"].as_str().map(|v| v.to_string()))
        .collect()
}

#[test]
fn candidates_are_advisory_and_processing_is_idempotent() {
    let (_workspace, mut sidecar) = spawn_with_workspace();
    let c = seed_cohort(&mut sidecar);

    let report = sidecar.ok(
        "promotions.candidates",
        json!({ "classId": c.from_class, "termId": c.term_id }),
    );
    assert_eq!(report["passThreshold"], 50.0);
    let version = str_field(&report, "policyVersion");
    let candidates = report["candidates"].as_array().expect("candidates");
    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates[0]["studentId"], c.ada.as_str());
    assert_eq!(candidates[0]["averageScore"], 80.0);
    assert_eq!(candidates[0]["recommendedAction"], "PROMOTE");
    assert_eq!(candidates[0]["reason"], "Average score meets promotion criteria");
    assert_eq!(candidates[1]["averageScore"], 40.0);
    assert_eq!(candidates[1]["recommendedAction"], "RETAIN");
    assert_eq!(candidates[1]["reason"], "Average score below promotion threshold");
    assert!(candidates[2]["averageScore"].is_null());
    assert_eq!(candidates[2]["recommendedAction"], "RETAIN");
    assert_eq!(candidates[2]["reason"], "No assessment data available");

    // Evaluation alone moves nobody.
    assert_eq!(student_ids(&mut sidecar, &c.from_class).len(), 3);

    let decisions = json!([
        { "studentId": c.ada, "action": "PROMOTE", "targetClassId": c.next_class },
        { "studentId": c.ben, "action": "RETAIN" },
        { "studentId": c.cy, "action": "PROMOTE" },
        { "studentId": "ghost", "action": "RETAIN" }
    ]);
    let first = sidecar.ok(
        "promotions.process",
        json!({ "decisions": decisions, "currentTermId": c.term_id, "policyVersion": version }),
    );
    assert_eq!(first["applied"], json!([c.ada, c.ben]));
    let skipped = first["skipped"].as_array().expect("skipped");
    assert_eq!(skipped.len(), 2);
    assert_eq!(skipped[0]["studentId"], c.cy.as_str());
    assert_eq!(skipped[0]["reason"], "Target class is required for promotion");
    assert_eq!(skipped[1]["reason"], "Student not found");

    assert_eq!(student_ids(&mut sidecar, &c.next_class), vec![c.ada.clone()]);
    assert_eq!(
        student_ids(&mut sidecar, &c.from_class),
        vec![c.ben.clone(), c.cy.clone()]
    );

    let second = sidecar.ok(
        "promotions.process",
        json!({ "decisions": decisions, "currentTermId": c.term_id }),
    );
    assert_eq!(second["applied"], json!([]));
    let reasons: Vec<&str> = second["skipped"]
        .as_array()
        .expect("skipped")
        .iter()
        .filter_map(|s| s["reason"].as_str())
        .collect();
    assert_eq!(
        reasons,
        vec![
            "Already processed for this term",
            "Already processed for this term",
            "Target class is required for promotion",
            "Student not found"
        ]
    );
    assert_eq!(student_ids(&mut sidecar, &c.next_class), vec![c.ada.clone()]);

    let history = sidecar.ok("promotions.history", json!({ "termId": c.term_id }));
    let records = history["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    let ada_record = records
        .iter()
        .find(|r| r["studentId"] == c.ada.as_str())
        .expect("ada record");
    assert_eq!(ada_record["action"], "PROMOTE");
    assert_eq!(ada_record["fromClassId"], c.from_class.as_str());
    assert_eq!(ada_record["toClassId"], c.next_class.as_str());
    assert_eq!(ada_record["reason"], "Promoted to next class");

    let into_next = sidecar.ok(
        "promotions.history",
        json!({ "termId": c.term_id, "classId": c.next_class }),
    );
    assert_eq!(into_next["records"].as_array().map(|r| r.len()), Some(1));
}

#[test]
fn promote_targets_are_checked_per_student() {
    let (_workspace, mut sidecar) = spawn_with_workspace();
    let c = seed_cohort(&mut sidecar);

    let summary = sidecar.ok(
        "promotions.process",
        json!({
            "currentTermId": c.term_id,
            "decisions": [
                { "studentId": c.ada, "action": "PROMOTE", "targetClassId": c.from_class },
                { "studentId": c.ben, "action": "PROMOTE", "targetClassId": "nowhere" },
                { "studentId": c.cy, "action": "RETAIN", "targetClassId": c.next_class, "reason": "Repeat year" }
            ]
        }),
    );
    assert_eq!(summary["applied"], json!([c.cy]));
    assert_eq!(
        summary["skipped"][0]["reason"],
        "Target class must differ from current class"
    );
    assert_eq!(summary["skipped"][1]["reason"], "Target class not found");

    // RETAIN ignores the supplied target.
    assert!(student_ids(&mut sidecar, &c.from_class).contains(&c.cy));
    let history = sidecar.ok("promotions.history", json!({ "termId": c.term_id }));
    assert_eq!(history["records"][0]["toClassId"], c.from_class.as_str());
    assert_eq!(history["records"][0]["reason"], "Repeat year");
}

#[test]
fn request_level_failures_write_nothing() {
    let (_workspace, mut sidecar) = spawn_with_workspace();
    let c = seed_cohort(&mut sidecar);
    let decisions = json!([
        { "studentId": c.ada, "action": "PROMOTE", "targetClassId": c.next_class }
    ]);

    sidecar.fail(
        "promotions.process",
        json!({ "decisions": decisions, "currentTermId": "missing" }),
        "not_found",
    );
    sidecar.fail(
        "promotions.process",
        json!({
            "decisions": [{ "studentId": c.ada, "action": "EXPEL" }],
            "currentTermId": c.term_id
        }),
        "bad_params",
    );
    sidecar.fail(
        "promotions.candidates",
        json!({ "classId": c.from_class, "termId": "missing" }),
        "not_found",
    );

    let stale = sidecar.ok(
        "promotions.candidates",
        json!({ "classId": c.from_class, "termId": c.term_id }),
    );
    let stale_version = str_field(&stale, "policyVersion");
    sidecar.ok(
        "setup.update",
        json!({ "section": "promotion", "patch": { "passThreshold": 85 } }),
    );
    let error = sidecar.fail(
        "promotions.process",
        json!({ "decisions": decisions, "currentTermId": c.term_id, "policyVersion": stale_version }),
        "stale_policy",
    );
    assert_eq!(
        error.pointer("/details/expected").and_then(|v| v.as_str()),
        Some(stale_version.as_str())
    );

    let fresh = sidecar.ok(
        "promotions.candidates",
        json!({ "classId": c.from_class, "termId": c.term_id }),
    );
    assert_eq!(fresh["passThreshold"], 85.0);
    assert_eq!(fresh["candidates"][0]["recommendedAction"], "RETAIN");
    assert_ne!(str_field(&fresh, "policyVersion"), stale_version);

    sidecar.ok(
        "setup.update",
        json!({ "section": "promotion", "patch": { "requirePolicyVersion": true } }),
    );
    let error = sidecar.fail(
        "promotions.process",
        json!({ "decisions": decisions, "currentTermId": c.term_id }),
        "bad_params",
    );
    assert_eq!(
        error.pointer("/details/field").and_then(|v| v.as_str()),
        Some("policyVersion")
    );

    let history = sidecar.ok("promotions.history", json!({ "termId": c.term_id }));
    assert_eq!(history["records"].as_array().map(|r| r.len()), Some(0));
    assert_eq!(student_ids(&mut sidecar, &c.from_class).len(), 3);
}
