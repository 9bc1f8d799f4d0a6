#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

/// A running `gradebookd` driven over stdin/stdout.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

/// Spawn a sidecar with a fresh workspace already selected.
pub fn spawn_with_workspace() -> (TempDir, Sidecar) {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut sidecar = spawn_sidecar();
    sidecar.ok(
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    (workspace, sidecar)
}

impl Sidecar {
    pub fn write_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        self.read_line()
    }

    fn read_line(&mut self) -> serde_json::Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response");
        serde_json::from_str(line.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.write_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Returns the error object after checking its code.
    pub fn fail(
        &mut self,
        method: &str,
        params: serde_json::Value,
        code: &str,
    ) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        let error = value.get("error").cloned().expect("error object");
        assert_eq!(
            error.get("code").and_then(|v| v.as_str()),
            Some(code),
            "{}: {}",
            method,
            error
        );
        error
    }

    pub fn create_class(&mut self, name: &str) -> String {
        str_field(&self.ok("classes.create", json!({ "name": name })), "classId")
    }

    pub fn create_student(&mut self, class_id: &str, first: &str, last: &str) -> String {
        str_field(
            &self.ok(
                "students.create",
                json!({ "classId": class_id, "firstName": first, "lastName": last }),
            ),
            "studentId",
        )
    }

    pub fn create_term(&mut self, name: &str) -> String {
        str_field(
            &self.ok("terms.create", json!({ "name": name, "isCurrent": true })),
            "termId",
        )
    }

    pub fn create_subject(&mut self, name: &str) -> String {
        str_field(&self.ok("subjects.create", json!({ "name": name })), "subjectId")
    }

    pub fn record(&mut self, student_id: &str, term_id: &str, subject_id: &str, score: f64) {
        self.ok(
            "results.upsert",
            json!({
                "studentId": student_id,
                "termId": term_id,
                "subjectId": subject_id,
                "totalScore": score
            }),
        );
    }

    /// A=80..100, B=70..79.99, C=50..69.99, F=0..49.99.
    pub fn seed_standard_scales(&mut self) {
        for (grade, min, max, gpa, remark) in [
            ("A", 80.0, 100.0, 4.0, "Excellent"),
            ("B", 70.0, 79.99, 3.0, "Very Good"),
            ("C", 50.0, 69.99, 2.0, "Credit"),
            ("F", 0.0, 49.99, 0.0, "Fail"),
        ] {
            self.ok(
                "gradingScales.create",
                json!({
                    "scale": {
                        "grade": grade,
                        "minScore": min,
                        "maxScore": max,
                        "gpaPoint": gpa,
                        "remark": remark
                    }
                }),
            );
        }
    }
}

pub fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}
