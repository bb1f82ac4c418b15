use crate::grading::{
    self, classify, GradeError, GradeStatus, ScoreKey, SortDirection, SortField, StudentRow,
    SubjectScore,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_err, grade_err, now_stamp, optional_str, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const BULK_UPDATE_MAX_EDITS: usize = 5000;

/// Joins a form's students with their grade rows for one reporting period.
/// Students without grades still get a row (null average).
pub fn load_student_rows(
    conn: &Connection,
    form: &str,
    term: &str,
    year: i64,
) -> Result<Vec<StudentRow>, GradeError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, g.subject, g.score, g.letter_grade, g.status
             FROM students s
             LEFT JOIN grades g
               ON g.student_id = s.id AND g.term = ?1 AND g.year = ?2
             WHERE s.form = ?3
             ORDER BY s.name, s.id, g.subject",
        )
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;

    let raw = stmt
        .query_map((term, year, form), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let subject: Option<String> = r.get(2)?;
            let score: Option<f64> = r.get(3)?;
            let letter: Option<String> = r.get(4)?;
            let status: Option<String> = r.get(5)?;
            Ok((id, name, subject, score, letter, status))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| GradeError::new("db_query_failed", e.to_string()))?;

    let mut rows: Vec<StudentRow> = Vec::new();
    for (id, name, subject, score, letter, status) in raw {
        if rows.last().map(|r: &StudentRow| r.student_id != id).unwrap_or(true) {
            rows.push(StudentRow {
                student_id: id,
                name,
                subjects: Vec::new(),
                average: None,
            });
        }
        if let ((Some(subject), Some(score)), Some(row)) = ((subject, score), rows.last_mut()) {
            row.subjects.push(SubjectScore {
                subject,
                score,
                letter_grade: letter.unwrap_or_else(|| classify(score).to_string()),
                status: status
                    .as_deref()
                    .and_then(GradeStatus::parse)
                    .unwrap_or(GradeStatus::Pending),
            });
        }
    }
    for row in &mut rows {
        let scores: Vec<f64> = row.subjects.iter().map(|s| s.score).collect();
        row.average = grading::average(&scores).ok();
    }
    Ok(rows)
}

fn parse_sort(req: &Request) -> Result<(SortField, SortDirection), serde_json::Value> {
    let field = match optional_str(req, "sortField").as_deref() {
        None | Some("name") => SortField::Name,
        Some("average") => SortField::Average,
        Some(subject) => SortField::Subject(subject.to_string()),
    };
    let direction = match optional_str(req, "sortDirection")
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("asc") => SortDirection::Asc,
        Some("desc") => SortDirection::Desc,
        Some(other) => {
            return Err(err(
                &req.id,
                "bad_params",
                "sortDirection must be one of: asc, desc",
                Some(json!({ "sortDirection": other })),
            ))
        }
    };
    Ok((field, direction))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let form = match required_str(req, "form") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year = match required_i64(req, "year") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = optional_str(req, "subject");
    let search = optional_str(req, "search").map(|s| s.to_lowercase());
    let (field, direction) = match parse_sort(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut rows = match load_student_rows(conn, &form, &term, year) {
        Ok(v) => v,
        Err(e) => return grade_err(req, e),
    };

    if let Some(needle) = &search {
        rows.retain(|r| r.name.to_lowercase().contains(needle));
    }
    if let Some(subject) = &subject {
        for row in &mut rows {
            row.subjects.retain(|s| &s.subject == subject);
        }
    }
    grading::sort_rows(&mut rows, &field, direction);

    ok(
        &req.id,
        json!({
            "form": form,
            "term": term,
            "year": year,
            "rows": rows,
            "sortDirection": direction.as_str(),
        }),
    )
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |_| {
        Ok(())
    })
    .optional()
    .map(|v| v.is_some())
}

/// Range check sits at the write boundary; `classify` itself stays total.
fn score_in_range(score: f64) -> bool {
    (0.0..=100.0).contains(&score)
}

/// Writes one grade row; the letter grade is always recomputed from the score
/// and an edited score drops back to pending.
fn upsert_grade(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    term: &str,
    year: i64,
    score: f64,
) -> Result<serde_json::Value, rusqlite::Error> {
    let letter = classify(score);
    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(id, student_id, subject, term, year, score, letter_grade, status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'pending', ?)
         ON CONFLICT(student_id, subject, term, year) DO UPDATE SET
           score = excluded.score,
           letter_grade = excluded.letter_grade,
           status = 'pending',
           updated_at = excluded.updated_at",
        (
            &grade_id,
            student_id,
            subject,
            term,
            year,
            score,
            letter,
            now_stamp(),
        ),
    )?;
    Ok(json!({
        "studentId": student_id,
        "subject": subject,
        "term": term,
        "year": year,
        "score": score,
        "letterGrade": letter,
        "status": GradeStatus::Pending.as_str(),
    }))
}

fn handle_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year = match required_i64(req, "year") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_score) = req.params.get("score") else {
        return err(&req.id, "bad_params", "missing score", None);
    };
    let score = match grading::parse_score(raw_score) {
        Ok(v) => v,
        Err(e) => return grade_err(req, e),
    };
    if !score_in_range(score) {
        return err(
            &req.id,
            "bad_params",
            "score must be between 0 and 100",
            Some(json!({ "score": score })),
        );
    }

    match student_exists(conn, &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return db_err(req, e),
    }

    match upsert_grade(conn, &student_id, &subject, &term, year, score) {
        Ok(grade) => ok(&req.id, json!({ "grade": grade })),
        Err(e) => db_err(req, e),
    }
}

fn handle_bulk_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year = match required_i64(req, "year") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(edits) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing edits array", None);
    };
    if edits.len() > BULK_UPDATE_MAX_EDITS {
        return err(
            &req.id,
            "bad_params",
            format!("too many edits (max {})", BULK_UPDATE_MAX_EDITS),
            Some(json!({ "edits": edits.len() })),
        );
    }

    // Typed composite key: later edits for the same (student, subject) pair
    // win, and distinct pairs can never collide the way concatenated string
    // keys could.
    let mut staged: HashMap<ScoreKey, f64> = HashMap::new();
    for (i, edit) in edits.iter().enumerate() {
        let student_id = edit.get("studentId").and_then(|v| v.as_str());
        let subject = edit.get("subject").and_then(|v| v.as_str());
        let (Some(student_id), Some(subject)) = (student_id, subject) else {
            return err(
                &req.id,
                "bad_params",
                "each edit needs studentId and subject",
                Some(json!({ "index": i })),
            );
        };
        let Some(raw_score) = edit.get("score") else {
            return err(
                &req.id,
                "bad_params",
                "each edit needs a score",
                Some(json!({ "index": i })),
            );
        };
        let score = match grading::parse_score(raw_score) {
            Ok(v) => v,
            Err(mut e) => {
                e.details = Some(json!({ "index": i }));
                return grade_err(req, e);
            }
        };
        if !score_in_range(score) {
            return err(
                &req.id,
                "bad_params",
                "score must be between 0 and 100",
                Some(json!({ "index": i, "score": score })),
            );
        }
        match student_exists(conn, student_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    "student not found",
                    Some(json!({ "index": i, "studentId": student_id })),
                )
            }
            Err(e) => return db_err(req, e),
        }
        staged.insert(
            ScoreKey {
                student_id: student_id.to_string(),
                subject: subject.to_string(),
            },
            score,
        );
    }

    // Every edit is validated above; the writes run in one transaction so a
    // failure part-way through leaves no rows behind.
    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return db_err(req, e),
    };
    let mut updated = 0usize;
    for (key, score) in &staged {
        if let Err(e) = upsert_grade(&tx, &key.student_id, &key.subject, &term, year, *score) {
            return db_err(req, e);
        }
        updated += 1;
    }
    if let Err(e) = tx.commit() {
        return db_err(req, e);
    }

    ok(&req.id, json!({ "updated": updated }))
}

fn handle_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match required_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year = match required_i64(req, "year") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = match conn.execute(
        "UPDATE grades SET status = 'approved', updated_at = ?
         WHERE student_id = ? AND subject = ? AND term = ? AND year = ?",
        (now_stamp(), &student_id, &subject, &term, year),
    ) {
        Ok(n) => n,
        Err(e) => return db_err(req, e),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "grade not found", None);
    }

    ok(&req.id, json!({ "status": GradeStatus::Approved.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_list(state, req)),
        "grades.upsert" => Some(handle_upsert(state, req)),
        "grades.bulkUpdate" => Some(handle_bulk_update(state, req)),
        "grades.approve" => Some(handle_approve(state, req)),
        _ => None,
    }
}
