use crate::grading::{self, classify, GradeError, RankedStudent, StudentRow, StudentStanding};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_err, grade_err, required_i64, required_str, today};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, Document, StudentIdentity};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::grades;

fn load_identity(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<(StudentIdentity, String)>, rusqlite::Error> {
    conn.query_row(
        "SELECT name, form, admission_number, date_of_birth, gender
         FROM students WHERE id = ?",
        [student_id],
        |r| {
            let name: String = r.get(0)?;
            Ok((
                StudentIdentity {
                    name: Some(name.clone()),
                    form: r.get(1)?,
                    admission_number: r.get(2)?,
                    date_of_birth: r.get(3)?,
                    gender: r.get(4)?,
                },
                name,
            ))
        },
    )
    .optional()
}

fn standings_from_rows(rows: &[StudentRow]) -> Vec<StudentStanding> {
    rows.iter()
        .filter_map(|row| {
            let average = row.average?;
            Some(StudentStanding {
                name: row.name.clone(),
                subject_count: row.subjects.len(),
                average,
                grade: classify(average).to_string(),
            })
        })
        .collect()
}

fn class_summary_parts(
    conn: &Connection,
    form: &str,
    term: &str,
    year: i64,
) -> Result<
    (
        Vec<RankedStudent>,
        Option<grading::ClassOverview>,
        Vec<grading::GradeBucket>,
    ),
    GradeError,
> {
    let rows = grades::load_student_rows(conn, form, term, year)?;
    let ranked = grading::rank(standings_from_rows(&rows));
    let overview = grading::class_overview(&ranked);
    let dist = grading::distribution(&ranked);
    Ok((ranked, overview, dist))
}

fn handle_calc_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match class_summary_parts(conn, &form, &term, year) {
        Ok((ranked, overview, dist)) => ok(
            &req.id,
            json!({
                "form": form,
                "term": term,
                "year": year,
                "students": ranked,
                "overview": overview,
                "distribution": dist,
            }),
        ),
        Err(e) => grade_err(req, e),
    }
}

fn document_payload(label: &str, term: &str, year: i64, document: &Document) -> serde_json::Value {
    json!({
        "fileName": report::report_file_name(label, term, year),
        "pageCount": document.pages.len(),
        "document": document,
    })
}

fn compose_student(
    conn: &Connection,
    req: &Request,
    student_id: &str,
    term: &str,
    year: i64,
) -> Result<(Document, String), serde_json::Value> {
    let identity = match load_identity(conn, student_id) {
        Ok(Some(v)) => v,
        Ok(None) => return Err(err(&req.id, "not_found", "student not found", None)),
        Err(e) => return Err(db_err(req, e)),
    };
    let (identity, name) = identity;

    let mut stmt = match conn.prepare(
        "SELECT subject, score, letter_grade, status
         FROM grades
         WHERE student_id = ? AND term = ? AND year = ?
         ORDER BY subject",
    ) {
        Ok(s) => s,
        Err(e) => return Err(db_err(req, e)),
    };
    let scores = match stmt
        .query_map((student_id, term, year), |r| {
            let score: f64 = r.get(1)?;
            let letter: String = r.get(2)?;
            let status: String = r.get(3)?;
            Ok(grading::SubjectScore {
                subject: r.get(0)?,
                score,
                letter_grade: letter,
                status: grading::GradeStatus::parse(&status)
                    .unwrap_or(grading::GradeStatus::Pending),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return Err(db_err(req, e)),
    };

    let doc = report::compose_student_report(&identity, &scores, term, year, &today());
    Ok((doc, name))
}

fn compose_class(
    conn: &Connection,
    req: &Request,
    form: &str,
    term: &str,
    year: i64,
) -> Result<Document, serde_json::Value> {
    let rows = match grades::load_student_rows(conn, form, term, year) {
        Ok(v) => v,
        Err(e) => return Err(grade_err(req, e)),
    };
    let students: Vec<report::ClassReportStudent> = rows
        .iter()
        .map(|row| report::ClassReportStudent {
            name: row.name.clone(),
            scores: row.subjects.iter().map(|s| s.score).collect(),
        })
        .collect();
    Ok(report::compose_class_report(
        form, &students, term, year, &today(),
    ))
}

fn handle_student_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
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

    match compose_student(conn, req, &student_id, &term, year) {
        Ok((doc, name)) => ok(&req.id, document_payload(&name, &term, year, &doc)),
        Err(e) => e,
    }
}

fn handle_class_report(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match compose_class(conn, req, &form, &term, year) {
        Ok(doc) => ok(&req.id, document_payload(&form, &term, year, &doc)),
        Err(e) => e,
    }
}

/// Document-sink boundary: renders the same document the model endpoints
/// return and writes it under the workspace.
fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let kind = match required_str(req, "kind") {
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

    let (doc, label) = match kind.as_str() {
        "student" => {
            let student_id = match required_str(req, "studentId") {
                Ok(v) => v,
                Err(e) => return e,
            };
            match compose_student(conn, req, &student_id, &term, year) {
                Ok(v) => v,
                Err(e) => return e,
            }
        }
        "class" => {
            let form = match required_str(req, "form") {
                Ok(v) => v,
                Err(e) => return e,
            };
            match compose_class(conn, req, &form, &term, year) {
                Ok(doc) => (doc, form),
                Err(e) => return e,
            }
        }
        other => {
            return err(
                &req.id,
                "bad_params",
                "kind must be one of: student, class",
                Some(json!({ "kind": other })),
            )
        }
    };

    let file_name = report::report_file_name(&label, &term, year);
    let reports_dir = workspace.join("reports");
    if let Err(e) = std::fs::create_dir_all(&reports_dir) {
        return err(&req.id, "report_write_failed", e.to_string(), None);
    }
    let path = reports_dir.join(&file_name);
    if let Err(e) = std::fs::write(&path, doc.render_text()) {
        return err(&req.id, "report_write_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "fileName": file_name,
            "path": path.to_string_lossy(),
            "pageCount": doc.pages.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.classSummary" => Some(handle_calc_class_summary(state, req)),
        "reports.studentReport" => Some(handle_student_report(state, req)),
        "reports.classReport" => Some(handle_class_report(state, req)),
        "reports.save" => Some(handle_save(state, req)),
        _ => None,
    }
}
