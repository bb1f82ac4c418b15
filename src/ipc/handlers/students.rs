use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_err, now_stamp, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn student_json(
    id: String,
    name: String,
    form: String,
    admission_number: Option<String>,
    date_of_birth: Option<String>,
    gender: Option<String>,
) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "form": form,
        "admissionNumber": admission_number,
        "dateOfBirth": date_of_birth,
        "gender": gender,
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let form = optional_str(req, "form");

    let (sql, bind): (&str, Vec<String>) = match &form {
        Some(f) => (
            "SELECT id, name, form, admission_number, date_of_birth, gender
             FROM students WHERE form = ? ORDER BY name",
            vec![f.clone()],
        ),
        None => (
            "SELECT id, name, form, admission_number, date_of_birth, gender
             FROM students ORDER BY form, name",
            Vec::new(),
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return db_err(req, e),
    };
    let students = match stmt
        .query_map(rusqlite::params_from_iter(bind), |r| {
            Ok(student_json(
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };

    ok(&req.id, json!({ "students": students }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if name.trim().is_empty() {
        return err(&req.id, "bad_params", "name must not be blank", None);
    }
    let form = match required_str(req, "form") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    let admission_number = optional_str(req, "admissionNumber");
    let date_of_birth = optional_str(req, "dateOfBirth");
    let gender = optional_str(req, "gender");
    let stamp = now_stamp();

    if let Err(e) = conn.execute(
        "INSERT INTO students(id, name, form, admission_number, date_of_birth, gender, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &form,
            &admission_number,
            &date_of_birth,
            &gender,
            &stamp,
            &stamp,
        ),
    ) {
        return db_err(req, e);
    }

    ok(
        &req.id,
        json!({
            "student": student_json(id, name, form, admission_number, date_of_birth, gender)
        }),
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let current: Option<(String, String, Option<String>, Option<String>, Option<String>)> =
        match conn
            .query_row(
                "SELECT name, form, admission_number, date_of_birth, gender
                 FROM students WHERE id = ?",
                [&student_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return db_err(req, e),
        };
    let Some((name, form, admission_number, date_of_birth, gender)) = current else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let name = optional_str(req, "name").unwrap_or(name);
    if name.trim().is_empty() {
        return err(&req.id, "bad_params", "name must not be blank", None);
    }
    let form = optional_str(req, "form").unwrap_or(form);
    let admission_number = optional_str(req, "admissionNumber").or(admission_number);
    let date_of_birth = optional_str(req, "dateOfBirth").or(date_of_birth);
    let gender = optional_str(req, "gender").or(gender);

    if let Err(e) = conn.execute(
        "UPDATE students
         SET name = ?, form = ?, admission_number = ?, date_of_birth = ?, gender = ?, updated_at = ?
         WHERE id = ?",
        (
            &name,
            &form,
            &admission_number,
            &date_of_birth,
            &gender,
            now_stamp(),
            &student_id,
        ),
    ) {
        return db_err(req, e);
    }

    ok(
        &req.id,
        json!({
            "student": student_json(student_id, name, form, admission_number, date_of_birth, gender)
        }),
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Explicit cascade: a student removal takes their grade rows with it,
    // nothing else does.
    let grades_removed = match conn.execute("DELETE FROM grades WHERE student_id = ?", [&student_id])
    {
        Ok(n) => n,
        Err(e) => return db_err(req, e),
    };
    let removed = match conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => return db_err(req, e),
    };
    if removed == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(
        &req.id,
        json!({ "deleted": true, "gradesRemoved": grades_removed }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
