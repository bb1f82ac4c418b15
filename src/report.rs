use crate::grading::{
    self, classify, ClassOverview, GradeBucket, RankedStudent, StudentStanding, SubjectScore,
};
use serde::Serialize;

pub const PAGE_WIDTH: usize = 78;
pub const PAGE_LINES: usize = 60;
// Last two lines of every page are a spacer plus the footer disclaimer.
const PAGE_BODY_LINES: usize = PAGE_LINES - 2;

const FOOTER_TEXT: &str =
    "This is a computer generated report and does not require physical signature.";

/// Fixed grade -> remark table from the report card layout.
pub fn remark_for_grade(grade: &str) -> &'static str {
    match grade {
        "A" => "Excellent",
        "A-" => "Very Good",
        "B+" => "Good",
        "B" => "Above Average",
        "B-" => "Average",
        "C+" => "Fair",
        "C" => "Satisfactory",
        "C-" => "Below Average",
        "D+" => "Needs Improvement",
        "D" => "Poor",
        "E" => "Very Poor",
        _ => "N/A",
    }
}

/// Fixed grade -> class teacher's comment table.
pub fn comment_for_grade(grade: &str) -> &'static str {
    match grade {
        "A" => "Outstanding performance! Keep up the excellent work.",
        "A-" => "Excellent performance. Continue with the same spirit.",
        "B+" => "Very good performance. Keep working hard.",
        "B" => "Good work. With more effort, you can improve further.",
        "B-" => "Satisfactory performance. Put in more effort to improve.",
        "C+" => "Average performance. You need to work harder in your weak areas.",
        "C" => "Fair performance. Need to improve your study habits and consistency.",
        "C-" => "Below average performance. Please seek extra help in difficult subjects.",
        "D+" | "D" => "Poor performance. Requires significant improvement and regular tutoring.",
        "E" => "Very poor performance. Immediate attention and remedial classes are required.",
        _ => "No grades available for assessment.",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Page {
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub pages: Vec<Page>,
}

impl Document {
    /// Plain-text rendering, pages separated by form feeds.
    pub fn render_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.lines.join("\n"))
            .collect::<Vec<_>>()
            .join("\n\x0c\n")
    }
}

/// Identity block fields for the report card header. Absent fields render as
/// "N/A" rather than failing layout.
#[derive(Debug, Clone, Default)]
pub struct StudentIdentity {
    pub name: Option<String>,
    pub form: Option<String>,
    pub admission_number: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
}

/// Per-student input to the class report: raw subject scores, aggregation
/// happens inside the composer.
#[derive(Debug, Clone)]
pub struct ClassReportStudent {
    pub name: String,
    pub scores: Vec<f64>,
}

/// Surrounding-app convention: `{studentNameOrForm}_{term}_{year}_Report.txt`.
pub fn report_file_name(subject_or_form: &str, term: &str, year: i64) -> String {
    let safe = |s: &str| s.replace(['/', '\\'], "-");
    format!("{}_{}_{}_Report.txt", safe(subject_or_form), safe(term), year)
}

fn center(text: &str) -> String {
    let chars = text.chars().count();
    if chars >= PAGE_WIDTH {
        return text.to_string();
    }
    format!("{}{}", " ".repeat((PAGE_WIDTH - chars) / 2), text)
}

fn two_column(left: &str, right: &str) -> String {
    format!("{:<38} {}", left, right)
}

fn table_line(cells: &[&str], widths: &[usize]) -> String {
    let mut out = String::new();
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        // Clip and pad by chars, not bytes: names are arbitrary UTF-8.
        let text: String = cell.chars().take(*width).collect();
        let pad = width.saturating_sub(text.chars().count());
        out.push_str(&text);
        out.push_str(&" ".repeat(pad));
    }
    out.trim_end().to_string()
}

fn table_rule(widths: &[usize]) -> String {
    let total: usize = widths.iter().sum::<usize>() + 2 * (widths.len() - 1);
    "-".repeat(total)
}

/// Accumulates lines into fixed-height pages, repeating a table header after
/// each page break while one is armed.
struct DocBuilder {
    pages: Vec<Page>,
    current: Vec<String>,
    table_header: Option<Vec<String>>,
}

impl DocBuilder {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            table_header: None,
        }
    }

    fn push(&mut self, line: impl Into<String>) {
        if self.current.len() >= PAGE_BODY_LINES {
            self.break_page();
            if let Some(header) = self.table_header.clone() {
                for h in header {
                    self.current.push(h);
                }
            }
        }
        self.current.push(line.into());
    }

    fn blank(&mut self) {
        self.push("");
    }

    fn set_table_header(&mut self, header: Vec<String>) {
        self.table_header = Some(header);
    }

    fn clear_table_header(&mut self) {
        self.table_header = None;
    }

    fn break_page(&mut self) {
        let mut lines = std::mem::take(&mut self.current);
        while lines.len() < PAGE_BODY_LINES {
            lines.push(String::new());
        }
        lines.push(String::new());
        lines.push(center(FOOTER_TEXT));
        self.pages.push(Page { lines });
    }

    fn finish(mut self) -> Document {
        self.break_page();
        Document { pages: self.pages }
    }
}

fn push_title_block(doc: &mut DocBuilder, subtitle: &str, term: &str, year: i64) {
    doc.push(center("SCHOOL NAME"));
    doc.blank();
    doc.push(center(subtitle));
    doc.blank();
    doc.push(center(&format!("{} - {}", term, year)));
    doc.blank();
}

fn or_na(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => "N/A".to_string(),
    }
}

/// Individual report card: identity block, subject table, performance
/// summary, teacher's comment, signature lines.
pub fn compose_student_report(
    identity: &StudentIdentity,
    scores: &[SubjectScore],
    term: &str,
    year: i64,
    generated_on: &str,
) -> Document {
    let mut doc = DocBuilder::new();
    push_title_block(&mut doc, "ACADEMIC REPORT CARD", term, year);

    doc.push(two_column(
        &format!("Name: {}", or_na(identity.name.as_deref())),
        &format!("Date of Birth: {}", or_na(identity.date_of_birth.as_deref())),
    ));
    doc.push(two_column(
        &format!("Form: {}", or_na(identity.form.as_deref())),
        &format!("Gender: {}", or_na(identity.gender.as_deref())),
    ));
    doc.push(two_column(
        &format!(
            "Admission Number: {}",
            or_na(identity.admission_number.as_deref())
        ),
        &format!("Report Date: {}", generated_on),
    ));
    doc.blank();

    let widths = [26, 8, 7, 25];
    let header = vec![
        table_line(&["Subject", "Score", "Grade", "Remarks"], &widths),
        table_rule(&widths),
    ];
    for line in &header {
        doc.push(line.clone());
    }
    doc.set_table_header(header);

    if scores.is_empty() {
        doc.push(table_line(&["No grades available", "", "", ""], &widths));
    } else {
        for s in scores {
            doc.push(table_line(
                &[
                    s.subject.as_str(),
                    &format!("{:.1}", s.score),
                    &s.letter_grade,
                    remark_for_grade(&s.letter_grade),
                ],
                &widths,
            ));
        }
    }
    doc.clear_table_header();
    doc.blank();

    let raw: Vec<f64> = scores.iter().map(|s| s.score).collect();
    let total: f64 = raw.iter().sum();
    let averaged = grading::average(&raw).ok();
    let overall = averaged.map(classify);

    doc.push("Performance Summary:");
    doc.push(format!("  Total Subjects: {}", scores.len()));
    doc.push(format!("  Total Score: {:.1}", total));
    doc.push(format!(
        "  Average Score: {}",
        averaged
            .map(|a| format!("{:.2}", a))
            .unwrap_or_else(|| "N/A".to_string())
    ));
    doc.push(format!(
        "  Overall Grade: {}",
        overall.unwrap_or("N/A")
    ));
    doc.blank();

    doc.push("Class Teacher's Comments:");
    // Unmapped branch of the comment table doubles as the no-grades message.
    doc.push(format!(
        "  {}",
        comment_for_grade(overall.unwrap_or(""))
    ));
    doc.blank();
    doc.blank();

    doc.push(two_column(
        "Principal's Signature: ______________________",
        "Date: ______________",
    ));

    doc.finish()
}

/// Class roster report: ranked table, class summary, grade distribution.
pub fn compose_class_report(
    form: &str,
    students: &[ClassReportStudent],
    term: &str,
    year: i64,
    generated_on: &str,
) -> Document {
    let standings: Vec<StudentStanding> = students
        .iter()
        .filter_map(|s| {
            let avg = grading::average(&s.scores).ok()?;
            Some(StudentStanding {
                name: s.name.clone(),
                subject_count: s.scores.len(),
                average: avg,
                grade: classify(avg).to_string(),
            })
        })
        .collect();
    let ranked = grading::rank(standings);
    let overview = grading::class_overview(&ranked);
    let dist = grading::distribution(&ranked);

    compose_class_report_from_ranked(form, &ranked, overview.as_ref(), &dist, term, year, generated_on)
}

fn compose_class_report_from_ranked(
    form: &str,
    ranked: &[RankedStudent],
    overview: Option<&ClassOverview>,
    dist: &[GradeBucket],
    term: &str,
    year: i64,
    generated_on: &str,
) -> Document {
    let mut doc = DocBuilder::new();
    push_title_block(&mut doc, &format!("{} - CLASS REPORT", form.to_uppercase()), term, year);
    doc.push(format!("Report Date: {}", generated_on));
    doc.blank();

    if ranked.is_empty() {
        doc.push("No students recorded for this report.");
        doc.blank();
        doc.push("Class Performance Summary:");
        doc.push("  Number of Students: 0");
        return doc.finish();
    }

    let widths = [3, 26, 8, 7, 5, 17];
    let header = vec![
        table_line(
            &["Pos", "Student Name", "Subjects", "Average", "Grade", "Remarks"],
            &widths,
        ),
        table_rule(&widths),
    ];
    for line in &header {
        doc.push(line.clone());
    }
    doc.set_table_header(header);

    for r in ranked {
        doc.push(table_line(
            &[
                &r.position.to_string(),
                r.name.as_str(),
                &r.subject_count.to_string(),
                &format!("{:.2}", r.average),
                &r.grade,
                remark_for_grade(&r.grade),
            ],
            &widths,
        ));
    }
    doc.clear_table_header();
    doc.blank();

    doc.push("Class Performance Summary:");
    if let Some(o) = overview {
        doc.push(format!("  Number of Students: {}", o.student_count));
        doc.push(format!("  Class Average: {:.2}", o.class_average));
        doc.push(format!("  Class Grade: {}", o.class_grade));
    }
    doc.blank();

    doc.push("Grade Distribution:");
    for bucket in dist {
        doc.push(format!(
            "  {}: {} students ({}%)",
            bucket.grade, bucket.count, bucket.percentage
        ));
    }

    doc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::GradeStatus;

    fn subject(subject: &str, score: f64) -> SubjectScore {
        SubjectScore {
            subject: subject.to_string(),
            score,
            letter_grade: classify(score).to_string(),
            status: GradeStatus::Approved,
        }
    }

    fn flat(doc: &Document) -> String {
        doc.render_text()
    }

    #[test]
    fn student_report_lays_out_identity_table_and_summary() {
        let identity = StudentIdentity {
            name: Some("Amina Wanjiku".to_string()),
            form: Some("Form 3".to_string()),
            admission_number: None,
            date_of_birth: Some("2008-03-14".to_string()),
            gender: None,
        };
        let scores = vec![
            subject("Mathematics", 78.0),
            subject("English", 85.0),
            subject("Physics", 72.0),
            subject("Chemistry", 68.0),
            subject("Biology", 75.0),
        ];

        let doc = compose_student_report(&identity, &scores, "Term 2", 2025, "2025-06-01");
        let text = flat(&doc);

        assert!(text.contains("ACADEMIC REPORT CARD"));
        assert!(text.contains("Term 2 - 2025"));
        assert!(text.contains("Name: Amina Wanjiku"));
        assert!(text.contains("Admission Number: N/A"));
        assert!(text.contains("Gender: N/A"));
        assert!(text.contains("Report Date: 2025-06-01"));
        // 378 / 5 = 75.6 -> B+
        assert!(text.contains("Total Subjects: 5"));
        assert!(text.contains("Total Score: 378.0"));
        assert!(text.contains("Average Score: 75.60"));
        assert!(text.contains("Overall Grade: B+"));
        assert!(text.contains("Very good performance. Keep working hard."));
        assert!(text.contains(FOOTER_TEXT));
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].lines.len(), PAGE_LINES);
    }

    #[test]
    fn student_report_without_grades_uses_placeholders() {
        let identity = StudentIdentity::default();
        let doc = compose_student_report(&identity, &[], "Term 1", 2025, "2025-02-01");
        let text = flat(&doc);

        assert!(text.contains("Name: N/A"));
        assert!(text.contains("No grades available"));
        assert!(text.contains("Total Subjects: 0"));
        assert!(text.contains("Average Score: N/A"));
        assert!(text.contains("Overall Grade: N/A"));
        assert!(text.contains("No grades available for assessment."));
    }

    #[test]
    fn student_report_is_idempotent() {
        let identity = StudentIdentity {
            name: Some("David Ochieng".to_string()),
            form: Some("Form 3".to_string()),
            ..StudentIdentity::default()
        };
        let scores = vec![subject("Mathematics", 65.0), subject("English", 72.0)];
        let a = compose_student_report(&identity, &scores, "Term 2", 2025, "2025-06-01");
        let b = compose_student_report(&identity, &scores, "Term 2", 2025, "2025-06-01");
        assert_eq!(a, b);
    }

    #[test]
    fn class_report_ranks_and_summarizes() {
        let students = vec![
            ClassReportStudent {
                name: "Faith Muthoni".to_string(),
                scores: vec![92.0],
            },
            ClassReportStudent {
                name: "John Kamau".to_string(),
                scores: vec![58.0],
            },
        ];
        let doc = compose_class_report("Form 3", &students, "Term 1", 2025, "2025-03-01");
        let text = flat(&doc);

        assert!(text.contains("FORM 3 - CLASS REPORT"));
        assert!(text.contains("Number of Students: 2"));
        assert!(text.contains("Class Average: 75.00"));
        assert!(text.contains("Class Grade: B+"));
        assert!(text.contains("A: 1 students (50%)"));
        assert!(text.contains("C-: 1 students (50%)"));

        // Faith ranks first.
        let faith = text.find("Faith Muthoni").expect("faith row");
        let john = text.find("John Kamau").expect("john row");
        assert!(faith < john);
    }

    #[test]
    fn multibyte_names_are_clipped_without_panicking() {
        let long = format!("N{}", "\u{e9}".repeat(40));
        let students = vec![ClassReportStudent {
            name: long.clone(),
            scores: vec![71.0],
        }];
        let doc = compose_class_report("Form 2", &students, "Term 1", 2025, "2025-03-01");
        let text = flat(&doc);

        // Clipped to the name column width (26 chars), never a byte slice.
        let clipped: String = long.chars().take(26).collect();
        assert!(text.contains(&clipped));
        assert!(!text.contains(&long));
        for page in &doc.pages {
            for line in &page.lines {
                assert!(line.chars().count() <= PAGE_WIDTH, "overwide line: {:?}", line);
            }
        }

        let identity = StudentIdentity {
            name: Some(long),
            ..StudentIdentity::default()
        };
        let scores = vec![subject("Kiswahili", 71.0)];
        compose_student_report(&identity, &scores, "Term 1", 2025, "2025-03-01");
    }

    #[test]
    fn empty_class_report_flags_no_data() {
        let doc = compose_class_report("Form 5", &[], "Term 1", 2025, "2025-03-01");
        let text = flat(&doc);
        assert!(text.contains("No students recorded for this report."));
        assert!(text.contains("Number of Students: 0"));
        assert!(!text.contains("Class Average"));
    }

    #[test]
    fn long_roster_paginates_and_repeats_table_header() {
        let students: Vec<ClassReportStudent> = (0..120)
            .map(|i| ClassReportStudent {
                name: format!("Student {:03}", i),
                scores: vec![40.0 + (i % 60) as f64],
            })
            .collect();
        let doc = compose_class_report("Form 2", &students, "Term 3", 2025, "2025-11-01");
        assert!(doc.pages.len() > 1);
        for page in &doc.pages {
            assert_eq!(page.lines.len(), PAGE_LINES);
            assert!(page.lines.last().expect("footer").contains(FOOTER_TEXT));
        }
        // Continuation pages re-print the roster header.
        assert!(doc.pages[1]
            .lines
            .iter()
            .any(|l| l.contains("Pos") && l.contains("Student Name")));
    }

    #[test]
    fn file_name_follows_convention() {
        assert_eq!(
            report_file_name("Amina Wanjiku", "Term 2", 2025),
            "Amina Wanjiku_Term 2_2025_Report.txt"
        );
        assert_eq!(
            report_file_name("Form 1/West", "Term 1", 2024),
            "Form 1-West_Term 1_2024_Report.txt"
        );
    }

    #[test]
    fn lookup_tables_default_to_na() {
        assert_eq!(remark_for_grade("A"), "Excellent");
        assert_eq!(remark_for_grade("E"), "Very Poor");
        assert_eq!(remark_for_grade("Z"), "N/A");
        assert_eq!(
            comment_for_grade("A"),
            "Outstanding performance! Keep up the excellent work."
        );
        assert_eq!(
            comment_for_grade(""),
            "No grades available for assessment."
        );
    }
}
