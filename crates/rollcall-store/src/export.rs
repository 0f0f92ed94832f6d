//! Course statistics and CSV exports built from attendance records.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use serde::Serialize;

use crate::model::{AttendanceRecord, Course};
use crate::store::StoreError;

/// Headline numbers for one course.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseStats {
    /// Distinct lecture dates with at least one student present.
    pub lectures_held: usize,
    pub lecture_count: u32,
    pub students_seen: usize,
    pub capacity: u32,
    /// Present count per lecture date, oldest first.
    pub per_date: Vec<DatePresence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatePresence {
    pub lecture_date: String,
    pub present: usize,
}

/// One student's attendance across the course.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub student_id: String,
    pub name: String,
    pub attended: usize,
    pub lecture_count: u32,
    pub rate: String,
}

pub fn course_stats(course: &Course, records: &[AttendanceRecord]) -> CourseStats {
    let mut per_date: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut students = BTreeSet::new();
    for r in records {
        per_date
            .entry(r.lecture_date.as_str())
            .or_default()
            .insert(r.student_id.as_str());
        students.insert(r.student_id.as_str());
    }

    CourseStats {
        lectures_held: per_date.len(),
        lecture_count: course.lecture_count,
        students_seen: students.len(),
        capacity: course.capacity,
        per_date: per_date
            .into_iter()
            .map(|(date, present)| DatePresence {
                lecture_date: date.to_string(),
                present: present.len(),
            })
            .collect(),
    }
}

/// Per-student attendance, ordered by student id. The latest name seen wins.
pub fn summary_rows(course: &Course, records: &[AttendanceRecord]) -> Vec<SummaryRow> {
    let mut by_student: BTreeMap<&str, (&str, BTreeSet<&str>)> = BTreeMap::new();
    for r in chronological(records) {
        let entry = by_student
            .entry(r.student_id.as_str())
            .or_insert_with(|| (r.name.as_str(), BTreeSet::new()));
        entry.0 = r.name.as_str();
        entry.1.insert(r.lecture_date.as_str());
    }

    by_student
        .into_iter()
        .map(|(student_id, (name, dates))| SummaryRow {
            student_id: student_id.to_string(),
            name: name.to_string(),
            attended: dates.len(),
            lecture_count: course.lecture_count,
            rate: attendance_rate(dates.len(), course.lecture_count),
        })
        .collect()
}

fn chronological(records: &[AttendanceRecord]) -> Vec<&AttendanceRecord> {
    let mut sorted: Vec<&AttendanceRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        (a.lecture_date.as_str(), a.marked_at).cmp(&(b.lecture_date.as_str(), b.marked_at))
    });
    sorted
}

/// Percentage with one decimal; `0.0` when no lectures are scheduled.
pub fn attendance_rate(attended: usize, lecture_count: u32) -> String {
    if lecture_count == 0 {
        return "0.0".to_string();
    }
    format!("{:.1}", attended as f64 * 100.0 / f64::from(lecture_count))
}

/// Write one row per record: `lecture_date,marked_at,student_id,name,course_code`.
pub fn write_records_csv<W: Write>(out: W, records: &[AttendanceRecord]) -> Result<(), StoreError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["lecture_date", "marked_at", "student_id", "name", "course_code"])?;
    for r in chronological(records) {
        let marked_at = r.marked_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        writer.write_record([
            r.lecture_date.as_str(),
            marked_at.as_str(),
            r.student_id.as_str(),
            r.name.as_str(),
            r.course_code.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one row per student: `student_id,name,attended,lecture_count,rate`.
pub fn write_summary_csv<W: Write>(
    out: W,
    course: &Course,
    records: &[AttendanceRecord],
) -> Result<(), StoreError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(["student_id", "name", "attended", "lecture_count", "rate"])?;
    for row in summary_rows(course, records) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;

    fn course() -> Course {
        Course {
            code: "CS101".into(),
            name: "Intro".into(),
            instructor: "Dr. Okafor".into(),
            password_hash: String::new(),
            start_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            lecture_count: 3,
            capacity: 50,
        }
    }

    fn record(student_id: &str, name: &str, date: &str, hour: u32) -> AttendanceRecord {
        let day: u32 = date[8..].parse().unwrap();
        AttendanceRecord {
            id: format!("{student_id}-{date}"),
            student_id: student_id.into(),
            course_code: "CS101".into(),
            course_name: "Intro".into(),
            instructor: "Dr. Okafor".into(),
            name: name.into(),
            marked_at: Utc.with_ymd_and_hms(2026, 9, day, hour, 0, 0).unwrap(),
            lecture_date: date.into(),
        }
    }

    fn records() -> Vec<AttendanceRecord> {
        vec![
            record("S2", "Grace", "2026-09-08", 10),
            record("S1", "Ada", "2026-09-01", 9),
            record("S1", "Ada L.", "2026-09-08", 9),
            record("S2", "Grace", "2026-09-01", 11),
        ]
    }

    #[test]
    fn test_course_stats() {
        let stats = course_stats(&course(), &records());
        assert_eq!(stats.lectures_held, 2);
        assert_eq!(stats.students_seen, 2);
        assert_eq!(stats.capacity, 50);
        assert_eq!(
            stats.per_date,
            vec![
                DatePresence { lecture_date: "2026-09-01".into(), present: 2 },
                DatePresence { lecture_date: "2026-09-08".into(), present: 2 },
            ]
        );
    }

    #[test]
    fn test_course_stats_empty() {
        let stats = course_stats(&course(), &[]);
        assert_eq!(stats.lectures_held, 0);
        assert!(stats.per_date.is_empty());
    }

    #[test]
    fn test_records_csv_header_and_order() {
        let mut out = Vec::new();
        write_records_csv(&mut out, &records()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "lecture_date,marked_at,student_id,name,course_code");
        assert_eq!(lines[1], "2026-09-01,2026-09-01T09:00:00Z,S1,Ada,CS101");
        assert_eq!(lines[2], "2026-09-01,2026-09-01T11:00:00Z,S2,Grace,CS101");
        assert_eq!(lines[3], "2026-09-08,2026-09-08T09:00:00Z,S1,Ada L.,CS101");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_summary_csv_rates() {
        let mut only_ada = records();
        only_ada.retain(|r| r.student_id == "S1" || r.lecture_date == "2026-09-01");

        let mut out = Vec::new();
        write_summary_csv(&mut out, &course(), &only_ada).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "student_id,name,attended,lecture_count,rate");
        assert_eq!(lines[1], "S1,Ada L.,2,3,66.7");
        assert_eq!(lines[2], "S2,Grace,1,3,33.3");
    }

    #[test]
    fn test_summary_counts_each_date_once() {
        let mut dup = records();
        dup.push(record("S1", "Ada L.", "2026-09-08", 12));
        let rows = summary_rows(&course(), &dup);
        assert_eq!(rows[0].attended, 2);
    }

    #[test]
    fn test_summary_csv_empty_has_header() {
        let mut out = Vec::new();
        write_summary_csv(&mut out, &course(), &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "student_id,name,attended,lecture_count,rate\n"
        );
    }

    #[test]
    fn test_attendance_rate_zero_lectures() {
        assert_eq!(attendance_rate(4, 0), "0.0");
        assert_eq!(attendance_rate(3, 3), "100.0");
    }
}
