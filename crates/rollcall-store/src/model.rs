//! Stored records and the drafts used to create them.

use chrono::{DateTime, Local, NaiveDate, Utc};
use rollcall_core::Embedding;
use serde::{Deserialize, Serialize};

use crate::password;

/// A registered student, keyed by `student_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub embedding: Embedding,
    pub registered_at: DateTime<Utc>,
}

/// Student as listed to administrators; the embedding stays server-side.
#[derive(Debug, Clone, Serialize)]
pub struct StudentListing {
    pub student_id: String,
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

impl From<&Student> for StudentListing {
    fn from(s: &Student) -> Self {
        Self {
            student_id: s.student_id.clone(),
            name: s.name.clone(),
            registered_at: s.registered_at,
        }
    }
}

/// A course, keyed by `code`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Course {
    pub code: String,
    pub name: String,
    pub instructor: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub start_date: NaiveDate,
    pub lecture_count: u32,
    pub capacity: u32,
}

impl Course {
    pub fn check_password(&self, password: &str) -> bool {
        password::verify(password, &self.password_hash)
    }
}

/// Course fields as submitted by an administrator.
///
/// `password` may be empty when updating, which keeps the current one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseDraft {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instructor: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub lecture_count: u32,
    #[serde(default)]
    pub capacity: u32,
}

/// Why a course draft was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CourseDraftError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("start date must be YYYY-MM-DD, got {0:?}")]
    BadDate(String),
    #[error("{0} must be at least 1")]
    NotPositive(&'static str),
}

impl CourseDraft {
    /// Validate and build a new course; the password is required.
    pub fn into_course(self) -> Result<Course, CourseDraftError> {
        if self.password.trim().is_empty() {
            return Err(CourseDraftError::Missing("password"));
        }
        let password_hash = password::hash(self.password.trim());
        self.build(password_hash)
    }

    /// Validate and build a replacement for `current`; the code is taken from `current`.
    pub fn into_replacement(mut self, current: &Course) -> Result<Course, CourseDraftError> {
        self.code = current.code.clone();
        let password_hash = match self.password.trim() {
            "" => current.password_hash.clone(),
            p => password::hash(p),
        };
        self.build(password_hash)
    }

    fn build(self, password_hash: String) -> Result<Course, CourseDraftError> {
        let code = required(&self.code, "code")?;
        let name = required(&self.name, "name")?;
        let instructor = required(&self.instructor, "instructor")?;
        let date = required(&self.start_date, "start date")?;
        let start_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|_| CourseDraftError::BadDate(date.clone()))?;
        if self.lecture_count == 0 {
            return Err(CourseDraftError::NotPositive("lecture count"));
        }
        if self.capacity == 0 {
            return Err(CourseDraftError::NotPositive("capacity"));
        }

        Ok(Course {
            code,
            name,
            instructor,
            password_hash,
            start_date,
            lecture_count: self.lecture_count,
            capacity: self.capacity,
        })
    }
}

fn required(value: &str, field: &'static str) -> Result<String, CourseDraftError> {
    match value.trim() {
        "" => Err(CourseDraftError::Missing(field)),
        v => Ok(v.to_string()),
    }
}

/// One student present at one lecture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub course_code: String,
    pub course_name: String,
    pub instructor: String,
    /// Student name at the time of marking.
    pub name: String,
    pub marked_at: DateTime<Utc>,
    /// Local calendar date of the lecture, `YYYY-MM-DD`.
    pub lecture_date: String,
}

/// Attendance to append; id and timestamps are filled in on write.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student_id: String,
    pub name: String,
    pub course_code: String,
    pub course_name: String,
    pub instructor: String,
}

impl NewAttendance {
    pub fn stamp(self, now: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: self.student_id,
            course_code: self.course_code,
            course_name: self.course_name,
            instructor: self.instructor,
            name: self.name,
            marked_at: now,
            lecture_date: lecture_date(now),
        }
    }
}

/// Local `YYYY-MM-DD` for a timestamp.
pub fn lecture_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> CourseDraft {
        CourseDraft {
            code: " CS101 ".into(),
            name: "Intro to Computing".into(),
            instructor: "Dr. Okafor".into(),
            password: "letmein".into(),
            start_date: "2026-09-01".into(),
            lecture_count: 24,
            capacity: 60,
        }
    }

    #[test]
    fn test_draft_builds_course() {
        let course = draft().into_course().unwrap();
        assert_eq!(course.code, "CS101");
        assert_eq!(course.start_date, NaiveDate::from_ymd_opt(2026, 9, 1).unwrap());
        assert!(course.check_password("letmein"));
        assert!(!course.check_password("wrong"));
        assert_ne!(course.password_hash, "letmein");
    }

    #[test]
    fn test_draft_requires_fields() {
        let mut d = draft();
        d.name = "  ".into();
        assert_eq!(d.into_course(), Err(CourseDraftError::Missing("name")));

        let mut d = draft();
        d.password = String::new();
        assert_eq!(d.into_course(), Err(CourseDraftError::Missing("password")));
    }

    #[test]
    fn test_draft_rejects_bad_date_and_zero_counts() {
        let mut d = draft();
        d.start_date = "01/09/2026".into();
        assert!(matches!(d.into_course(), Err(CourseDraftError::BadDate(_))));

        let mut d = draft();
        d.capacity = 0;
        assert_eq!(d.into_course(), Err(CourseDraftError::NotPositive("capacity")));

        let mut d = draft();
        d.lecture_count = 0;
        assert_eq!(d.into_course(), Err(CourseDraftError::NotPositive("lecture count")));
    }

    #[test]
    fn test_replacement_keeps_code_and_password() {
        let current = draft().into_course().unwrap();
        let mut update = draft();
        update.code = "OTHER".into();
        update.password = String::new();
        update.capacity = 80;

        let replaced = update.into_replacement(&current).unwrap();
        assert_eq!(replaced.code, "CS101");
        assert_eq!(replaced.capacity, 80);
        assert!(replaced.check_password("letmein"));
    }

    #[test]
    fn test_stamp_fills_id_and_date() {
        let now = Utc::now();
        let record = NewAttendance {
            student_id: "S1".into(),
            name: "Ada".into(),
            course_code: "CS101".into(),
            course_name: "Intro".into(),
            instructor: "Dr. Okafor".into(),
        }
        .stamp(now);
        assert!(!record.id.is_empty());
        assert_eq!(record.marked_at, now);
        assert_eq!(record.lecture_date, lecture_date(now));
        assert_eq!(record.lecture_date.len(), 10);
    }
}
