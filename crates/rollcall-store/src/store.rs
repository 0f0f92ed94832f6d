use futures::future::BoxFuture;
use rollcall_core::Embedding;
use thiserror::Error;

use crate::model::{AttendanceRecord, Course, NewAttendance, Student};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("{kind} already exists: {key}")]
    Conflict { kind: &'static str, key: String },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Key-addressed persistence for students, courses and attendance.
///
/// Students and courses behave like documents keyed by id/code: writing an
/// existing key replaces it. Attendance is append-only.
pub trait Store: Send + Sync {
    /// Create or replace a student; `registered_at` is set to now.
    fn put_student(
        &self,
        student_id: String,
        name: String,
        embedding: Embedding,
    ) -> BoxFuture<'_, Result<Student, StoreError>>;

    fn get_student<'a>(&'a self, student_id: &'a str)
        -> BoxFuture<'a, Result<Option<Student>, StoreError>>;

    /// All students, ordered by id.
    fn list_students(&self) -> BoxFuture<'_, Result<Vec<Student>, StoreError>>;

    /// Returns false if there was no such student.
    fn delete_student<'a>(&'a self, student_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Create a course; fails with [`StoreError::Conflict`] if the code is taken.
    fn insert_course(&self, course: Course) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Replace an existing course. Returns false if there was no such course.
    fn replace_course(&self, course: Course) -> BoxFuture<'_, Result<bool, StoreError>>;

    fn get_course<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<Option<Course>, StoreError>>;

    /// All courses, ordered by code.
    fn list_courses(&self) -> BoxFuture<'_, Result<Vec<Course>, StoreError>>;

    /// Returns false if there was no such course.
    fn delete_course<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Append an attendance record stamped with the current time.
    fn add_attendance(
        &self,
        attendance: NewAttendance,
    ) -> BoxFuture<'_, Result<AttendanceRecord, StoreError>>;

    /// A course's attendance, ordered by lecture date then time of marking.
    fn course_attendance<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AttendanceRecord>, StoreError>>;
}
