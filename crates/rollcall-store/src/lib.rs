//! rollcall-store — Students, courses and attendance records.
//!
//! A [`Store`] trait with SQLite and in-memory implementations, plus the
//! course statistics and CSV exports derived from attendance.

pub mod export;
pub mod memory;
pub mod model;
pub mod password;
pub mod sqlite;
pub mod store;

pub use export::{course_stats, write_records_csv, write_summary_csv, CourseStats};
pub use memory::MemoryStore;
pub use model::{
    AttendanceRecord, Course, CourseDraft, CourseDraftError, NewAttendance, Student, StudentListing,
};
pub use sqlite::SqliteStore;
pub use store::{Store, StoreError};
