//! Bookkeeping for one running attendance session.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use rollcall_core::RecognitionStatus;
use rollcall_store::{Course, NewAttendance, Store};
use serde::Serialize;

use crate::lock;

#[derive(Debug, Clone)]
struct Sighting {
    name: String,
    last_seen: DateTime<Local>,
}

/// A student seen by the camera during this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognizedStudent {
    pub student_id: String,
    pub name: String,
    /// Local time of the latest sighting, `HH:MM:SS`.
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_recognized: usize,
    pub total_marked: usize,
}

#[derive(Debug, Default)]
pub struct AttendanceSession {
    recognized: HashMap<String, Sighting>,
    marked: HashSet<String>,
}

impl AttendanceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting and report whether the student still needs marking.
    pub fn observe(&mut self, student_id: &str, name: &str, now: DateTime<Local>) -> RecognitionStatus {
        self.recognized.insert(
            student_id.to_string(),
            Sighting {
                name: name.to_string(),
                last_seen: now,
            },
        );
        if self.marked.contains(student_id) {
            RecognitionStatus::AlreadyMarked
        } else {
            RecognitionStatus::New
        }
    }

    /// Everyone seen this session, most recent sighting first.
    pub fn recognized_students(&self) -> Vec<RecognizedStudent> {
        let mut seen: Vec<(&String, &Sighting)> = self.recognized.iter().collect();
        seen.sort_by(|a, b| b.1.last_seen.cmp(&a.1.last_seen).then_with(|| a.0.cmp(b.0)));
        seen.into_iter()
            .map(|(id, s)| RecognizedStudent {
                student_id: id.clone(),
                name: s.name.clone(),
                timestamp: s.last_seen.format("%H:%M:%S").to_string(),
            })
            .collect()
    }

    /// Recognized but not yet marked, ordered by student id.
    pub fn pending(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .recognized
            .keys()
            .filter(|id| !self.marked.contains(*id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn is_marked(&self, student_id: &str) -> bool {
        self.marked.contains(student_id)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            total_recognized: self.recognized.len(),
            total_marked: self.marked.len(),
        }
    }

    pub fn reset(&mut self) {
        self.recognized.clear();
        self.marked.clear();
    }

    /// Move every pending student into `marked` and return them.
    ///
    /// Claimed ids are marked before any write so concurrent callers never
    /// write the same student twice; failed writes are handed back with
    /// [`Self::release`].
    fn claim_pending(&mut self) -> Vec<String> {
        let pending = self.pending();
        self.marked.extend(pending.iter().cloned());
        pending
    }

    fn release(&mut self, student_id: &str) {
        self.marked.remove(student_id);
    }
}

/// Outcome of [`mark_attendance`].
#[derive(Debug, Clone, Serialize)]
pub struct MarkOutcome {
    pub marked_count: usize,
    pub students: Vec<MarkedStudent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkedStudent {
    pub student_id: String,
    pub name: String,
}

/// Write an attendance record for every pending student in the session.
///
/// Students missing from the store are skipped; a failed write leaves the
/// student pending. Both cases are logged and stay eligible for the next call.
pub async fn mark_attendance(
    session: &Mutex<AttendanceSession>,
    store: &dyn Store,
    course: &Course,
) -> MarkOutcome {
    let claimed = lock(session).claim_pending();
    let mut students = Vec::new();

    for student_id in claimed {
        let student = match store.get_student(&student_id).await {
            Ok(Some(student)) => student,
            Ok(None) => {
                tracing::warn!(student_id = %student_id, "recognized student no longer registered; skipping");
                lock(session).release(&student_id);
                continue;
            }
            Err(e) => {
                tracing::error!(student_id = %student_id, error = %e, "student lookup failed");
                lock(session).release(&student_id);
                continue;
            }
        };

        let attendance = NewAttendance {
            student_id: student.student_id.clone(),
            name: student.name.clone(),
            course_code: course.code.clone(),
            course_name: course.name.clone(),
            instructor: course.instructor.clone(),
        };
        match store.add_attendance(attendance).await {
            Ok(record) => {
                tracing::info!(
                    student_id = %record.student_id,
                    course = %record.course_code,
                    lecture_date = %record.lecture_date,
                    "attendance marked"
                );
                students.push(MarkedStudent {
                    student_id: record.student_id,
                    name: record.name,
                });
            }
            Err(e) => {
                tracing::error!(student_id = %student_id, error = %e, "failed to write attendance");
                lock(session).release(&student_id);
            }
        }
    }

    MarkOutcome {
        marked_count: students.len(),
        students,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::{NaiveDate, TimeZone};
    use futures::future::{self, BoxFuture, FutureExt};
    use rollcall_core::Embedding;
    use rollcall_store::{AttendanceRecord, MemoryStore, StoreError, Student};

    use super::*;

    fn at(secs: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, 9, 0, secs).unwrap()
    }

    fn course() -> Course {
        Course {
            code: "CS101".into(),
            name: "Intro".into(),
            instructor: "Dr. Okafor".into(),
            password_hash: String::new(),
            start_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            lecture_count: 20,
            capacity: 40,
        }
    }

    #[test]
    fn test_observe_new_until_marked() {
        let mut session = AttendanceSession::new();
        assert_eq!(session.observe("S1", "Ada", at(0)), RecognitionStatus::New);
        assert_eq!(session.observe("S1", "Ada", at(1)), RecognitionStatus::New);

        assert_eq!(session.claim_pending(), vec!["S1"]);
        assert_eq!(session.observe("S1", "Ada", at(2)), RecognitionStatus::AlreadyMarked);
        assert!(session.pending().is_empty());
    }

    #[test]
    fn test_recognized_sorted_newest_first() {
        let mut session = AttendanceSession::new();
        session.observe("S1", "Ada", at(5));
        session.observe("S2", "Grace", at(9));
        session.observe("S3", "Linus", at(7));

        let list = session.recognized_students();
        let ids: Vec<&str> = list.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S3", "S1"]);
        assert_eq!(list[0].timestamp, "09:00:09");
    }

    #[test]
    fn test_stats_and_reset() {
        let mut session = AttendanceSession::new();
        session.observe("S1", "Ada", at(0));
        session.observe("S2", "Grace", at(0));
        session.claim_pending();
        session.observe("S3", "Linus", at(1));
        assert_eq!(
            session.stats(),
            SessionStats {
                total_recognized: 3,
                total_marked: 2
            }
        );
        assert_eq!(session.pending(), vec!["S3"]);

        session.reset();
        assert_eq!(session.stats().total_recognized, 0);
        assert!(!session.is_marked("S1"));
    }

    #[tokio::test]
    async fn test_mark_attendance_writes_once() {
        let store = MemoryStore::new();
        store.put_student("S1".into(), "Ada".into(), Embedding::new(vec![1.0])).await.unwrap();
        let session = Mutex::new(AttendanceSession::new());
        lock(&session).observe("S1", "Ada", at(0));

        let first = mark_attendance(&session, &store, &course()).await;
        assert_eq!(first.marked_count, 1);
        assert_eq!(first.students[0].name, "Ada");

        lock(&session).observe("S1", "Ada", at(3));
        let second = mark_attendance(&session, &store, &course()).await;
        assert_eq!(second.marked_count, 0);

        let records = store.course_attendance("CS101").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].instructor, "Dr. Okafor");
    }

    #[tokio::test]
    async fn test_mark_attendance_skips_unregistered() {
        let store = MemoryStore::new();
        store.put_student("S1".into(), "Ada".into(), Embedding::new(vec![1.0])).await.unwrap();
        let session = Mutex::new(AttendanceSession::new());
        lock(&session).observe("S1", "Ada", at(0));
        lock(&session).observe("GONE", "Deleted", at(0));

        let outcome = mark_attendance(&session, &store, &course()).await;
        assert_eq!(outcome.marked_count, 1);
        assert_eq!(outcome.students[0].student_id, "S1");
        assert!(!lock(&session).is_marked("GONE"));
        assert_eq!(lock(&session).pending(), vec!["GONE"]);
    }

    /// Memory store whose attendance writes fail while `failing` is set.
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl Store for FlakyStore {
        fn put_student(&self, id: String, name: String, e: Embedding) -> BoxFuture<'_, Result<Student, StoreError>> {
            self.inner.put_student(id, name, e)
        }
        fn get_student<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Student>, StoreError>> {
            self.inner.get_student(id)
        }
        fn list_students(&self) -> BoxFuture<'_, Result<Vec<Student>, StoreError>> {
            self.inner.list_students()
        }
        fn delete_student<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
            self.inner.delete_student(id)
        }
        fn insert_course(&self, c: Course) -> BoxFuture<'_, Result<(), StoreError>> {
            self.inner.insert_course(c)
        }
        fn replace_course(&self, c: Course) -> BoxFuture<'_, Result<bool, StoreError>> {
            self.inner.replace_course(c)
        }
        fn get_course<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<Option<Course>, StoreError>> {
            self.inner.get_course(code)
        }
        fn list_courses(&self) -> BoxFuture<'_, Result<Vec<Course>, StoreError>> {
            self.inner.list_courses()
        }
        fn delete_course<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
            self.inner.delete_course(code)
        }
        fn add_attendance(&self, a: NewAttendance) -> BoxFuture<'_, Result<AttendanceRecord, StoreError>> {
            if self.failing.load(Ordering::SeqCst) {
                let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
                return future::ready(Err(StoreError::Io(err))).boxed();
            }
            self.inner.add_attendance(a)
        }
        fn course_attendance<'a>(
            &'a self,
            code: &'a str,
        ) -> BoxFuture<'a, Result<Vec<AttendanceRecord>, StoreError>> {
            self.inner.course_attendance(code)
        }
    }

    #[tokio::test]
    async fn test_failed_write_stays_pending_then_writes_once() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(true),
        };
        store.put_student("S1".into(), "Ada".into(), Embedding::new(vec![1.0])).await.unwrap();
        let session = Mutex::new(AttendanceSession::new());
        lock(&session).observe("S1", "Ada", at(0));

        let failed = mark_attendance(&session, &store, &course()).await;
        assert_eq!(failed.marked_count, 0);
        assert!(failed.students.is_empty());
        assert_eq!(lock(&session).pending(), vec!["S1"]);
        assert!(!lock(&session).is_marked("S1"));

        store.failing.store(false, Ordering::SeqCst);
        let retried = mark_attendance(&session, &store, &course()).await;
        assert_eq!(retried.marked_count, 1);
        let again = mark_attendance(&session, &store, &course()).await;
        assert_eq!(again.marked_count, 0);

        assert_eq!(store.course_attendance("CS101").await.unwrap().len(), 1);
        assert!(lock(&session).is_marked("S1"));
    }
}
