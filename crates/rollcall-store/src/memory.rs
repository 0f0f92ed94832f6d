//! In-process [`Store`] for tests and throwaway runs.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use futures::future::{self, BoxFuture, FutureExt};
use rollcall_core::Embedding;

use crate::model::{AttendanceRecord, Course, NewAttendance, Student};
use crate::store::{Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    students: RwLock<BTreeMap<String, Student>>,
    courses: RwLock<BTreeMap<String, Course>>,
    attendance: RwLock<Vec<AttendanceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Store for MemoryStore {
    fn put_student(
        &self,
        student_id: String,
        name: String,
        embedding: Embedding,
    ) -> BoxFuture<'_, Result<Student, StoreError>> {
        let student = Student {
            student_id,
            name,
            embedding,
            registered_at: Utc::now(),
        };
        write(&self.students).insert(student.student_id.clone(), student.clone());
        future::ready(Ok(student)).boxed()
    }

    fn get_student<'a>(
        &'a self,
        student_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Student>, StoreError>> {
        let found = read(&self.students).get(student_id).cloned();
        future::ready(Ok(found)).boxed()
    }

    fn list_students(&self) -> BoxFuture<'_, Result<Vec<Student>, StoreError>> {
        let all = read(&self.students).values().cloned().collect();
        future::ready(Ok(all)).boxed()
    }

    fn delete_student<'a>(&'a self, student_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        let removed = write(&self.students).remove(student_id).is_some();
        future::ready(Ok(removed)).boxed()
    }

    fn insert_course(&self, course: Course) -> BoxFuture<'_, Result<(), StoreError>> {
        let mut courses = write(&self.courses);
        let result = if courses.contains_key(&course.code) {
            Err(StoreError::Conflict {
                kind: "course",
                key: course.code,
            })
        } else {
            courses.insert(course.code.clone(), course);
            Ok(())
        };
        future::ready(result).boxed()
    }

    fn replace_course(&self, course: Course) -> BoxFuture<'_, Result<bool, StoreError>> {
        let replaced = match write(&self.courses).get_mut(&course.code) {
            Some(slot) => {
                *slot = course;
                true
            }
            None => false,
        };
        future::ready(Ok(replaced)).boxed()
    }

    fn get_course<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<Option<Course>, StoreError>> {
        let found = read(&self.courses).get(code).cloned();
        future::ready(Ok(found)).boxed()
    }

    fn list_courses(&self) -> BoxFuture<'_, Result<Vec<Course>, StoreError>> {
        let all = read(&self.courses).values().cloned().collect();
        future::ready(Ok(all)).boxed()
    }

    fn delete_course<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        let removed = write(&self.courses).remove(code).is_some();
        future::ready(Ok(removed)).boxed()
    }

    fn add_attendance(
        &self,
        attendance: NewAttendance,
    ) -> BoxFuture<'_, Result<AttendanceRecord, StoreError>> {
        let record = attendance.stamp(Utc::now());
        write(&self.attendance).push(record.clone());
        future::ready(Ok(record)).boxed()
    }

    fn course_attendance<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AttendanceRecord>, StoreError>> {
        let mut records: Vec<AttendanceRecord> = read(&self.attendance)
            .iter()
            .filter(|r| r.course_code == code)
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal keys
        records.sort_by(|a, b| {
            (a.lecture_date.as_str(), a.marked_at).cmp(&(b.lecture_date.as_str(), b.marked_at))
        });
        future::ready(Ok(records)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_document_semantics() {
        let store = MemoryStore::new();
        store
            .put_student("S1".into(), "Ada".into(), Embedding::new(vec![1.0]))
            .await
            .unwrap();
        store
            .put_student("S1".into(), "Ada Lovelace".into(), Embedding::new(vec![2.0]))
            .await
            .unwrap();
        let students = store.list_students().await.unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Ada Lovelace");

        assert!(store.delete_student("S1").await.unwrap());
        assert!(store.get_student("S1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_attendance_filtered_by_course() {
        let store = MemoryStore::new();
        for (sid, code) in [("S1", "A"), ("S2", "B"), ("S3", "A")] {
            store
                .add_attendance(NewAttendance {
                    student_id: sid.into(),
                    name: sid.into(),
                    course_code: code.into(),
                    course_name: "Course".into(),
                    instructor: "Prof".into(),
                })
                .await
                .unwrap();
        }
        let ids: Vec<String> = store
            .course_attendance("A")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.student_id)
            .collect();
        assert_eq!(ids, vec!["S1", "S3"]);
    }
}
