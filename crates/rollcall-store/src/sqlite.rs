//! SQLite-backed [`Store`], driven through `tokio-rusqlite`'s background connection.

use std::path::Path;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use rollcall_core::Embedding;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::model::{AttendanceRecord, Course, NewAttendance, Student};
use crate::store::{Store, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    student_id    TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    model_version TEXT,
    registered_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS courses (
    code          TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    instructor    TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    start_date    TEXT NOT NULL,
    lecture_count INTEGER NOT NULL,
    capacity      INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id           TEXT PRIMARY KEY,
    student_id   TEXT NOT NULL,
    course_code  TEXT NOT NULL,
    course_name  TEXT NOT NULL,
    instructor   TEXT NOT NULL,
    name         TEXT NOT NULL,
    marked_at    TEXT NOT NULL,
    lecture_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_by_course
    ON attendance (course_code, lecture_date, marked_at);
";

const STUDENT_COLUMNS: &str = "student_id, name, embedding, model_version, registered_at";
const COURSE_COLUMNS: &str =
    "code, name, instructor, password_hash, start_date, lecture_count, capacity";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().await?).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    embedding.values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_values(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    let blob: Vec<u8> = row.get(2)?;
    Ok(Student {
        student_id: row.get(0)?,
        name: row.get(1)?,
        embedding: Embedding {
            values: blob_to_values(&blob),
            model_version: row.get(3)?,
        },
        registered_at: row.get(4)?,
    })
}

fn course_from_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        code: row.get(0)?,
        name: row.get(1)?,
        instructor: row.get(2)?,
        password_hash: row.get(3)?,
        start_date: row.get(4)?,
        lecture_count: row.get(5)?,
        capacity: row.get(6)?,
    })
}

fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        course_code: row.get(2)?,
        course_name: row.get(3)?,
        instructor: row.get(4)?,
        name: row.get(5)?,
        marked_at: row.get(6)?,
        lecture_date: row.get(7)?,
    })
}

impl Store for SqliteStore {
    fn put_student(
        &self,
        student_id: String,
        name: String,
        embedding: Embedding,
    ) -> BoxFuture<'_, Result<Student, StoreError>> {
        async move {
            let student = Student {
                student_id,
                name,
                embedding,
                registered_at: Utc::now(),
            };
            let row = student.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("INSERT OR REPLACE INTO students ({STUDENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                        params![
                            row.student_id,
                            row.name,
                            embedding_to_blob(&row.embedding),
                            row.embedding.model_version,
                            row.registered_at,
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(student)
        }
        .boxed()
    }

    fn get_student<'a>(
        &'a self,
        student_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Student>, StoreError>> {
        let student_id = student_id.to_string();
        async move {
            let student = self
                .conn
                .call(move |conn| {
                    Ok(conn
                        .query_row(
                            &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?1"),
                            params![student_id],
                            student_from_row,
                        )
                        .optional()?)
                })
                .await?;
            Ok(student)
        }
        .boxed()
    }

    fn list_students(&self) -> BoxFuture<'_, Result<Vec<Student>, StoreError>> {
        async move {
            let students = self
                .conn
                .call(|conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {STUDENT_COLUMNS} FROM students ORDER BY student_id"
                    ))?;
                    let rows = stmt
                        .query_map([], student_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(students)
        }
        .boxed()
    }

    fn delete_student<'a>(&'a self, student_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        let student_id = student_id.to_string();
        async move {
            let removed = self
                .conn
                .call(move |conn| {
                    Ok(conn.execute("DELETE FROM students WHERE student_id = ?1", params![student_id])?)
                })
                .await?;
            Ok(removed > 0)
        }
        .boxed()
    }

    fn insert_course(&self, course: Course) -> BoxFuture<'_, Result<(), StoreError>> {
        async move {
            let code = course.code.clone();
            let inserted = self
                .conn
                .call(move |conn| {
                    Ok(conn.execute(
                        &format!(
                            "INSERT OR IGNORE INTO courses ({COURSE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                        ),
                        params![
                            course.code,
                            course.name,
                            course.instructor,
                            course.password_hash,
                            course.start_date,
                            course.lecture_count,
                            course.capacity,
                        ],
                    )?)
                })
                .await?;
            if inserted == 0 {
                return Err(StoreError::Conflict {
                    kind: "course",
                    key: code,
                });
            }
            Ok(())
        }
        .boxed()
    }

    fn replace_course(&self, course: Course) -> BoxFuture<'_, Result<bool, StoreError>> {
        async move {
            let updated = self
                .conn
                .call(move |conn| {
                    Ok(conn.execute(
                        "UPDATE courses SET name = ?2, instructor = ?3, password_hash = ?4,
                             start_date = ?5, lecture_count = ?6, capacity = ?7
                         WHERE code = ?1",
                        params![
                            course.code,
                            course.name,
                            course.instructor,
                            course.password_hash,
                            course.start_date,
                            course.lecture_count,
                            course.capacity,
                        ],
                    )?)
                })
                .await?;
            Ok(updated > 0)
        }
        .boxed()
    }

    fn get_course<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<Option<Course>, StoreError>> {
        let code = code.to_string();
        async move {
            let course = self
                .conn
                .call(move |conn| {
                    Ok(conn
                        .query_row(
                            &format!("SELECT {COURSE_COLUMNS} FROM courses WHERE code = ?1"),
                            params![code],
                            course_from_row,
                        )
                        .optional()?)
                })
                .await?;
            Ok(course)
        }
        .boxed()
    }

    fn list_courses(&self) -> BoxFuture<'_, Result<Vec<Course>, StoreError>> {
        async move {
            let courses = self
                .conn
                .call(|conn| {
                    let mut stmt =
                        conn.prepare(&format!("SELECT {COURSE_COLUMNS} FROM courses ORDER BY code"))?;
                    let rows = stmt
                        .query_map([], course_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(courses)
        }
        .boxed()
    }

    fn delete_course<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        let code = code.to_string();
        async move {
            let removed = self
                .conn
                .call(move |conn| Ok(conn.execute("DELETE FROM courses WHERE code = ?1", params![code])?))
                .await?;
            Ok(removed > 0)
        }
        .boxed()
    }

    fn add_attendance(
        &self,
        attendance: NewAttendance,
    ) -> BoxFuture<'_, Result<AttendanceRecord, StoreError>> {
        async move {
            let record = attendance.stamp(Utc::now());
            let row = record.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO attendance (id, student_id, course_code, course_name,
                             instructor, name, marked_at, lecture_date)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            row.id,
                            row.student_id,
                            row.course_code,
                            row.course_name,
                            row.instructor,
                            row.name,
                            row.marked_at,
                            row.lecture_date,
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(record)
        }
        .boxed()
    }

    fn course_attendance<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AttendanceRecord>, StoreError>> {
        let code = code.to_string();
        async move {
            let records = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT id, student_id, course_code, course_name, instructor, name,
                                marked_at, lecture_date
                         FROM attendance WHERE course_code = ?1
                         ORDER BY lecture_date, marked_at, rowid",
                    )?;
                    let rows = stmt
                        .query_map(params![code], attendance_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(records)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CourseDraft;

    fn course(code: &str) -> Course {
        CourseDraft {
            code: code.into(),
            name: "Databases".into(),
            instructor: "Dr. Haddad".into(),
            password: "pw".into(),
            start_date: "2026-09-07".into(),
            lecture_count: 12,
            capacity: 40,
        }
        .into_course()
        .unwrap()
    }

    fn attendance(student_id: &str, code: &str) -> NewAttendance {
        NewAttendance {
            student_id: student_id.into(),
            name: format!("Student {student_id}"),
            course_code: code.into(),
            course_name: "Databases".into(),
            instructor: "Dr. Haddad".into(),
        }
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let embedding = Embedding::new(vec![0.25, -1.5, 3.0e-7]);
        assert_eq!(blob_to_values(&embedding_to_blob(&embedding)), embedding.values);
    }

    #[tokio::test]
    async fn test_put_student_replaces_by_id() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .put_student("S1".into(), "Ada".into(), Embedding::new(vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .put_student("S1".into(), "Ada L.".into(), Embedding::new(vec![0.0, 1.0]))
            .await
            .unwrap();

        let students = store.list_students().await.unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Ada L.");
        assert_eq!(students[0].embedding.values, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_get_and_delete_student() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut embedding = Embedding::new(vec![0.5; 4]);
        embedding.model_version = Some("w600k_r50".into());
        let written = store
            .put_student("S9".into(), "Grace".into(), embedding.clone())
            .await
            .unwrap();

        let read = store.get_student("S9").await.unwrap().expect("student");
        assert_eq!(read.embedding, embedding);
        assert_eq!(read.registered_at, written.registered_at);

        assert!(store.delete_student("S9").await.unwrap());
        assert!(!store.delete_student("S9").await.unwrap());
        assert!(store.get_student("S9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_course_conflict() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert_course(course("DB200")).await.unwrap();
        let err = store.insert_course(course("DB200")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { kind: "course", .. }));
    }

    #[tokio::test]
    async fn test_replace_and_delete_course() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(!store.replace_course(course("DB200")).await.unwrap());

        store.insert_course(course("DB200")).await.unwrap();
        let mut updated = course("DB200");
        updated.capacity = 99;
        assert!(store.replace_course(updated).await.unwrap());

        let read = store.get_course("DB200").await.unwrap().expect("course");
        assert_eq!(read.capacity, 99);
        assert!(read.check_password("pw"));

        assert!(store.delete_course("DB200").await.unwrap());
        assert!(store.list_courses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attendance_is_appended_per_course() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let first = store.add_attendance(attendance("S1", "DB200")).await.unwrap();
        store.add_attendance(attendance("S2", "DB200")).await.unwrap();
        store.add_attendance(attendance("S1", "OS300")).await.unwrap();

        let records = store.course_attendance("DB200").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], first);
        assert_eq!(records[1].student_id, "S2");
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rollcall.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.insert_course(course("CS101")).await.unwrap();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.list_courses().await.unwrap().len(), 1);
    }
}
