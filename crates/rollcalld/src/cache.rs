//! In-memory copy of every registered student's embedding, reloaded from the
//! store at most once per lifetime.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rollcall_core::{EnrolledFace, EMBEDDING_DIM};
use rollcall_store::{Store, Student};

use crate::lock;

pub struct StudentCache {
    faces: Vec<EnrolledFace>,
    loaded_at: Option<Instant>,
    lifetime: Duration,
}

impl StudentCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            faces: Vec::new(),
            loaded_at: None,
            lifetime,
        }
    }

    pub fn faces(&self) -> &[EnrolledFace] {
        &self.faces
    }

    /// True if never loaded, invalidated, or the last load is older than the lifetime.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.loaded_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.lifetime,
        }
    }

    /// Force the next refresh to hit the store.
    pub fn invalidate(&mut self) {
        self.loaded_at = None;
    }

    fn replace(&mut self, students: Vec<Student>, now: Instant) {
        self.faces = students
            .into_iter()
            .filter_map(|s| {
                if s.embedding.dim() != EMBEDDING_DIM {
                    tracing::warn!(
                        student_id = %s.student_id,
                        dim = s.embedding.dim(),
                        "skipping student with unusable embedding"
                    );
                    return None;
                }
                Some(EnrolledFace {
                    student_id: s.student_id,
                    name: s.name,
                    embedding: s.embedding,
                })
            })
            .collect();
        self.loaded_at = Some(now);
    }
}

/// Reload the cache from the store if it is stale. Returns true if a reload happened.
///
/// A failed load leaves the previous contents in place, so recognition keeps
/// working against the last good snapshot.
pub async fn refresh_if_stale(cache: &Mutex<StudentCache>, store: &dyn Store, now: Instant) -> bool {
    if !lock(cache).is_stale(now) {
        return false;
    }

    match store.list_students().await {
        Ok(students) => {
            let mut cache = lock(cache);
            cache.replace(students, now);
            tracing::info!(students = cache.faces.len(), "student cache loaded");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load student cache; keeping previous contents");
            false
        }
    }
}
