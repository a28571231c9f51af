//! crates/course_core/src/catalog.rs
//!
//! Validated input for catalog entries before they reach a storage adapter.

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LessonError {
    #[error("lesson title cannot be empty")]
    EmptyTitle,
    #[error("lesson runtime must be positive (got {0})")]
    NonPositiveRuntime(i32),
    #[error("lesson video must be an http(s) URL: {0}")]
    InvalidVideoUrl(String),
}

/// A lesson that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLesson {
    pub title: String,
    pub description: String,
    pub video: String,
    pub runtime: i32,
}

impl NewLesson {
    /// Checks the fields the store cannot express on its own.
    pub fn validate(&self) -> Result<(), LessonError> {
        if self.title.trim().is_empty() {
            return Err(LessonError::EmptyTitle);
        }
        if self.runtime <= 0 {
            return Err(LessonError::NonPositiveRuntime(self.runtime));
        }
        match Url::parse(&self.video) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(()),
            _ => Err(LessonError::InvalidVideoUrl(self.video.clone())),
        }
    }
}

/// A permission bundle that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPermission {
    pub name: String,
    pub view: bool,
    pub edit: bool,
    pub delete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson() -> NewLesson {
        NewLesson {
            title: "Ownership".to_string(),
            description: "Moves and borrows".to_string(),
            video: "https://example.com/videos/lesson1.mp4".to_string(),
            runtime: 600,
        }
    }

    #[test]
    fn accepts_a_well_formed_lesson() {
        assert_eq!(lesson().validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_runtime() {
        let l = NewLesson { runtime: 0, ..lesson() };
        assert_eq!(l.validate(), Err(LessonError::NonPositiveRuntime(0)));
    }

    #[test]
    fn rejects_blank_title() {
        let l = NewLesson { title: "   ".to_string(), ..lesson() };
        assert_eq!(l.validate(), Err(LessonError::EmptyTitle));
    }

    #[test]
    fn rejects_non_http_video() {
        for video in ["not a url", "ftp://example.com/a.mp4", "lesson.mp4"] {
            let l = NewLesson { video: video.to_string(), ..lesson() };
            assert!(matches!(l.validate(), Err(LessonError::InvalidVideoUrl(_))), "{video}");
        }
    }
}
