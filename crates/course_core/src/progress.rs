//! crates/course_core/src/progress.rs
//!
//! The lesson completion rule. A viewing record flips from `NotViewed` to
//! `Viewed` once the watched time reaches 80% of the lesson runtime, and never
//! flips back.
//!
//! Every code path that persists a `LessonView` must go through
//! [`LessonView::record_watch`] (or [`apply_progress_rule`] directly) right
//! before the write, using the lesson's runtime as read in the same unit of work.

use crate::domain::{LessonView, ViewStatus};
use chrono::{DateTime, Utc};

/// Share of the runtime, in percent, that must be watched to mark a lesson viewed.
pub const VIEWED_THRESHOLD_PERCENT: i64 = 80;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("lesson {lesson_id} has a non-positive runtime ({runtime})")]
    InvalidLessonState { lesson_id: i64, runtime: i32 },
    #[error("viewed time cannot be negative (got {0})")]
    NegativeViewedTime(i32),
}

/// Returns true when `viewed_time` covers at least the threshold share of `runtime`.
///
/// Integer arithmetic keeps the boundary exact (480 of 600 is exactly 80%).
pub fn reaches_threshold(viewed_time: i32, runtime: i32) -> bool {
    i64::from(viewed_time) * 100 >= i64::from(runtime) * VIEWED_THRESHOLD_PERCENT
}

/// Applies the one-way completion transition to a record about to be saved.
///
/// The record is left untouched when the runtime is not positive.
pub fn apply_progress_rule(view: &mut LessonView, runtime: i32) -> Result<(), ProgressError> {
    if runtime <= 0 {
        return Err(ProgressError::InvalidLessonState {
            lesson_id: view.lesson_id,
            runtime,
        });
    }

    if view.status == ViewStatus::NotViewed && reaches_threshold(view.viewed_time, runtime) {
        view.status = ViewStatus::Viewed;
    }

    Ok(())
}

impl LessonView {
    /// Records a new accumulated watch time and applies the completion rule.
    ///
    /// Validation happens before any field changes, so a rejected call leaves
    /// the record exactly as it was.
    pub fn record_watch(
        &mut self,
        viewed_time: i32,
        runtime: i32,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        if viewed_time < 0 {
            return Err(ProgressError::NegativeViewedTime(viewed_time));
        }
        if runtime <= 0 {
            return Err(ProgressError::InvalidLessonState {
                lesson_id: self.lesson_id,
                runtime,
            });
        }

        self.viewed_time = viewed_time;
        self.last_viewed = now;
        apply_progress_rule(self, runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn view(viewed_time: i32, status: ViewStatus) -> LessonView {
        LessonView {
            user_id: 1,
            lesson_id: 7,
            viewed_time,
            status,
            last_viewed: now(),
        }
    }

    #[test]
    fn below_threshold_stays_not_viewed() {
        let mut v = view(400, ViewStatus::NotViewed);
        apply_progress_rule(&mut v, 600).unwrap();
        assert_eq!(v.status, ViewStatus::NotViewed);
    }

    #[test]
    fn exactly_eighty_percent_marks_viewed() {
        let mut v = view(480, ViewStatus::NotViewed);
        apply_progress_rule(&mut v, 600).unwrap();
        assert_eq!(v.status, ViewStatus::Viewed);
    }

    #[test]
    fn one_second_short_of_threshold_is_not_enough() {
        // 80% of 601 is 480.8
        let mut v = view(480, ViewStatus::NotViewed);
        apply_progress_rule(&mut v, 601).unwrap();
        assert_eq!(v.status, ViewStatus::NotViewed);
    }

    #[test]
    fn viewed_is_never_demoted() {
        let mut v = view(10, ViewStatus::Viewed);
        apply_progress_rule(&mut v, 600).unwrap();
        assert_eq!(v.status, ViewStatus::Viewed);
    }

    #[test]
    fn watching_past_the_runtime_still_counts() {
        let mut v = view(900, ViewStatus::NotViewed);
        apply_progress_rule(&mut v, 600).unwrap();
        assert_eq!(v.status, ViewStatus::Viewed);
    }

    #[test]
    fn zero_runtime_is_rejected_without_mutation() {
        let mut v = view(480, ViewStatus::NotViewed);
        let err = apply_progress_rule(&mut v, 0).unwrap_err();
        assert_eq!(
            err,
            ProgressError::InvalidLessonState {
                lesson_id: 7,
                runtime: 0
            }
        );
        assert_eq!(v, view(480, ViewStatus::NotViewed));
    }

    #[test]
    fn negative_runtime_is_rejected() {
        let mut v = view(0, ViewStatus::NotViewed);
        assert!(apply_progress_rule(&mut v, -5).is_err());
    }

    #[test]
    fn record_watch_walks_through_the_600_second_scenario() {
        let later = now() + chrono::Duration::minutes(5);
        let mut v = LessonView::new(1, 7, now());

        v.record_watch(400, 600, now()).unwrap();
        assert_eq!(v.viewed_time, 400);
        assert_eq!(v.status, ViewStatus::NotViewed);

        v.record_watch(480, 600, later).unwrap();
        assert_eq!(v.viewed_time, 480);
        assert_eq!(v.status, ViewStatus::Viewed);
        assert_eq!(v.last_viewed, later);
    }

    #[test]
    fn record_watch_is_idempotent_for_the_same_time() {
        let mut first = LessonView::new(1, 7, now());
        first.record_watch(300, 600, now()).unwrap();
        let mut second = first.clone();
        second.record_watch(300, 600, now()).unwrap();
        assert_eq!(first, second);

        first.record_watch(550, 600, now()).unwrap();
        let status = first.status;
        first.record_watch(550, 600, now()).unwrap();
        assert_eq!(first.status, status);
    }

    #[test]
    fn lower_watch_time_after_completion_keeps_viewed() {
        let mut v = LessonView::new(1, 7, now());
        v.record_watch(590, 600, now()).unwrap();
        v.record_watch(20, 600, now()).unwrap();
        assert_eq!(v.viewed_time, 20);
        assert_eq!(v.status, ViewStatus::Viewed);
    }

    #[test]
    fn record_watch_rejects_negative_time_untouched() {
        let mut v = LessonView::new(1, 7, now());
        let before = v.clone();
        let err = v.record_watch(-1, 600, now() + chrono::Duration::hours(1));
        assert_eq!(err, Err(ProgressError::NegativeViewedTime(-1)));
        assert_eq!(v, before);
    }

    #[test]
    fn record_watch_rejects_invalid_runtime_untouched() {
        let mut v = LessonView::new(1, 7, now());
        let before = v.clone();
        assert!(v.record_watch(100, 0, now() + chrono::Duration::hours(1)).is_err());
        assert_eq!(v, before);
    }
}
