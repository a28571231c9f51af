//! crates/course_core/src/stats.rs
//!
//! Per-product statistics: views, watch time, students and acquisition rate.
//! Adapters gather the raw counts; the arithmetic lives here so every adapter
//! agrees on edge cases.

use crate::domain::{LessonView, ViewStatus};

/// Aggregated statistics for a single product, recomputed on every request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductStats {
    pub product_id: i64,
    pub name: String,
    /// Number of (user, lesson) records in the viewed state.
    pub total_views: i64,
    /// Sum of watched seconds over those viewed records.
    pub total_views_time: i64,
    /// Distinct users holding an access grant.
    pub total_students: i64,
    /// `total_students / total_users`, 0.0 when there are no users.
    pub acquisition_percentage: f64,
}

/// Views and watch time over a set of viewing records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewTotals {
    pub total_views: i64,
    pub total_views_time: i64,
}

impl ViewTotals {
    /// Counts only records in the viewed state.
    pub fn tally<'a, I>(views: I) -> Self
    where
        I: IntoIterator<Item = &'a LessonView>,
    {
        views
            .into_iter()
            .filter(|v| v.status == ViewStatus::Viewed)
            .fold(Self::default(), |acc, v| Self {
                total_views: acc.total_views + 1,
                total_views_time: acc.total_views_time + i64::from(v.viewed_time),
            })
    }
}

/// Fraction of all users that hold access to a product.
pub fn acquisition_percentage(total_students: i64, total_users: i64) -> f64 {
    if total_users <= 0 {
        return 0.0;
    }
    total_students as f64 / total_users as f64
}

impl ProductStats {
    pub fn from_counts(
        product_id: i64,
        name: impl Into<String>,
        totals: ViewTotals,
        total_students: i64,
        total_users: i64,
    ) -> Self {
        Self {
            product_id,
            name: name.into(),
            total_views: totals.total_views,
            total_views_time: totals.total_views_time,
            total_students,
            acquisition_percentage: acquisition_percentage(total_students, total_users),
        }
    }
}
