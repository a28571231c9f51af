pub mod catalog;
pub mod domain;
pub mod ports;
pub mod progress;
pub mod stats;

pub use catalog::{LessonError, NewLesson, NewPermission};
pub use domain::{
    AuthSession, Lesson, LessonProgress, LessonView, LessonWithProgress, Permission, Product,
    AccessGrant, ProductAccess, ProductLesson, ProductWithLessons, User, UserCredentials, ViewStatus,
};
pub use ports::{DatabaseService, PortError, PortResult};
pub use progress::{apply_progress_rule, ProgressError, VIEWED_THRESHOLD_PERCENT};
pub use stats::{acquisition_percentage, ProductStats, ViewTotals};
