pub mod app;
pub mod config;
pub mod device_pool;
pub mod handlers;
pub mod model;

pub use app::{build_router, AppState};
pub use config::LocationConfig;
pub use model::{enrich_attendance, summarize_day, AttendancePolicy, AttendanceRecord, AttendanceStatus, DailySummary};
