mod repository;

pub use repository::*;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for per-company keyword settings
pub const MIGRATION_002_KEYWORDS: &str = include_str!("migrations/002_keyword_settings.sql");
