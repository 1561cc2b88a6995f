pub mod analytics;
pub mod backup;
pub mod core;
pub mod courses;
pub mod enrollment;
pub mod setup;
pub mod submissions;
