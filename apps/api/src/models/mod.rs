pub mod render_job;
pub mod resume;
