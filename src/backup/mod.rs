pub mod backup_config;
pub mod executor;
pub mod invoke;
pub mod job;
pub mod pipeline;
pub mod report;
pub mod result_error;
pub mod run;
pub mod validate;
