pub mod series_job_repo;

pub use series_job_repo::SeriesJobRepo;
