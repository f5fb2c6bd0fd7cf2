pub mod analysis_results;
pub mod samples;
