pub mod describe;
pub mod pipelines;
