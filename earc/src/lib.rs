pub mod container;
pub mod scan;
