pub mod analyze;
pub mod average;
pub mod basis;
pub mod config;
pub mod consts;
pub mod energy;
pub mod error;
pub mod field;
pub mod grid;
pub mod io;
pub mod reduce;
pub mod series;
pub mod solver;
pub mod stages;
