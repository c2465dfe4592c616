pub mod csv;
pub mod fs;
pub mod logging;
