pub mod driver;
pub mod scheduler;
pub mod writer;

pub use driver::PassOptions;
