pub mod ticket;

pub use ticket::{SearchResult, Ticket};
