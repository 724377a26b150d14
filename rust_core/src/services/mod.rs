//! Settlement services: the weekly pipeline stages plus the money
//! intake and ledger operations they build on.

pub mod balance;
pub mod payments;
pub mod results;
pub mod scoring;
pub mod settlement;
pub mod standings;
pub mod winners;
