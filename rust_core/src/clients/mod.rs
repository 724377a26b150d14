pub mod statsapi;
