pub mod bankroll;
