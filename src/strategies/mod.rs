pub mod engine;
pub mod equilibrium;
pub mod runner;
pub mod scorer;
pub mod tiers;
