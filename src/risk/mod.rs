pub mod circuit_breaker;
pub mod position_sizer;
pub mod risk_manager;
