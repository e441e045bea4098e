pub mod behavioral;
pub mod position_diff;
pub mod scoring;
