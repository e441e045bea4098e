pub mod account_link;
pub mod audit;
pub mod behavioral_alert;
pub mod position;
pub mod trade;
pub mod trade_event;
pub mod trading_rules;
