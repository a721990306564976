pub mod bucketing;
pub mod change_listener;
pub mod flag_evaluator;
pub mod flag_models;
pub mod flag_service;
pub mod flag_source;
pub mod flag_store;
pub mod override_resolver;
