pub mod anomaly;
pub mod app;
pub mod audit;
pub mod config;
pub mod domain;
pub mod error;
pub mod last_run;
pub mod ledger;
pub mod output;
pub mod pruner;
pub mod resolver;
pub mod retention;
pub mod seqs;
pub mod store;
