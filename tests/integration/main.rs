//! End-to-end tests: scheduler, aggregator, ledger and the simulated
//! executor over an in-memory store, fed by a scripted market.

mod mock_feed;
mod scenarios;
