// Aggregates all former standalone integration tests as modules.
mod page_reload;
mod serialization;
mod status;
mod vote_flow;
