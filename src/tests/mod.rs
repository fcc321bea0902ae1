// Scenario tests
// Registry: end-to-end register / list / unregister / sweep flows
// HTTP API: the same flows through the axum router

pub mod support;
