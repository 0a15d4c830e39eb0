mod router_scenarios;
mod self_learning;
mod support;
