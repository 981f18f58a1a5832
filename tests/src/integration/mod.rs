//! Cross-crate integration flows.

#[cfg(test)]
mod breaker_flows;
#[cfg(test)]
mod gateway_flows;
#[cfg(test)]
mod isolation_flows;
#[cfg(test)]
mod signing_flows;
