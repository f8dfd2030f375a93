//! Request and response types of the HTTP API. The cost tree itself is
//! [`crate::cost::CostWithChildren`].

pub mod costs;
