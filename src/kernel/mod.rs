//! Policy kernel: tag and capability bookkeeping, label transitions and
//! label-indexed namespaces.
//!
//! Nothing here enforces anything; the kernel-level enforcement point trusts
//! the decisions and bookkeeping produced by these modules.

pub mod authority;
pub mod manager;
pub mod namespace;
pub mod process;
pub mod store;
pub mod transition;
