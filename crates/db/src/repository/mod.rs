//! Repository functions: one function per database operation.
//!
//! Every function takes a pool or connection and returns a `Result<T, DbError>`.
//! Tenant-scoped functions take the scope and filter on it in every statement.
//! No business logic, just SQL.

pub mod engines;
pub mod tasks;
pub mod workflows;
