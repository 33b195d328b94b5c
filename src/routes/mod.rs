/// Router Module Index
///
/// Routes are grouped by how they authenticate. The Route Guard middleware is
/// applied once over the whole router in `create_router`; its path matcher
/// decides which of these groups it actually inspects.

/// Login, logout and the health check.
pub mod public;
/// Dashboard pages and the session watch stream. Reached only through the guard.
pub mod authenticated;
/// JSON API under `/api`. Skipped by the guard; handlers authenticate with `ApiUser`.
pub mod api;
