pub mod deployment;
pub mod project;
pub mod release;
pub mod state_machine;

// Project/Service/Environment CRUD lives together in `project` — each is a
// thin audited wrapper over its own `db::` module with no cross-entity
// transaction to coordinate, unlike `deployment`/`release`.
