pub mod delete_flow;
pub mod dry_run;
pub mod flow;
pub mod local_storage;
pub mod setup;
pub mod validate;
