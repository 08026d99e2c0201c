// Gateway file to expose integration tests from the integration/ subdirectory
// Each test file in integration/ needs to be included here

mod common;

#[path = "integration/test_retrieval_properties.rs"]
mod test_retrieval_properties;

#[path = "integration/test_rebuild_lifecycle.rs"]
mod test_rebuild_lifecycle;

#[path = "integration/test_backup_retention.rs"]
mod test_backup_retention;

#[path = "integration/test_json_source.rs"]
mod test_json_source;
