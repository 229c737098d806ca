// feishu-sync-common: shared types and pure logic for the sync engine.

pub mod domain;
pub mod manifest;
pub mod markdown;
pub mod path;
