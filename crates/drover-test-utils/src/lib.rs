//! Mocks and fixtures shared by the Drover crates' tests.

pub mod fixtures;
pub mod mocks;

pub use fixtures::{test_config, write_config_file, write_intent_dataset};
pub use mocks::{
    FixedEmbedder, FixedRetriever, InMemoryRecordStore, ScriptedCaller, StaticWords, StubTool,
};
