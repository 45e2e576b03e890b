//! Prelude module - commonly used test utilities.
//!
//! Use `use mfe_test::prelude::*;` in test modules.

// Fixtures
pub use crate::{
    bundle_url, current_manifest, document_of, legacy_manifest, manifest_for_container,
    manifest_requiring,
};

// Mocks
pub use crate::{
    FailingModule, ModuleCounters, PanickingModule, RecordingEventBus, RecordingLogger,
    RecordingNotifier, ScriptedFetcher, TestModule,
};

// Harness
pub use crate::{
    TEST_FALLBACK_URL, TEST_REGISTRY_URL, TestHost, setup_test_logging,
    setup_test_logging_default, test_dir,
};
