//! Script artifacts: the structured test-script format, its structural
//! contract, the on-disk artifact store, and AI-backed generation.

mod script_contract;
mod script_generator;
mod script_store;

pub use script_contract::{
    parse_script_document, validate_test_script, ScriptError, ScriptPolicy, TestScript, TestStep,
    SCRIPT_ERROR_CODE_CONTRACT, SCRIPT_ERROR_CODE_GENERATION, SCRIPT_ERROR_CODE_LOAD,
    SCRIPT_SCHEMA_VERSION,
};
pub use script_generator::{extract_script_document, ScriptGenerator, ScriptGeneratorConfig};
pub use script_store::{SavedScript, ScriptStore};
