pub mod canonicalizer;
pub mod ledger;
pub mod lifecycle;
pub mod matcher;
pub mod metrics;
pub mod ocr;
pub mod orchestrator;
pub mod storage;
