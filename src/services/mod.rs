pub mod admission;
pub mod callback;
pub mod fetch;
pub mod ocr;
pub mod queue;
pub mod status;
pub mod worker;
