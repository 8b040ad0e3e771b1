// Core modules: store access, record decoding, aggregation and presentation.
pub mod bolt;
pub mod encoding;
pub mod error;
pub mod extract;
pub mod fields;
pub mod record;
pub mod resolve;
pub mod summary;
pub mod template;
pub mod walk;
