pub mod ignore;

pub use ignore::{IgnoreFilter, IgnoreOptions};
