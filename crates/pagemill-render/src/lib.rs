//! # Pagemill Render
//!
//! Compiled-template cache keyed by `(site_group_id, name)`, the AST
//! analyzer that counts dynamic helper calls, and the renderer whose helpers
//! pop from the pool substrate.

pub mod analyzer;
pub mod engine;
pub mod helpers;

pub use analyzer::analyze_template;
pub use engine::{CompiledMeta, PageData, RenderEngine};
pub use helpers::{register_pool_helpers, IMAGE_GROUP_KEY, KEYWORD_GROUP_KEY};
