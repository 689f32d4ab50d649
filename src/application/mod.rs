//! Page-build pipeline, SSR proxy and the engine facade.

pub mod builder;
pub mod context;
pub mod engine;
pub mod error;
pub mod partial;
pub(crate) mod resolver;
pub mod ssr;
