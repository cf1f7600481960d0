//! rendr render engines
//!
//! Server-side rendering for a bundled front-end application.
//!
//! - [`ProductionEngine`] renders from a built `dist/` directory on a
//!   [`rendr_pool::Pool`] of worker processes.
//! - [`DevelopmentEngine`] forwards renders to a supervised development
//!   server over HTTP.
//!
//! Both implement [`Engine`], so a front end can hold an `Arc<dyn Engine>`
//! and not care which one it got.

pub mod development;
pub mod engine;
pub mod production;
pub mod template;

pub use development::{DevelopmentEngine, DevelopmentEngineOptions};
pub use engine::{Engine, RenderResult};
pub use production::{ProductionEngine, ProductionEngineOptions};
pub use template::{PageTemplate, RenderedPage};
