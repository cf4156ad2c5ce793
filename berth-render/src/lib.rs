//! Berth Render
//!
//! Turns the domain records of `berth-core` into the files their external
//! tools consume, and loads those files back into records:
//! - `template`: Helm-style template engine backed by minijinja
//! - `chart`: Deployment, Service and autoscaler manifests from a values record
//! - `workflow`, `dockerfile`, `compose`, `makefile`: one module per artifact,
//!   each with a `render` and a `parse` function
//! - `load`: manifest parsing and artifact discovery in a directory

pub mod chart;
pub mod compose;
pub mod dockerfile;
pub mod error;
pub mod load;
pub mod makefile;
pub mod template;
pub mod workflow;

pub use error::{RenderError, Result};
pub use load::{LoadedDir, load_dir, parse_manifest};
pub use template::{TemplateContext, TemplateEngine};
