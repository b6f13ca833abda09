//! CLI command implementations.
//!
//! | Module       | Commands handled |
//! |--------------|------------------|
//! | `serve`      | `Serve`          |
//! | `render`     | `Render`         |
//! | `blueprints` | `Blueprints`     |
//! | `config`     | `Config`         |

pub mod blueprints;
pub mod config;
pub mod render;
pub mod serve;

pub use blueprints::cmd_blueprints;
pub use config::cmd_config;
pub use render::cmd_render;
pub use serve::cmd_serve;
