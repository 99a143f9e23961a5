pub mod config;
pub mod diagnostic;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod server;
pub mod telemetry;

/**
 * \brief SDK prelude for the commonly used modules.
 */
pub mod prelude {
    pub use crate::config;
    pub use crate::diagnostic;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::prompt;
    pub use crate::server;
    pub use crate::telemetry;
}
