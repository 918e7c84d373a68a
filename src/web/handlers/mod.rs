pub mod system_handlers;
pub mod user_handlers;
pub mod xp_handlers;

pub use system_handlers::*;
pub use user_handlers::*;
pub use xp_handlers::*;
