pub mod contributor;
pub mod group;
pub mod import;
pub mod publication;
pub mod user;

pub use contributor::*;
pub use group::*;
pub use import::*;
pub use publication::*;
pub use user::*;
