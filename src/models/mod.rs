mod license;
mod organization;
mod subscription;
mod ticket;

pub use license::*;
pub use organization::*;
pub use subscription::*;
pub use ticket::*;
