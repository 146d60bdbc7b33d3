// HTTP routes
pub mod demands;
pub mod expressions;
pub mod feedback;
pub mod health;
pub mod status;
pub mod stream;

pub use demands::*;
pub use expressions::*;
pub use feedback::*;
pub use health::*;
pub use status::*;
pub use stream::*;
