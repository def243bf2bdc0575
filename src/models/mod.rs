pub mod adherence;
pub mod enums;
pub mod filters;
pub mod schedule_event;
pub mod template;
pub mod vital_sign;

pub use adherence::*;
pub use enums::*;
pub use filters::*;
pub use schedule_event::*;
pub use template::*;
pub use vital_sign::*;
