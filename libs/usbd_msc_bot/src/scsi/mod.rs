//! The SCSI transparent command subset carried inside CBWs.

mod commands;
pub use commands::*;

mod enums;
pub use enums::*;

mod responses;
pub use responses::*;
