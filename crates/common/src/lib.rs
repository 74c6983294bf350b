// huddle-common: shared types and the wire protocol for the Huddle workspace

pub mod protocol;
pub mod types;
