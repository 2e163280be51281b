//! Wire format types for remote provider APIs
//!
//! Pure serde structs matching each API's JSON format. They are only used
//! at the boundary and never leak into the event protocol.

pub mod openai;
