pub mod error;
pub mod module;
pub mod opcode;
pub mod section;
pub mod types;
pub mod varint;

pub use error::{Error, Result};
pub use module::{ModuleReader, HEADER_SIZE};
pub use section::{Section, SectionKind};
