// ABOUTME: Device tree blob parsing module
// ABOUTME: Decodes a blob into an arena tree with translated addresses and resolved interrupts

pub mod builder;
pub mod error;
pub mod header;
pub mod irq;
pub mod memory;
pub mod parser;
pub mod tokens;
pub mod translate;
pub mod tree;

pub use error::DtbError;
pub use header::DtbHeader;
pub use irq::InterruptSpecifier;
pub use memory::MemoryReservation;
pub use parser::DeviceTreeParser;
pub use tokens::DtbToken;
pub use tree::{DeviceTree, DeviceTreeNode, NodeId, NodeIterator, Property};
