mod document;
mod metadata;
mod reader2d;
mod reader3d;
mod support;
mod writer2d;
mod writer3d;

pub use document::{CreateOptions, Document};
pub use metadata::{Metadata, MetadataItem, MetadataItemFlags, MetadataValue};
pub use reader2d::{Reader2d, TileInfo2d};
pub use reader3d::{BrickInfo3d, Reader3d};
pub use writer2d::Writer2d;
pub use writer3d::Writer3d;
