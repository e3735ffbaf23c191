//! Binary codec - byte-order-aware scalars, strings and version headers

mod primitives;
mod source;
mod version;

pub use primitives::{Codec, TypeTag};
pub use source::{
    ByteOrder, CodecConfig, DataSource, FileSource, IoSource, MemSource, DEFAULT_MAX_STRING,
};
pub use version::{read_version, write_version, Version, VERSION_NAME_LEN};
