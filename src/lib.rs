//! hemirt - object runtime
//!
//! A class registry with colon-delimited inheritance, a tree of lockable
//! objects carrying typed variables and named events, tick-driven timers,
//! and a byte-order-aware binary codec for versioned persistence.
//!
//! Everything hangs off a [`Runtime`]:
//!
//! ```
//! use hemirt::{Config, Runtime};
//! use hemirt::classes::ClassDef;
//!
//! let rt = Runtime::new(Config::default()).unwrap();
//! rt.register_class(ClassDef::new("Widget")).unwrap();
//! let w = rt.create_object("Widget", Some("w")).unwrap();
//! w.set_var("width", 120u32);
//! assert_eq!(w.get::<u32>("width").unwrap(), 120);
//! ```

pub mod classes;
pub mod codec;
pub mod config;
pub mod diag;
pub mod error;
pub mod events;
pub mod objects;
pub mod paths;
pub mod runtime;

pub use config::Config;
pub use error::{CoreError, CoreResult, ErrorCode};
pub use runtime::Runtime;
