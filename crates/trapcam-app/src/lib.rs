// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod cursor;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod ids;
pub mod model;
pub mod session;
pub mod source;
pub mod window;

pub use cursor::*;
pub use error::*;
pub use fetch::*;
pub use filter::*;
pub use ids::*;
pub use model::*;
pub use session::*;
pub use source::*;
pub use window::*;
