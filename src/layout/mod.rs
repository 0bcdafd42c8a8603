mod layout;

pub use layout::{LayoutEntry, layout};
