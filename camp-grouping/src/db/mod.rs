//! Database access for the grouping engine
//!
//! Every function takes a `&mut SqliteConnection` so callers decide the
//! transaction boundary; a grouping run and a manual move each pass the same
//! open transaction to every call.

pub mod assignments;
pub mod campers;
pub mod clusters;
pub mod groups;
pub mod locks;
pub mod roster;
pub mod runs;
pub mod violations;
