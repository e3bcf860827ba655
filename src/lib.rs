#[path = "core/model.rs"]
pub mod model;

#[path = "core/merge.rs"]
pub mod merge;

#[path = "core/leaderboard.rs"]
pub mod leaderboard;

#[path = "core/highlight.rs"]
pub mod highlight;

#[path = "core/protocol.rs"]
pub mod protocol;

#[path = "core/session.rs"]
pub mod session;

pub mod view;
