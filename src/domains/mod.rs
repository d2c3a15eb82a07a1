//! Business domains: the matchmaking engine and its collaborators.

pub mod languages;
pub mod matchmaking;
pub mod sessions;
