//! Practice sessions and the progress they add up to.

pub mod model;

pub use model::{
    PracticeCompletion, PracticeContent, PracticeSession, PracticeType, Rating, UserProgress,
};
