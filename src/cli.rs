pub mod app;
pub mod container;
pub mod launch;

pub use app::App;
pub use launch::LaunchArgs;
