pub mod app;
pub mod presenter;

pub use app::{run_display, AppEvent, Command};
pub use presenter::Presenter;
